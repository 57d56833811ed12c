//! Client facade: connection lifecycle and the handle given to callbacks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{OnceCell, mpsc, watch};

use crate::api::{ApiAccess, HttpApi, PrivateMessage, Profile, StreamInfo};
use crate::config::ChatConfig;
use crate::error::{ApiError, ClientError, ConfigError, SendError};
use crate::handler::Handlers;
use crate::session::Session;
use crate::throttle::ThrottleGuard;
use crate::time::{Clock, SystemClock};
use crate::transport::{Connector, WsConnector};
use crate::wire;

/// Connection lifecycle state.
///
/// Legal transitions are disconnected -> connecting -> connected,
/// connecting/connected -> closing (user-requested), connected -> connecting
/// (reconnect), and any active state -> disconnected at session teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        };
        write!(f, "{}", label)
    }
}

/// State shared between the facade, the handle and the session task.
pub(crate) struct Shared {
    pub(crate) config: ChatConfig,
    pub(crate) throttle: ThrottleGuard,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pub(crate) username: Mutex<Option<String>>,
    pub(crate) handlers: Mutex<Option<Handlers>>,
}

impl Shared {
    pub(crate) fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().expect("client state lock poisoned")
    }

    pub(crate) fn own_nick(&self) -> Option<String> {
        self.lock(&self.username).clone()
    }
}

/// Cheap, cloneable handle onto a client, passed to every callback.
///
/// Sends are authorized synchronously against the throttle and then queued to
/// the session task, so calling these from inside a handler cannot deadlock
/// the dispatch loop.
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<Shared>,
}

impl ClientHandle {
    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// The authenticated user's nick, once the profile has been fetched.
    pub fn username(&self) -> Option<String> {
        self.shared.own_nick()
    }

    /// Current throttle escalation factor, for observability.
    pub fn throttle_factor(&self) -> f64 {
        self.shared.throttle.throttle_factor()
    }

    /// Queue a chat message for sending.
    ///
    /// Fails fast without touching the transport when the client is not
    /// connected, sending is not permitted, or the throttle window has not
    /// elapsed. A rejected send never consumes the window.
    pub fn send_chat_message(&self, text: &str) -> Result<(), SendError> {
        let sender = self
            .shared
            .lock(&self.shared.outbound)
            .clone()
            .ok_or(SendError::NotConnected)?;
        self.shared.throttle.authorize_chat(text)?;
        sender
            .send(wire::encode_chat_message(text))
            .map_err(|_| SendError::NotConnected)
    }

    /// Queue a whisper to `target` for sending.
    pub fn send_whisper(&self, target: &str, text: &str) -> Result<(), SendError> {
        let sender = self
            .shared
            .lock(&self.shared.outbound)
            .clone()
            .ok_or(SendError::NotConnected)?;
        self.shared
            .throttle
            .authorize_whisper(target, text, self.shared.own_nick().as_deref())?;
        sender
            .send(wire::encode_whisper(target, text))
            .map_err(|_| SendError::NotConnected)
    }

    /// Request disconnection. The session loop observes the state change,
    /// closes the socket and winds down; safe to call from inside a handler.
    pub fn disconnect(&self) -> Result<(), ConfigError> {
        let requested = self.shared.state.send_if_modified(|state| match state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                *state = ConnectionState::Closing;
                true
            }
            _ => false,
        });
        if requested {
            tracing::info!("disconnect requested");
            Ok(())
        } else {
            Err(ConfigError::NotConnected)
        }
    }

    /// A handle wired to nothing, for exercising callbacks in tests.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let config = ChatConfig::default();
        let throttle = ThrottleGuard::new(&config, Arc::new(SystemClock));
        Self {
            shared: Arc::new(Shared {
                config,
                throttle,
                state: watch::Sender::new(ConnectionState::Disconnected),
                outbound: Mutex::new(None),
                username: Mutex::new(None),
                handlers: Mutex::new(None),
            }),
        }
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("state", &self.state())
            .field("username", &self.username())
            .finish()
    }
}

/// The chat client: owns the configuration, the handler table and the
/// background session task.
pub struct ChatClient {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    api: Arc<dyn ApiAccess>,
    profile: OnceCell<Profile>,
}

impl ChatClient {
    /// Build a client against the live service endpoints.
    pub fn new(config: ChatConfig, handlers: Handlers) -> Result<Self, ConfigError> {
        let connector = Arc::new(WsConnector::new(config.ws_url.clone()));
        let api = Arc::new(HttpApi::new(&config));
        Self::with_collaborators(config, handlers, connector, api, Arc::new(SystemClock))
    }

    /// Build a client with explicit transport, API and clock implementations.
    /// This is the seam tests and alternative backends plug into.
    pub fn with_collaborators(
        config: ChatConfig,
        handlers: Handlers,
        connector: Arc<dyn Connector>,
        api: Arc<dyn ApiAccess>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let throttle = ThrottleGuard::new(&config, clock);
        let shared = Arc::new(Shared {
            config,
            throttle,
            state: watch::Sender::new(ConnectionState::Disconnected),
            outbound: Mutex::new(None),
            username: Mutex::new(None),
            handlers: Mutex::new(Some(handlers)),
        });
        Ok(Self {
            shared,
            connector,
            api,
            profile: OnceCell::new(),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// A handle onto this client, same as the one passed to callbacks.
    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            shared: self.shared.clone(),
        }
    }

    /// Open the websocket and start the session task in the background.
    ///
    /// Connecting while a session is already active is a [`ConfigError`];
    /// the existing session is unaffected.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let started = self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(ConfigError::AlreadyConnected.into());
        }

        // The own nick feeds mention detection and self-whisper rejection;
        // a profile fetch failure degrades those rather than aborting.
        if self.shared.config.auth.can_authenticate()
            && let Err(e) = self.profile().await
        {
            tracing::warn!("could not fetch profile before connecting: {}", e);
        }

        let Some(handlers) = self.shared.lock(&self.shared.handlers).take() else {
            self.shared
                .state
                .send_modify(|state| *state = ConnectionState::Disconnected);
            return Err(ConfigError::AlreadyConnected.into());
        };

        let transport = match self.connector.open(&self.shared.config.auth).await {
            Ok(transport) => transport,
            Err(e) => {
                *self.shared.lock(&self.shared.handlers) = Some(handlers);
                self.shared
                    .state
                    .send_modify(|state| *state = ConnectionState::Disconnected);
                return Err(e.into());
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *self.shared.lock(&self.shared.outbound) = Some(outbound_tx);

        // The session's state receiver must exist before the connected state
        // is published; a receiver subscribed later treats the value current
        // at subscription as already seen, and a disconnect issued in that
        // gap would be lost.
        let state_rx = self.shared.state.subscribe();
        self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });

        let session = Session::new(
            self.shared.clone(),
            self.connector.clone(),
            self.api.clone(),
            handlers,
        );
        tokio::spawn(session.run(transport, outbound_rx, state_rx));
        Ok(())
    }

    /// Wait until the session has fully wound down.
    pub async fn run(&self) {
        let mut state = self.shared.state.subscribe();
        while *state.borrow_and_update() != ConnectionState::Disconnected {
            if state.changed().await.is_err() {
                break;
            }
        }
    }

    /// Connect and block until disconnected.
    pub async fn connect_and_run(&self) -> Result<(), ClientError> {
        self.connect().await?;
        self.run().await;
        Ok(())
    }

    /// Request disconnection of the active session.
    pub fn disconnect(&self) -> Result<(), ConfigError> {
        self.handle().disconnect()
    }

    /// Queue a chat message for sending. See [`ClientHandle::send_chat_message`].
    pub fn send_chat_message(&self, text: &str) -> Result<(), SendError> {
        self.handle().send_chat_message(text)
    }

    /// Queue a whisper for sending. See [`ClientHandle::send_whisper`].
    pub fn send_whisper(&self, target: &str, text: &str) -> Result<(), SendError> {
        self.handle().send_whisper(target, text)
    }

    /// The authenticated user's profile, fetched once and cached.
    pub async fn profile(&self) -> Result<Profile, ApiError> {
        let profile = self
            .profile
            .get_or_try_init(|| async {
                let profile = self.api.user_info().await?;
                *self.shared.lock(&self.shared.username) = Some(profile.nick.clone());
                Ok::<_, ApiError>(profile)
            })
            .await?;
        Ok(profile.clone())
    }

    /// Unread whispers grouped by sender. Fetching marks them as read in the
    /// chat backend.
    pub async fn unread_whispers(
        &self,
    ) -> Result<HashMap<String, Vec<PrivateMessage>>, ApiError> {
        let counts = self.api.unread_counts().await?;
        let mut inbox = HashMap::new();
        for (user, count) in counts {
            let messages = self.api.inbox(&user, count).await?;
            inbox.insert(user, messages);
        }
        Ok(inbox)
    }

    /// Info about the current or last stream.
    pub async fn stream_info(&self) -> Result<StreamInfo, ApiError> {
        self.api.stream_info().await
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("state", &self.state())
            .field("throttle", &self.shared.throttle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::api::MockApiAccess;
    use crate::config::AuthContext;
    use crate::error::TransportError;
    use crate::transport::ChatTransport;

    struct UnreachableConnector;

    #[async_trait::async_trait]
    impl Connector for UnreachableConnector {
        async fn open(
            &self,
            _auth: &AuthContext,
        ) -> Result<Box<dyn ChatTransport>, TransportError> {
            Err(TransportError::Connect("unused in this test".to_string()))
        }
    }

    #[tokio::test]
    async fn test_profile_is_fetched_once_and_cached() {
        // テスト項目: プロフィール取得は一度だけ行われ、以降はキャッシュが返る
        // given (前提条件):
        let mut api = MockApiAccess::new();
        api.expect_user_info().times(1).returning(|| {
            Ok(Profile {
                nick: "alice".to_string(),
                username: None,
                status: None,
                created_date: None,
                features: vec!["subscriber".to_string()],
                roles: Vec::new(),
            })
        });
        let client = ChatClient::with_collaborators(
            ChatConfig::default(),
            Handlers::new(),
            Arc::new(UnreachableConnector),
            Arc::new(api),
            Arc::new(SystemClock),
        )
        .unwrap();

        // when (操作):
        let first = client.profile().await.unwrap();
        let second = client.profile().await.unwrap();

        // then (期待する結果):
        assert_eq!(first.nick, "alice");
        assert!(second.is_subscriber());
        assert_eq!(client.handle().username().as_deref(), Some("alice"));
    }

    #[test]
    fn test_send_while_disconnected_fails() {
        // テスト項目: 未接続状態での送信は NotConnected になる
        // given (前提条件):
        let handle = ClientHandle::detached();

        // when (操作):
        let chat = handle.send_chat_message("hello");
        let whisper = handle.send_whisper("bob", "psst");

        // then (期待する結果):
        assert!(matches!(chat, Err(SendError::NotConnected)));
        assert!(matches!(whisper, Err(SendError::NotConnected)));
    }

    #[test]
    fn test_disconnect_while_disconnected_fails() {
        // テスト項目: 未接続状態での切断要求は NotConnected になる
        // given (前提条件):
        let handle = ClientHandle::detached();

        // when (操作):
        let result = handle.disconnect();

        // then (期待する結果):
        assert!(matches!(result, Err(ConfigError::NotConnected)));
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_moves_connected_to_closing() {
        // テスト項目: 接続中の切断要求で closing に遷移する
        // given (前提条件):
        let handle = ClientHandle::detached();
        handle
            .shared
            .state
            .send_modify(|state| *state = ConnectionState::Connected);

        // when (操作):
        let first = handle.disconnect();
        let second = handle.disconnect();

        // then (期待する結果):
        assert!(first.is_ok());
        assert_eq!(handle.state(), ConnectionState::Closing);
        // closing 状態での再要求は NotConnected になる
        assert!(matches!(second, Err(ConfigError::NotConnected)));
    }

    #[test]
    fn test_connection_state_display() {
        // テスト項目: 状態のラベルが小文字で表示される
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Closing.to_string(), "closing");
    }
}
