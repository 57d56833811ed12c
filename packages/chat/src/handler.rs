//! Handler registration table.
//!
//! Events are dispatched against an explicit table from [`EventKind`] to an
//! ordered list of callbacks, built once at construction time. Most consumers
//! register through the chained `on_*` methods; name-based and explicit-mapping
//! construction exist for code that assembles its handlers dynamically, with
//! coverage checked up front instead of failing at the first event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::client::ClientHandle;
use crate::error::{ConfigError, HandlerResult};
use crate::event::{Event, EventKind};

/// A registered callback. Invoked strictly sequentially by the dispatch loop,
/// so it never runs concurrently with other handlers of the same client.
pub type Callback = Box<dyn FnMut(&ClientHandle, &Event) -> HandlerResult + Send>;

/// Ordered handler lists per event kind.
#[derive(Default)]
pub struct Handlers {
    map: HashMap<EventKind, Vec<Callback>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback to a kind's list. Callbacks run in registration order.
    pub fn register<F>(&mut self, kind: EventKind, callback: F)
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.map.entry(kind).or_default().push(Box::new(callback));
    }

    /// Chainable form of [`register`](Self::register).
    pub fn on<F>(mut self, kind: EventKind, callback: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.register(kind, callback);
        self
    }

    /// Build a table from `(name, callback)` pairs using the `on_*` naming
    /// convention. A name that matches no event kind is a configuration error.
    pub fn from_named<I>(named: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, Callback)>,
    {
        let mut handlers = Self::new();
        for (name, callback) in named {
            let kind = EventKind::from_handler_name(&name)
                .ok_or(ConfigError::UnknownHandlerName(name))?;
            handlers.map.entry(kind).or_default().push(callback);
        }
        Ok(handlers)
    }

    /// Build a table from named callbacks plus an explicit kind-to-names
    /// mapping, overriding the naming convention entirely.
    ///
    /// Coverage is validated here, once: every supplied callback must be
    /// referenced by the mapping (no silently dropped handler), and every
    /// referenced name must have been supplied.
    pub fn from_mapping<I, M>(named: I, mapping: M) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, Callback)>,
        M: IntoIterator<Item = (EventKind, Vec<String>)>,
    {
        // A callback may be referenced from several kinds, so each one is
        // shared behind a mutex and re-boxed per reference.
        type Shared = Arc<Mutex<Callback>>;

        let mut supplied: HashMap<String, Shared> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for (name, callback) in named {
            order.push(name.clone());
            supplied.insert(name, Arc::new(Mutex::new(callback)));
        }

        let mut referenced: Vec<String> = Vec::new();
        let mut handlers = Self::new();
        for (kind, names) in mapping {
            for name in names {
                let shared = supplied
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| ConfigError::MissingHandler(name.clone()))?;
                referenced.push(name);
                handlers.register(kind, move |handle, event| match shared.lock() {
                    Ok(mut callback) => callback(handle, event),
                    Err(_) => Err("handler unavailable: poisoned by an earlier panic".into()),
                });
            }
        }

        for name in order {
            if !referenced.contains(&name) {
                return Err(ConfigError::UnmappedHandler(name));
            }
        }

        Ok(handlers)
    }

    /// Number of callbacks registered for a kind. Unregistered kinds are zero;
    /// events for them are silently ignored by design.
    pub fn count(&self, kind: EventKind) -> usize {
        self.map.get(&kind).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.map.values().all(Vec::is_empty)
    }

    pub(crate) fn callbacks_mut(&mut self, kind: EventKind) -> Option<&mut Vec<Callback>> {
        self.map.get_mut(&kind)
    }

    // Convenience registration, one method per event kind.

    pub fn on_served_connections<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::ServedConnections, f)
    }

    pub fn on_user_joined<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::UserJoined, f)
    }

    pub fn on_user_quit<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::UserQuit, f)
    }

    /// Broadcasts are the service-wide announcements, such as subscriptions.
    pub fn on_broadcast<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::Broadcast, f)
    }

    pub fn on_chat_message<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::ChatMessage, f)
    }

    pub fn on_whisper<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::Whisper, f)
    }

    /// Confirmation that a whisper went through.
    pub fn on_whisper_sent<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::WhisperSent, f)
    }

    pub fn on_mute<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::Mute, f)
    }

    pub fn on_unmute<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::Unmute, f)
    }

    pub fn on_ban<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::Ban, f)
    }

    pub fn on_unban<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::Unban, f)
    }

    pub fn on_sub_only<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::SubOnly, f)
    }

    /// Remote-reported errors (throttled, duplicate, ...). These arrive as
    /// ordinary events, not as failures of the send call.
    pub fn on_error_message<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::ErrorMessage, f)
    }

    /// Called for every decoded event, after its kind-specific handlers.
    pub fn on_any_message<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::AnyMessage, f)
    }

    /// Called when a chat message contains the authenticated user's nick.
    /// The chat-message handlers still run first.
    pub fn on_mention<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::Mention, f)
    }

    pub fn on_socket_error<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::SocketError, f)
    }

    pub fn on_socket_closed<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::SocketClosed, f)
    }

    /// Called when any handler returns an error. Failures raised here are
    /// dropped to guarantee forward progress of the loop.
    pub fn on_handler_error<F>(self, f: F) -> Self
    where
        F: FnMut(&ClientHandle, &Event) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::HandlerError, f)
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut counts: Vec<(EventKind, usize)> = self
            .map
            .iter()
            .map(|(kind, callbacks)| (*kind, callbacks.len()))
            .collect();
        counts.sort_by_key(|(kind, _)| format!("{:?}", kind));
        f.debug_struct("Handlers").field("counts", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientHandle;

    fn noop() -> Callback {
        Box::new(|_, _| Ok(()))
    }

    #[test]
    fn test_register_preserves_order_and_count() {
        // テスト項目: 同一種別への複数登録が登録順で保持される
        // given (前提条件):
        let handlers = Handlers::new()
            .on_chat_message(|_, _| Ok(()))
            .on_chat_message(|_, _| Ok(()))
            .on_whisper(|_, _| Ok(()));

        // when (操作) / then (期待する結果):
        assert_eq!(handlers.count(EventKind::ChatMessage), 2);
        assert_eq!(handlers.count(EventKind::Whisper), 1);
        assert_eq!(handlers.count(EventKind::Broadcast), 0);
    }

    #[test]
    fn test_from_named_resolves_conventional_names() {
        // テスト項目: 命名規約に従った名前が対応する種別に解決される
        // given (前提条件):
        let named = vec![
            ("on_chat_message".to_string(), noop()),
            ("on_any_message".to_string(), noop()),
            ("on_handler_error".to_string(), noop()),
        ];

        // when (操作):
        let handlers = Handlers::from_named(named).unwrap();

        // then (期待する結果):
        assert_eq!(handlers.count(EventKind::ChatMessage), 1);
        assert_eq!(handlers.count(EventKind::AnyMessage), 1);
        assert_eq!(handlers.count(EventKind::HandlerError), 1);
    }

    #[test]
    fn test_from_named_rejects_unknown_name() {
        // テスト項目: 規約に合わない名前は起動時に ConfigError になる
        // given (前提条件):
        let named = vec![("on_emote_spam".to_string(), noop())];

        // when (操作):
        let result = Handlers::from_named(named);

        // then (期待する結果):
        assert!(
            matches!(result, Err(ConfigError::UnknownHandlerName(name)) if name == "on_emote_spam")
        );
    }

    #[test]
    fn test_from_mapping_accepts_complete_coverage() {
        // テスト項目: 全ハンドラを参照する明示的マッピングが受理される
        // given (前提条件):
        let named = vec![
            ("log".to_string(), noop()),
            ("greet".to_string(), noop()),
        ];
        let mapping = vec![
            (
                EventKind::ChatMessage,
                vec!["log".to_string(), "greet".to_string()],
            ),
            (EventKind::Whisper, vec!["log".to_string()]),
        ];

        // when (操作):
        let handlers = Handlers::from_mapping(named, mapping).unwrap();

        // then (期待する結果):
        assert_eq!(handlers.count(EventKind::ChatMessage), 2);
        assert_eq!(handlers.count(EventKind::Whisper), 1);
    }

    #[test]
    fn test_from_mapping_rejects_unreferenced_handler() {
        // テスト項目: 供給されたがマッピングに現れないハンドラは ConfigError になる
        // given (前提条件):
        let named = vec![
            ("log".to_string(), noop()),
            ("forgotten".to_string(), noop()),
        ];
        let mapping = vec![(EventKind::ChatMessage, vec!["log".to_string()])];

        // when (操作):
        let result = Handlers::from_mapping(named, mapping);

        // then (期待する結果):
        assert!(matches!(result, Err(ConfigError::UnmappedHandler(name)) if name == "forgotten"));
    }

    #[test]
    fn test_from_mapping_rejects_missing_handler() {
        // テスト項目: 供給されていない名前を参照するマッピングは ConfigError になる
        // given (前提条件):
        let named = vec![("log".to_string(), noop())];
        let mapping = vec![(
            EventKind::ChatMessage,
            vec!["log".to_string(), "ghost".to_string()],
        )];

        // when (操作):
        let result = Handlers::from_mapping(named, mapping);

        // then (期待する結果):
        assert!(matches!(result, Err(ConfigError::MissingHandler(name)) if name == "ghost"));
    }

    #[test]
    fn test_shared_mapping_callback_is_invocable_from_both_kinds() {
        // テスト項目: 複数種別から参照されたハンドラがそれぞれの種別で呼び出せる
        // given (前提条件):
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = calls.clone();
        let named: Vec<(String, Callback)> = vec![(
            "count".to_string(),
            Box::new(move |_, _| {
                calls_in.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )];
        let mapping = vec![
            (EventKind::ChatMessage, vec!["count".to_string()]),
            (EventKind::Whisper, vec!["count".to_string()]),
        ];
        let mut handlers = Handlers::from_mapping(named, mapping).unwrap();
        let handle = ClientHandle::detached();
        let event = Event::WhisperSent;

        // when (操作):
        for kind in [EventKind::ChatMessage, EventKind::Whisper] {
            for callback in handlers.callbacks_mut(kind).unwrap() {
                callback(&handle, &event).unwrap();
            }
        }

        // then (期待する結果):
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
