//! Client configuration.

use std::time::Duration;

use crate::error::ConfigError;
use crate::throttle::{DEFAULT_CHAT_INTERVAL, DEFAULT_WHISPER_INTERVAL};

/// Default websocket endpoint of the chat service.
pub const DEFAULT_WS_URL: &str = "wss://destiny.gg/ws";

/// Default base URL of the HTTP API.
pub const DEFAULT_API_URL: &str = "https://www.destiny.gg/api";

/// Delay between reconnect attempts after a remote-initiated drop.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Credentials for an authenticated session. Supplied at construction and
/// read-only afterwards.
///
/// The auth token can be created at `https://www.destiny.gg/profile/developer`.
/// The session id currently has to be copied from the browser cookie after
/// logging in; it is only needed for inbox-related endpoints.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub auth_token: Option<String>,
    pub session_id: Option<String>,
}

impl AuthContext {
    /// Whether the context can authenticate a websocket connection at all.
    pub fn can_authenticate(&self) -> bool {
        self.auth_token.is_some() || self.session_id.is_some()
    }

    /// Whether inbox endpoints (which need the session cookie) are usable.
    pub fn has_session(&self) -> bool {
        self.session_id.is_some()
    }
}

/// Client configuration. Construct with `ChatConfig::default()` and override
/// what you need; validated once when the client is built.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub auth: AuthContext,

    /// Check that the auth token is a 64 character alphanumeric string.
    /// Only disable this if the service changes how tokens are generated.
    pub validate_auth_token: bool,

    /// Safety default: sending chat messages is off even with valid auth.
    pub enable_chat_sending: bool,

    /// Lift the reply-only whisper policy and allow arbitrary targets.
    pub enable_whisper_to_anyone: bool,

    /// Replay the most recent chat history through the handlers on connect.
    pub handle_history: bool,

    /// Replay unread whispers through the handlers on connect.
    /// Requires a session id.
    pub handle_unread_whispers: bool,

    /// Mark a whisper as read in the chat backend after it was handled.
    /// Requires a session id.
    pub mark_whispers_as_read: bool,

    /// Minimum interval between accepted chat sends.
    pub chat_interval: Duration,

    /// Minimum interval between accepted whisper sends, per target.
    pub whisper_interval: Duration,

    /// How many times to reopen the transport after a remote-initiated drop.
    /// Zero disables reconnection; caller-initiated disconnects never reconnect.
    pub reconnect_attempts: u32,

    pub reconnect_delay: Duration,

    pub ws_url: String,

    pub api_url: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            auth: AuthContext::default(),
            validate_auth_token: true,
            enable_chat_sending: false,
            enable_whisper_to_anyone: false,
            handle_history: false,
            handle_unread_whispers: false,
            mark_whispers_as_read: false,
            chat_interval: DEFAULT_CHAT_INTERVAL,
            whisper_interval: DEFAULT_WHISPER_INTERVAL,
            reconnect_attempts: 0,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            ws_url: DEFAULT_WS_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }
}

impl ChatConfig {
    /// Validate the configuration. Called once at client construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validate_auth_token
            && let Some(token) = &self.auth.auth_token
            && !auth_token_is_valid(token)
        {
            return Err(ConfigError::InvalidAuthToken);
        }
        Ok(())
    }
}

/// Tokens issued by the service are 64 character alphanumeric strings.
pub fn auth_token_is_valid(token: &str) -> bool {
    token.len() == 64 && token.chars().all(|c| c.is_ascii_alphanumeric())
}
