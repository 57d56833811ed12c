//! Error types for the chat client.

use std::time::Duration;

use thiserror::Error;

use crate::throttle::MAX_MESSAGE_LENGTH;

/// Configuration and usage errors, surfaced synchronously at the point of
/// misuse and never deferred to the event loop.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The auth token does not look like a token issued by the service.
    #[error(
        "invalid auth token: expected a 64 character alphanumeric string \
         (set `validate_auth_token` to false to skip this check)"
    )]
    InvalidAuthToken,

    /// A named handler does not match the `on_*` naming convention.
    #[error("handler `{0}` does not match any known event handler name")]
    UnknownHandlerName(String),

    /// An explicit mapping left out a handler the implementer supplied.
    #[error("handler `{0}` was supplied but is not referenced by the mapping")]
    UnmappedHandler(String),

    /// An explicit mapping references a handler that was never supplied.
    #[error("mapping references handler `{0}` which was not supplied")]
    MissingHandler(String),

    /// `connect` was called while a session is already active.
    #[error("chat is already connected, call `disconnect()` first")]
    AlreadyConnected,

    /// `disconnect` (or a send) was attempted without an active session.
    #[error("chat is not connected")]
    NotConnected,
}

/// Failures returned directly from `send_chat_message` / `send_whisper`.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("not authenticated: an auth token is required to send")]
    NotAuthenticated,

    /// Chat sending is an opt-in capability, disabled by default.
    #[error("chat sending is disabled; set `enable_chat_sending` to allow it")]
    ChatSendingDisabled,

    /// Reply-only whisper policy: the target has not whispered first.
    #[error(
        "whispers to `{0}` are not permitted: they have not whispered you \
         this session (set `enable_whisper_to_anyone` to lift this)"
    )]
    WhisperNotPermitted(String),

    #[error("you can't whisper yourself")]
    SelfWhisper,

    #[error("message length must be in the inclusive range [1, {MAX_MESSAGE_LENGTH}]")]
    InvalidMessage,

    /// Rejected by the local throttle window, before touching the transport.
    #[error("send throttled locally, retry in {retry_in:?}")]
    Throttled { retry_in: Duration },

    #[error("chat is not connected")]
    NotConnected,
}

/// Transport-level failures. These never cross the dispatch loop as errors;
/// the loop converts them into socket-error / socket-closed events.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// A frame that could not be decoded into an event. Never fatal: the session
/// routes it to handler-error and keeps going.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty frame")]
    EmptyFrame,

    #[error("unknown frame tag `{0}`")]
    UnknownTag(String),

    #[error("bad `{tag}` payload: {source}")]
    BadPayload {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures from the HTTP API collaborator.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}: no auth token provided")]
    AnonymousConnection(&'static str),

    #[error("{0}: no session id provided")]
    AnonymousSession(&'static str),

    #[error("api call to `{endpoint}` failed with status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("api request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Umbrella error for facade operations that touch several concerns.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// What a handler returns. An `Err` is captured at the dispatch boundary and
/// converted into a handler-error event instead of unwinding the loop.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
