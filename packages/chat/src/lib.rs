//! Event-driven chat client library.
//!
//! This library connects to the chat websocket, decodes its frames into typed
//! events and dispatches them to registered handlers. Outbound messages pass
//! a local throttle before they reach the socket, mirroring the server-side
//! limits so well-behaved clients rarely see a remote `throttled` error.

// core event pipeline
mod dispatch;
pub mod event;
pub mod handler;
pub mod wire;

// client surface
pub mod api;
pub mod client;
pub mod config;
mod session;
pub mod throttle;
pub mod transport;

// shared library
pub mod error;
pub mod time;

pub use api::{ApiAccess, HttpApi, PrivateMessage, Profile, StreamInfo};
pub use client::{ChatClient, ClientHandle, ConnectionState};
pub use config::{AuthContext, ChatConfig};
pub use error::{
    ApiError, ClientError, ConfigError, DecodeError, HandlerResult, SendError, TransportError,
};
pub use event::{ChatUser, ErrorCode, Event, EventKind, Moderation};
pub use handler::{Callback, Handlers};
pub use throttle::{MAX_MESSAGE_LENGTH, ThrottleGuard};
pub use transport::{ChatTransport, Connector, RawFrame};
