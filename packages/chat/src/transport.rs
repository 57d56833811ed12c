//! Transport boundary: how the client talks to the streaming socket.
//!
//! The session loop only ever sees the [`ChatTransport`] and [`Connector`]
//! traits, so tests can substitute an in-memory transport and the websocket
//! details stay contained here.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::config::AuthContext;
use crate::error::TransportError;

/// One raw frame as received from the socket.
pub type RawFrame = String;

/// One open streaming session.
#[async_trait]
pub trait ChatTransport: Send {
    /// Wait for the next text frame. `Ok(None)` means the remote side closed
    /// the connection.
    async fn next_frame(&mut self) -> Result<Option<RawFrame>, TransportError>;

    /// Write one raw payload to the socket.
    async fn send(&mut self, payload: &str) -> Result<(), TransportError>;

    /// Request teardown. Errors during close are not interesting to callers.
    async fn close(&mut self);
}

/// Opens sessions. Separated from the transport so reconnection can reopen
/// with the same credentials.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, auth: &AuthContext) -> Result<Box<dyn ChatTransport>, TransportError>;
}

/// Websocket connector for the live chat service.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, auth: &AuthContext) -> Result<Box<dyn ChatTransport>, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        // The service authenticates the socket with the auth token cookie.
        if let Some(token) = &auth.auth_token {
            let cookie = HeaderValue::from_str(&format!("authtoken={}", token))
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            request.headers_mut().insert(header::COOKIE, cookie);
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::info!(url = %self.url, "websocket connected");
        Ok(Box::new(WsTransport { inner: stream }))
    }
}

/// [`ChatTransport`] over a tungstenite websocket stream.
pub struct WsTransport {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl ChatTransport for WsTransport {
    async fn next_frame(&mut self) -> Result<Option<RawFrame>, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Ping/pong and binary frames are not part of the protocol.
                Some(Ok(other)) => {
                    tracing::debug!("skipping non-text frame: {:?}", other);
                }
                Some(Err(e)) => return Err(TransportError::WebSocket(e.to_string())),
            }
        }
    }

    async fn send(&mut self, payload: &str) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(payload.to_string().into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.inner.close(None).await {
            tracing::debug!("websocket close: {}", e);
        }
    }
}
