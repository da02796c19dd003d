//! Dialing the service over WebSocket.

use rta_transport::{WebSocketConfig, WebSocketTransport};
use tracing::info;

use crate::conn::{Conn, ConnConfig};
use crate::error::Result;

/// Opens WebSocket connections to the service.
///
/// The zero value dials [`DEFAULT_URL`](rta_protocol::DEFAULT_URL) without
/// an authorization header.
#[derive(Debug, Clone, Default)]
pub struct Dialer {
    pub websocket: WebSocketConfig,
    pub conn: ConnConfig,
}

impl Dialer {
    #[must_use]
    pub fn new(websocket: WebSocketConfig, conn: ConnConfig) -> Self {
        Self { websocket, conn }
    }

    /// Set the token sent in the `Authorization` header.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.websocket.token = Some(token.into());
        self
    }

    /// Connect and start the reader loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`](crate::Error::Transport) if the WebSocket
    /// handshake fails or the service negotiates an unsupported subprotocol.
    pub async fn dial(&self) -> Result<Conn> {
        let transport = WebSocketTransport::connect(self.websocket.clone()).await?;
        info!(url = %self.websocket.url, "Connected");
        Ok(Conn::new(transport, self.conn.clone()))
    }
}
