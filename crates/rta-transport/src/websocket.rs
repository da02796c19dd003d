//! WebSocket transport implementation.
//!
//! This module provides a client-side WebSocket transport using tokio-tungstenite.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rta_protocol::{Codec, Frame, ProtocolError, Version, DEFAULT_URL, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        handshake::client::Request,
        http::{
            header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL},
            HeaderValue,
        },
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::traits::{CloseReason, Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Endpoint to dial.
    #[serde(default = "default_url")]
    pub url: String,
    /// Value of the `Authorization` header, sent verbatim.
    #[serde(default)]
    pub token: Option<String>,
    /// Protocol version requested through the subprotocol header.
    #[serde(default)]
    pub version: Version,
    /// Wire encoding.
    #[serde(default)]
    pub codec: Codec,
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MiB
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            token: None,
            version: PROTOCOL_VERSION,
            codec: Codec::default(),
            max_message_size: default_max_message_size(),
        }
    }
}

/// A client WebSocket connection.
///
/// The sink and stream halves are locked independently so a reader parked in
/// `recv` never blocks writers.
pub struct WebSocketTransport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    is_open: AtomicBool,
    codec: Codec,
    max_message_size: usize,
}

impl WebSocketTransport {
    /// Dial the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be built, the handshake fails,
    /// or the server negotiates an incompatible protocol version.
    pub async fn connect(config: WebSocketConfig) -> Result<Self, TransportError> {
        let request = build_request(&config)?;

        let (ws_stream, response) = connect_async(request).await.map_err(|e| {
            error!(url = %config.url, "WebSocket handshake failed: {}", e);
            TransportError::Connect(format!("WebSocket handshake failed: {}", e))
        })?;

        let negotiated = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .and_then(Version::from_subprotocol);
        match negotiated {
            Some(version) if !version.is_compatible_with(&config.version) => {
                return Err(TransportError::Connect(format!(
                    "server negotiated protocol {} (requested {})",
                    version, config.version
                )));
            }
            Some(version) => debug!(%version, "Negotiated protocol version"),
            None => debug!("Server did not echo a subprotocol"),
        }

        info!(url = %config.url, codec = ?config.codec, "WebSocket connected");

        Ok(Self::new(ws_stream, config.codec, config.max_message_size))
    }

    fn new(stream: WsStream, codec: Codec, max_message_size: usize) -> Self {
        let (sink, stream) = stream.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            is_open: AtomicBool::new(true),
            codec,
            max_message_size,
        }
    }

    fn decode(&self, data: &[u8]) -> Result<Frame, TransportError> {
        if data.len() > self.max_message_size {
            warn!(
                "Message too large: {} bytes (max: {})",
                data.len(),
                self.max_message_size
            );
            return Err(TransportError::Protocol(ProtocolError::FrameTooLarge(
                data.len(),
            )));
        }
        Ok(self.codec.decode(data)?)
    }

    fn encode(&self, frame: &Frame) -> Result<Message, TransportError> {
        let data = self.codec.encode(frame)?;
        if self.codec.is_text() {
            let text = String::from_utf8(data.to_vec())
                .map_err(|e| TransportError::Other(format!("Encoded frame is not UTF-8: {}", e)))?;
            Ok(Message::Text(text))
        } else {
            Ok(Message::Binary(data.to_vec()))
        }
    }
}

/// Build the upgrade request with the subprotocol and authorization headers.
fn build_request(config: &WebSocketConfig) -> Result<Request, TransportError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::Connect(format!("Invalid URL {}: {}", config.url, e)))?;

    let headers = request.headers_mut();
    let subprotocol = HeaderValue::from_str(&config.version.subprotocol())
        .map_err(|e| TransportError::Connect(format!("Invalid subprotocol: {}", e)))?;
    headers.insert(SEC_WEBSOCKET_PROTOCOL, subprotocol);

    if let Some(token) = &config.token {
        let value = HeaderValue::from_str(token)
            .map_err(|e| TransportError::Connect(format!("Invalid authorization token: {}", e)))?;
        headers.insert(AUTHORIZATION, value);
    }

    Ok(request)
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let message = self.encode(&frame)?;
        let mut sink = self.sink.lock().await;
        sink.send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&self) -> Result<Option<Frame>, TransportError> {
        let mut stream = self.stream.lock().await;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return self.decode(text.as_bytes()).map(Some),
                Some(Ok(Message::Binary(data))) => return self.decode(&data).map(Some),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    // tungstenite queues the pong reply itself
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Received close frame");
                    self.is_open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    debug!("WebSocket stream ended");
                    self.is_open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    self.is_open.store(false, Ordering::SeqCst);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    async fn close(&self, reason: CloseReason) -> Result<(), TransportError> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(()); // Already closed
        }

        let frame = CloseFrame {
            code: CloseCode::from(reason.code),
            reason: reason.reason.into(),
        };
        let mut sink = self.sink.lock().await;
        match sink.send(Message::Close(Some(frame))).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Other(format!("Failed to close: {}", e))),
        }
    }

    fn name(&self) -> &'static str {
        "websocket"
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}
