//! Transport abstraction traits for RTA.
//!
//! A transport moves whole frames in both directions over one ordered,
//! reliable connection. The client never sees bytes or partial messages.

use async_trait::async_trait;
use rta_protocol::{Frame, ProtocolError};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to establish the connection.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// A single message could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether the connection is unusable after this error.
    ///
    /// Protocol errors affect one message only; the stream itself is intact.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Protocol(_))
    }
}

/// Code and reason sent with a close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;

    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Normal closure with an empty reason.
    #[must_use]
    pub fn normal() -> Self {
        Self::new(Self::NORMAL, "")
    }
}

impl Default for CloseReason {
    fn default() -> Self {
        Self::normal()
    }
}

/// A message-framed duplex connection.
///
/// `send` may be called from many tasks at once and must not interleave
/// frames. `recv` is only ever called by one reader at a time.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a frame.
    async fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Receive the next frame.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&self) -> Result<Option<Frame>, TransportError>;

    /// Close the connection.
    async fn close(&self, reason: CloseReason) -> Result<(), TransportError>;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}
