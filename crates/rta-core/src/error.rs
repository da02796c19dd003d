//! Error types returned to callers of [`Conn`](crate::Conn).

use rta_protocol::{Handshake, ProtocolError};
use rta_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Result alias for connection operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by subscribe, unsubscribe and close.
#[derive(Debug, Error)]
pub enum Error {
    /// The handshake response was malformed: too few values or a value of
    /// the wrong type.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The service answered with a non-OK status.
    #[error("unexpected status code {code}{}", message_suffix(.message))]
    UnexpectedStatus { code: i32, message: Option<String> },

    /// The caller's cancellation future resolved first.
    #[error("handshake cancelled")]
    Cancelled,

    /// No response within the configured handshake timeout.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The connection was closed before or while waiting.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport failed to write the request.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl Error {
    pub(crate) fn unexpected_status(handshake: &Handshake) -> Self {
        Error::UnexpectedStatus {
            code: handshake.status.code(),
            message: handshake.message(),
        }
    }

    /// Whether the error means the connection can no longer be used.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed)
    }
}

fn message_suffix(message: &Option<String>) -> String {
    match message {
        Some(message) => format!(": {}", message),
        None => String::new(),
    }
}
