//! Codec for encoding and decoding RTA frames.
//!
//! The service speaks JSON arrays in text messages. MessagePack is supported
//! for binary peers; both encode a frame as a single top-level array.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding, decoding or envelope parsing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The frame holds fewer values than required.
    ///
    /// `payload` is what remained at the point of reading and `index` is the
    /// position that was expected to exist.
    #[error("index out of range [{index}] with length {}", .payload.len())]
    InsufficientPayload { payload: Vec<Value>, index: usize },

    /// A value could not be decoded into its expected type.
    #[error("decode {field}: {source}")]
    Field {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Message type not known to this client.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u32),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Wire encoding used by a transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// JSON arrays, carried in text messages.
    #[default]
    Json,
    /// MessagePack arrays, carried in binary messages.
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl Codec {
    /// Whether encoded frames are UTF-8 text.
    #[must_use]
    pub const fn is_text(self) -> bool {
        matches!(self, Codec::Json)
    }

    /// Encode a frame to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or encoding fails.
    pub fn encode(self, frame: &Frame) -> Result<Bytes, ProtocolError> {
        let payload = match self {
            Codec::Json => serde_json::to_vec(frame)?,
            Codec::MessagePack => rmp_serde::to_vec(frame)?,
        };

        if payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(payload.len()));
        }

        Ok(Bytes::from(payload))
    }

    /// Decode a frame from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is too large or is not an array of values.
    pub fn decode(self, data: &[u8]) -> Result<Frame, ProtocolError> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(data.len()));
        }

        let frame = match self {
            Codec::Json => serde_json::from_slice(data)?,
            Codec::MessagePack => rmp_serde::from_slice(data)?,
        };
        Ok(frame)
    }
}

/// Encode a frame with the default (JSON) codec.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    Codec::default().encode(frame)
}

/// Decode a frame with the default (JSON) codec.
///
/// # Errors
///
/// Returns an error if the data is invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    Codec::default().decode(data)
}
