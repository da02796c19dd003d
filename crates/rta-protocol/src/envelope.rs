//! Envelope parsing.
//!
//! Turns the loosely typed values of a [`Frame`](crate::Frame) into the typed
//! pieces the client dispatches on. Every reader reports the missing index and
//! the remaining values when a frame is too short, and names the field when a
//! value has the wrong type.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::codec::ProtocolError;
use crate::status::Status;

/// A decoded handshake response.
#[derive(Debug, Clone, PartialEq)]
pub struct Handshake {
    /// Sequence number echoed from the request.
    pub sequence: u32,
    /// Result of the operation.
    pub status: Status,
    /// Values following the status.
    pub payload: Vec<Value>,
}

impl Handshake {
    /// Human-readable message from the first payload value, if it is a string.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        self.payload
            .first()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// A decoded event notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Subscription the event belongs to.
    pub subscription_id: u32,
    /// Opaque event body.
    pub custom: Value,
}

/// Decode a single value into `T`, naming `field` on failure.
///
/// # Errors
///
/// Returns [`ProtocolError::Field`] if the value has the wrong shape.
pub fn decode_field<T: DeserializeOwned>(field: &'static str, value: &Value) -> Result<T, ProtocolError> {
    T::deserialize(value).map_err(|source| ProtocolError::Field { field, source })
}

/// Decode the message type from element 0 of a frame.
///
/// # Errors
///
/// Returns an error if the frame is empty or element 0 is not an unsigned integer.
pub fn read_header(values: &[Value]) -> Result<u32, ProtocolError> {
    match values.first() {
        Some(value) => decode_field("message type", value),
        None => Err(ProtocolError::InsufficientPayload {
            payload: Vec::new(),
            index: 0,
        }),
    }
}

/// Decode a handshake response from the values following the message type.
///
/// # Errors
///
/// Returns an error if fewer than two values remain or the sequence/status
/// cannot be decoded.
pub fn read_handshake(values: Vec<Value>) -> Result<Handshake, ProtocolError> {
    if values.len() < 2 {
        return Err(ProtocolError::InsufficientPayload {
            payload: values,
            index: 2,
        });
    }
    let sequence = decode_field("sequence", &values[0])?;
    let status = decode_field::<i32>("status code", &values[1])?;
    let payload = values.into_iter().skip(2).collect();
    Ok(Handshake {
        sequence,
        status: Status(status),
        payload,
    })
}

/// Decode an event from the values following the message type.
///
/// # Errors
///
/// Returns an error if the custom payload is missing or the subscription ID
/// cannot be decoded.
pub fn read_event(values: Vec<Value>) -> Result<Event, ProtocolError> {
    if values.len() < 2 {
        return Err(ProtocolError::InsufficientPayload {
            payload: values,
            index: 1,
        });
    }
    let subscription_id = decode_field("subscription ID", &values[0])?;
    let custom = values.into_iter().nth(1).unwrap_or(Value::Null);
    Ok(Event {
        subscription_id,
        custom,
    })
}
