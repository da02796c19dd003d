//! Frame types for the RTA protocol.
//!
//! A frame is an ordered array of values. Only element 0, the message type,
//! has a fixed meaning; everything else is interpreted per type by
//! [`crate::envelope`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::codec::ProtocolError;
use crate::status::Status;

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    Subscribe = 1,
    Unsubscribe = 2,
    Event = 3,
    Resync = 4,
}

impl From<MessageType> for u32 {
    fn from(mt: MessageType) -> u32 {
        mt as u32
    }
}

impl TryFrom<u32> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Subscribe),
            2 => Ok(MessageType::Unsubscribe),
            3 => Ok(MessageType::Event),
            4 => Ok(MessageType::Resync),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// A handshake operation.
///
/// Each operation numbers its requests independently, so subscribe sequence 5
/// and unsubscribe sequence 5 never refer to the same exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Subscribe,
    Unsubscribe,
}

impl Operation {
    /// All operations, in index order.
    pub const ALL: [Operation; 2] = [Operation::Subscribe, Operation::Unsubscribe];

    /// Number of distinct operations.
    pub const COUNT: usize = Self::ALL.len();

    /// Dense index for per-operation tables.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Operation::Subscribe => 0,
            Operation::Unsubscribe => 1,
        }
    }

    /// The message type used on the wire for this operation.
    #[must_use]
    pub const fn message_type(self) -> MessageType {
        match self {
            Operation::Subscribe => MessageType::Subscribe,
            Operation::Unsubscribe => MessageType::Unsubscribe,
        }
    }

    /// The operation a handshake response of this type belongs to.
    #[must_use]
    pub const fn from_message_type(mt: MessageType) -> Option<Self> {
        match mt {
            MessageType::Subscribe => Some(Operation::Subscribe),
            MessageType::Unsubscribe => Some(Operation::Unsubscribe),
            MessageType::Event | MessageType::Resync => None,
        }
    }

    /// Lowercase name, used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::Subscribe => "subscribe",
            Operation::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol frame: one complete message on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frame(pub Vec<Value>);

impl Frame {
    /// Wrap raw values as a frame.
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Create a handshake request: `[type, sequence, ...args]`.
    #[must_use]
    pub fn request(op: Operation, sequence: u32, args: impl IntoIterator<Item = Value>) -> Self {
        let mut values = vec![
            Value::from(u32::from(op.message_type())),
            Value::from(sequence),
        ];
        values.extend(args);
        Self(values)
    }

    /// Create a Subscribe request.
    #[must_use]
    pub fn subscribe(sequence: u32, resource_uri: impl Into<String>) -> Self {
        Self::request(
            Operation::Subscribe,
            sequence,
            [Value::String(resource_uri.into())],
        )
    }

    /// Create an Unsubscribe request.
    #[must_use]
    pub fn unsubscribe(sequence: u32, subscription_id: u32) -> Self {
        Self::request(
            Operation::Unsubscribe,
            sequence,
            [Value::from(subscription_id)],
        )
    }

    /// Create a handshake response: `[type, sequence, status, ...payload]`.
    #[must_use]
    pub fn handshake_response(
        op: Operation,
        sequence: u32,
        status: Status,
        payload: impl IntoIterator<Item = Value>,
    ) -> Self {
        let mut values = vec![
            Value::from(u32::from(op.message_type())),
            Value::from(sequence),
            Value::from(status.code()),
        ];
        values.extend(payload);
        Self(values)
    }

    /// Create an Event frame.
    #[must_use]
    pub fn event(subscription_id: u32, custom: Value) -> Self {
        Self(vec![
            Value::from(u32::from(MessageType::Event)),
            Value::from(subscription_id),
            custom,
        ])
    }

    /// Create a Resync frame.
    #[must_use]
    pub fn resync() -> Self {
        Self(vec![Value::from(u32::from(MessageType::Resync))])
    }

    /// Borrow the values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Take ownership of the values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    /// Number of values in the frame.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the frame carries no values at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Value>> for Frame {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}
