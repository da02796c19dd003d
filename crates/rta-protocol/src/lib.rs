//! # rta-protocol
//!
//! Wire protocol definitions for the real-time activity (RTA) subscription client.
//!
//! Every message exchanged with the service is a single ordered array of
//! structured values. Element 0 is the integer message type; the meaning of the
//! rest depends on that type:
//!
//! - `[1, sequence, resource_uri]` / `[1, sequence, status, ...payload]` - Subscribe
//! - `[2, sequence, subscription_id]` / `[2, sequence, status, ...payload]` - Unsubscribe
//! - `[3, subscription_id, custom]` - Event
//! - `[4, ...]` - Resync
//!
//! ## Example
//!
//! ```rust
//! use rta_protocol::{Codec, Frame};
//!
//! let frame = Frame::subscribe(1, "https://sessiondirectory.xboxlive.com/connections/");
//!
//! let encoded = Codec::Json.encode(&frame).unwrap();
//! let decoded = Codec::Json.decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod envelope;
pub mod frames;
pub mod status;
pub mod version;

pub use codec::{decode, encode, Codec, ProtocolError};
pub use envelope::{decode_field, read_event, read_handshake, read_header, Event, Handshake};
pub use frames::{Frame, MessageType, Operation};
pub use serde_json::Value;
pub use status::Status;
pub use version::{Version, DEFAULT_URL, PROTOCOL_VERSION};
