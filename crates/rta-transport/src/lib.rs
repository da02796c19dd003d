//! # rta-transport
//!
//! Transport abstraction layer for the RTA subscription client.
//!
//! A transport carries whole [`Frame`](rta_protocol::Frame)s over one ordered,
//! reliable, full-duplex connection:
//!
//! - **WebSocket** - the service endpoint, via tokio-tungstenite
//! - **Memory** - an in-process pair for tests and scripted services
//!
//! ```rust,ignore
//! use rta_transport::{Transport, WebSocketConfig, WebSocketTransport};
//!
//! let transport = WebSocketTransport::connect(WebSocketConfig::default()).await?;
//! while let Some(frame) = transport.recv().await? {
//!     // Process frame
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryPeer, MemoryTransport};
pub use traits::{CloseReason, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
