//! # rta-core
//!
//! Subscription multiplexing for the real-time activity (RTA) client.
//!
//! One [`Conn`] carries any number of subscriptions over a single transport:
//!
//! - **Sequences** - per-operation request numbering
//! - **Pending** - correlates handshake responses with their waiters
//! - **Registry** - routes events to subscriptions by ID
//! - **Reader** - the single task that owns the inbound side
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  request   ┌─────────────┐
//! │   Caller    │───────────▶│  Transport  │
//! └─────────────┘            └─────────────┘
//!        ▲                          │
//!        │ response                 ▼
//! ┌─────────────┐            ┌─────────────┐     ┌──────────────┐
//! │   Pending   │◀───────────│   Reader    │────▶│   Registry   │──▶ handler
//! └─────────────┘            └─────────────┘     └──────────────┘
//! ```

pub mod conn;
pub mod error;
pub mod pending;
mod reader;
pub mod registry;
pub mod sequence;
pub mod subscription;

#[cfg(feature = "websocket")]
pub mod dialer;

pub use conn::{Conn, ConnConfig};
pub use error::{Error, Result};
pub use pending::{Delivery, PendingHandshakes};
pub use registry::SubscriptionRegistry;
pub use sequence::Sequences;
pub use subscription::{Subscription, SubscriptionHandler};

#[cfg(feature = "websocket")]
pub use dialer::Dialer;

pub use rta_protocol::{Operation, Status, Value};
