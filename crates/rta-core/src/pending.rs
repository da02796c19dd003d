//! Pending-handshake table.
//!
//! Correlates handshake responses read by the reader loop with the callers
//! waiting for them. Each in-flight request owns one capacity-1 slot keyed by
//! (operation, sequence). The slot is registered before the request is
//! written, so a response can never arrive ahead of its waiter.

use dashmap::DashMap;
use rta_protocol::{Handshake, Operation};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

/// Outcome of handing a response to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The waiter's slot received the response.
    Delivered,
    /// No waiter is registered for this sequence (released or never sent).
    Unmatched,
    /// The slot already holds a response; this one was dropped.
    Duplicate,
}

/// A registered waiter's sending half, tagged with the slot that owns it.
struct Waiter {
    token: u64,
    tx: mpsc::Sender<Handshake>,
}

/// Waiters for in-flight handshakes, one map per operation.
pub struct PendingHandshakes {
    tables: [DashMap<u32, Waiter>; Operation::COUNT],
    tokens: AtomicU64,
}

impl PendingHandshakes {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: std::array::from_fn(|_| DashMap::new()),
            tokens: AtomicU64::new(0),
        }
    }

    /// Register a waiter for (`op`, `sequence`).
    ///
    /// The entry lives until the returned slot is dropped or [`release`] is
    /// called, whichever happens first.
    ///
    /// [`release`]: PendingHandshakes::release
    pub fn register(&self, op: Operation, sequence: u32) -> PendingSlot<'_> {
        let (tx, rx) = mpsc::channel(1);
        let token = self.tokens.fetch_add(1, Ordering::Relaxed);
        if self.tables[op.index()]
            .insert(sequence, Waiter { token, tx })
            .is_some()
        {
            // Only reachable after the sequence counter wrapped.
            warn!(%op, sequence, "Replaced a waiter that was never released");
        }
        PendingSlot {
            table: self,
            op,
            sequence,
            token,
            rx,
        }
    }

    /// Hand a response to its waiter without blocking.
    pub fn deliver(&self, op: Operation, handshake: Handshake) -> Delivery {
        let Some(waiter) = self.tables[op.index()].get(&handshake.sequence) else {
            return Delivery::Unmatched;
        };
        match waiter.tx.try_send(handshake) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Duplicate,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Unmatched,
        }
    }

    /// Remove the entry for (`op`, `sequence`).
    ///
    /// Returns `true` if an entry was present.
    pub fn release(&self, op: Operation, sequence: u32) -> bool {
        self.tables[op.index()].remove(&sequence).is_some()
    }

    /// Remove the entry for (`op`, `sequence`) only if `token` still owns it.
    fn release_owned(&self, op: Operation, sequence: u32, token: u64) -> bool {
        self.tables[op.index()]
            .remove_if(&sequence, |_, waiter| waiter.token == token)
            .is_some()
    }

    /// Number of registered waiters for `op`.
    #[must_use]
    pub fn len(&self, op: Operation) -> usize {
        self.tables[op.index()].len()
    }

    /// Whether no waiter is registered for any operation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|table| table.is_empty())
    }
}

impl Default for PendingHandshakes {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered waiter. Dropping it releases the table entry.
pub struct PendingSlot<'a> {
    table: &'a PendingHandshakes,
    op: Operation,
    sequence: u32,
    token: u64,
    rx: mpsc::Receiver<Handshake>,
}

impl PendingSlot<'_> {
    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Wait for the response.
    ///
    /// Returns `None` only if the entry was released from elsewhere.
    pub async fn recv(&mut self) -> Option<Handshake> {
        self.rx.recv().await
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        // A newer waiter may have taken over this sequence after wraparound.
        self.table.release_owned(self.op, self.sequence, self.token);
    }
}
