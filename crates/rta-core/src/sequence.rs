//! Per-operation sequence numbers.

use rta_protocol::Operation;
use std::sync::atomic::{AtomicU32, Ordering};

/// Allocates request sequence numbers, one counter per [`Operation`].
///
/// Counters start at zero and the first value handed out is 1. They wrap
/// after `u32::MAX` requests of the same operation.
#[derive(Debug, Default)]
pub struct Sequences {
    counters: [AtomicU32; Operation::COUNT],
}

impl Sequences {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the next sequence for `op`.
    pub fn next(&self, op: Operation) -> u32 {
        self.counters[op.index()]
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
    }

    /// The last sequence handed out for `op`.
    #[must_use]
    pub fn current(&self, op: Operation) -> u32 {
        self.counters[op.index()].load(Ordering::Relaxed)
    }
}
