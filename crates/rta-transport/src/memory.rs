//! In-memory transport.
//!
//! [`pair`] returns a client-side [`MemoryTransport`] and the [`MemoryPeer`]
//! that plays the service. Useful for tests and for embedding a scripted
//! service in-process.

use async_trait::async_trait;
use rta_protocol::Frame;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;

use crate::traits::{CloseReason, Transport, TransportError};

/// Create a connected transport/peer pair.
#[must_use]
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (to_peer, from_client) = mpsc::unbounded_channel();
    let (to_client, from_peer) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);
    let close_calls = Arc::new(AtomicUsize::new(0));

    let transport = MemoryTransport {
        outbound: to_peer,
        inbound: Mutex::new(from_peer),
        closed: closed_tx,
        close_calls: Arc::clone(&close_calls),
    };
    let peer = MemoryPeer {
        outbound: to_client,
        inbound: from_client,
        closed: closed_rx,
        close_calls,
    };
    (transport, peer)
}

/// Client side of an in-memory connection.
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<Frame>,
    inbound: Mutex<mpsc::UnboundedReceiver<Result<Frame, TransportError>>>,
    closed: watch::Sender<bool>,
    close_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<Option<Frame>, TransportError> {
        let mut inbound = self.inbound.lock().await;
        let mut closed = self.closed.subscribe();

        tokio::select! {
            item = inbound.recv() => item.transpose(),
            _ = closed.wait_for(|closed| *closed) => Ok(None),
        }
    }

    async fn close(&self, reason: CloseReason) -> Result<(), TransportError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        debug!(code = reason.code, reason = %reason.reason, "Memory transport closed");
        self.closed.send_replace(true);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }
}

/// Service side of an in-memory connection.
pub struct MemoryPeer {
    outbound: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    inbound: mpsc::UnboundedReceiver<Frame>,
    closed: watch::Receiver<bool>,
    close_calls: Arc<AtomicUsize>,
}

impl MemoryPeer {
    /// Deliver a frame to the client.
    ///
    /// Returns `false` if the client transport is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.outbound.send(Ok(frame)).is_ok()
    }

    /// Make the client's next `recv` fail with `error`.
    pub fn send_error(&self, error: TransportError) -> bool {
        self.outbound.send(Err(error)).is_ok()
    }

    /// Next frame written by the client, or `None` once the client closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        tokio::select! {
            biased;
            frame = self.inbound.recv() => frame,
            _ = self.closed.wait_for(|closed| *closed) => None,
        }
    }

    /// How many times the client called `close`.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Whether the client has closed its side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}
