//! The reader loop.
//!
//! One task per connection owns the inbound side of the transport. It decodes
//! only the message type of each frame and hands the rest to a freshly
//! spawned task, so neither a slow handler nor a burst of responses can hold
//! up the next read.

use rta_protocol::{read_event, read_handshake, read_header, MessageType, Operation, ProtocolError, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::conn::Inner;
use crate::pending::Delivery;

/// Start the reader loop for `inner`.
pub(crate) fn spawn(inner: Arc<Inner>) -> JoinHandle<()> {
    tokio::spawn(run(inner))
}

async fn run(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown_signal();

    loop {
        let received = tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => break,
            received = inner.transport.recv() => received,
        };

        let frame = match received {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("Connection closed by peer");
                break;
            }
            Err(e) if !e.is_fatal() => {
                error!(error = %e, "Dropping undecodable message");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Error reading from transport");
                break;
            }
        };

        let mut values = frame.into_values();
        let typ = match read_header(&values) {
            Ok(typ) => typ,
            Err(e) => {
                error!(error = %e, "Error reading header");
                continue;
            }
        };
        let payload = values.split_off(1);

        let inner = Arc::clone(&inner);
        tokio::spawn(async move { handle_message(&inner, typ, payload) });
    }

    if let Err(e) = inner.close().await {
        debug!(error = %e, "Error closing transport after reader exit");
    }
}

/// Handle one message whose header has already been read.
fn handle_message(inner: &Inner, typ: u32, payload: Vec<Value>) {
    let message_type = match MessageType::try_from(typ) {
        Ok(message_type) => message_type,
        Err(_) => {
            debug!(message_type = typ, "Received an unexpected message");
            return;
        }
    };

    if let Some(op) = Operation::from_message_type(message_type) {
        deliver_handshake(inner, op, payload);
        return;
    }

    match message_type {
        MessageType::Event => dispatch_event(inner, payload),
        MessageType::Resync => {
            // Subscriptions are not replayed; the caller decides whether to reconnect.
            info!("Service requested a resync");
        }
        // Handled above.
        MessageType::Subscribe | MessageType::Unsubscribe => {}
    }
}

fn deliver_handshake(inner: &Inner, op: Operation, payload: Vec<Value>) {
    let handshake = match read_handshake(payload) {
        Ok(handshake) => handshake,
        Err(e) => {
            error!(%op, error = %e, "Error reading handshake response");
            return;
        }
    };

    let sequence = handshake.sequence;
    match inner.pending.deliver(op, handshake) {
        Delivery::Delivered => trace!(%op, sequence, "Delivered handshake response"),
        Delivery::Unmatched => debug!(%op, sequence, "Unexpected handshake response"),
        Delivery::Duplicate => debug!(%op, sequence, "Duplicate handshake response"),
    }
}

fn dispatch_event(inner: &Inner, payload: Vec<Value>) {
    let event = match read_event(payload) {
        Ok(event) => event,
        Err(e @ ProtocolError::InsufficientPayload { .. }) => {
            debug!(error = %e, "Event message has no custom");
            return;
        }
        Err(e) => {
            error!(error = %e, "Error decoding event");
            return;
        }
    };

    let Some(subscription) = inner.subscriptions.get(event.subscription_id) else {
        debug!(subscription = event.subscription_id, "Event for unknown subscription");
        return;
    };

    trace!(subscription = event.subscription_id, "Received event");
    if !subscription.dispatch(event.custom) {
        trace!(subscription = event.subscription_id, "No handler installed");
    }
}
