//! The connection façade.
//!
//! [`Conn`] multiplexes many subscriptions over one transport. Subscribe and
//! unsubscribe are handshakes correlated by per-operation sequence numbers;
//! events are routed by subscription ID from a single reader task.

use rta_protocol::{decode_field, Frame, Handshake, Operation, ProtocolError, Value};
use rta_transport::{CloseReason, Transport, TransportError};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::pending::PendingHandshakes;
use crate::reader;
use crate::registry::SubscriptionRegistry;
use crate::sequence::Sequences;
use crate::subscription::Subscription;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// Deadline applied by [`Conn::subscribe`] and [`Conn::unsubscribe`].
    /// `None` waits until a response arrives or the connection closes.
    pub handshake_timeout: Option<Duration>,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// State shared between the façade, the reader loop and per-frame tasks.
pub(crate) struct Inner {
    pub(crate) transport: Arc<dyn Transport>,
    sequences: Sequences,
    pub(crate) pending: PendingHandshakes,
    pub(crate) subscriptions: SubscriptionRegistry,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    close_done: Arc<watch::Sender<bool>>,
}

impl Inner {
    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || *self.shutdown.borrow()
    }

    /// Write a frame on a detached task so a caller giving up mid-write
    /// cannot tear the frame for everyone else on the transport.
    async fn write(&self, frame: Frame) -> Result<()> {
        let transport = Arc::clone(&self.transport);
        let written = tokio::spawn(async move { transport.send(frame).await })
            .await
            .map_err(|e| TransportError::Other(format!("write task failed: {}", e)))?;

        match written {
            Ok(()) => Ok(()),
            Err(TransportError::ConnectionClosed) => Err(Error::ConnectionClosed),
            Err(e) => Err(Error::Transport(e)),
        }
    }

    /// Close the transport and broadcast shutdown. Runs once; later calls
    /// wait for the first close to finish, then return `Ok(())`.
    pub(crate) async fn close(&self) -> Result<()> {
        let mut done = self.close_done.subscribe();
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let _ = done.wait_for(|done| *done).await;
            return Ok(());
        }

        self.shutdown.send_replace(true);
        info!(transport = self.transport.name(), "Closing connection");

        // Completes even if this caller stops waiting.
        let transport = Arc::clone(&self.transport);
        let close_done = Arc::clone(&self.close_done);
        let closing = tokio::spawn(async move {
            let result = transport.close(CloseReason::normal()).await;
            close_done.send_replace(true);
            result
        });

        match closing.await {
            Ok(result) => Ok(result?),
            Err(e) => {
                self.close_done.send_replace(true);
                Err(TransportError::Other(format!("close task failed: {}", e)).into())
            }
        }
    }
}

/// A connection to the real-time activity service.
///
/// Safe to share between tasks (wrap it in an `Arc`). Dropping the last
/// handle shuts the connection down.
///
/// ```rust,ignore
/// use rta_core::{Conn, ConnConfig};
///
/// let conn = Conn::new(transport, ConnConfig::default());
/// let sub = conn.subscribe("https://userpresence.xboxlive.com/users/xuid(1)/richpresence").await?;
/// sub.handle(|custom| println!("{custom}"));
/// ```
pub struct Conn {
    inner: Arc<Inner>,
    config: ConnConfig,
}

impl Conn {
    /// Wrap an established transport and start the reader loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(transport: impl Transport + 'static, config: ConnConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (close_done, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            transport: Arc::new(transport),
            sequences: Sequences::new(),
            pending: PendingHandshakes::new(),
            subscriptions: SubscriptionRegistry::new(),
            closed: AtomicBool::new(false),
            shutdown,
            close_done: Arc::new(close_done),
        });

        reader::spawn(Arc::clone(&inner));

        Self { inner, config }
    }

    /// Subscribe to `resource_uri`, bounded by the configured handshake timeout.
    ///
    /// # Errors
    ///
    /// See [`Conn::subscribe_until`]; additionally [`Error::Timeout`].
    pub async fn subscribe(&self, resource_uri: &str) -> Result<Arc<Subscription>> {
        self.subscribe_with(resource_uri, deadline(self.config.handshake_timeout))
            .await
    }

    /// Subscribe to `resource_uri`, giving up when `cancel` resolves.
    ///
    /// # Errors
    ///
    /// - [`Error::UnexpectedStatus`] if the service refused the subscription
    /// - [`Error::Protocol`] if the response lacks the ID or custom payload
    /// - [`Error::Cancelled`] if `cancel` resolved first
    /// - [`Error::ConnectionClosed`] if the connection is or becomes closed
    pub async fn subscribe_until<C>(&self, resource_uri: &str, cancel: C) -> Result<Arc<Subscription>>
    where
        C: Future<Output = ()>,
    {
        self.subscribe_with(resource_uri, cancelled(cancel)).await
    }

    async fn subscribe_with<C>(&self, resource_uri: &str, cancel: C) -> Result<Arc<Subscription>>
    where
        C: Future<Output = Error>,
    {
        let handshake = self
            .handshake(
                Operation::Subscribe,
                vec![Value::String(resource_uri.to_owned())],
                cancel,
            )
            .await?;

        if !handshake.status.is_ok() {
            return Err(Error::unexpected_status(&handshake));
        }
        if handshake.payload.len() < 2 {
            return Err(ProtocolError::InsufficientPayload {
                payload: handshake.payload,
                index: 1,
            }
            .into());
        }

        let id: u32 = decode_field("subscription ID", &handshake.payload[0])?;
        let custom = handshake.payload.into_iter().nth(1).unwrap_or_default();

        let subscription = Arc::new(Subscription::new(id, resource_uri, custom));
        self.inner.subscriptions.insert(Arc::clone(&subscription));

        info!(subscription = id, resource = %resource_uri, "Subscribed");
        Ok(subscription)
    }

    /// Unsubscribe, bounded by the configured handshake timeout.
    ///
    /// # Errors
    ///
    /// See [`Conn::unsubscribe_until`]; additionally [`Error::Timeout`].
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<()> {
        self.unsubscribe_with(subscription, deadline(self.config.handshake_timeout))
            .await
    }

    /// Unsubscribe, giving up when `cancel` resolves.
    ///
    /// On success the subscription is removed from the registry and receives
    /// no further events. On failure it stays registered.
    ///
    /// # Errors
    ///
    /// - [`Error::UnexpectedStatus`] if the service refused
    /// - [`Error::Cancelled`] if `cancel` resolved first
    /// - [`Error::ConnectionClosed`] if the connection is or becomes closed
    pub async fn unsubscribe_until<C>(&self, subscription: &Subscription, cancel: C) -> Result<()>
    where
        C: Future<Output = ()>,
    {
        self.unsubscribe_with(subscription, cancelled(cancel)).await
    }

    async fn unsubscribe_with<C>(&self, subscription: &Subscription, cancel: C) -> Result<()>
    where
        C: Future<Output = Error>,
    {
        let id = subscription.id();
        let handshake = self
            .handshake(Operation::Unsubscribe, vec![Value::from(id)], cancel)
            .await?;

        if !handshake.status.is_ok() {
            return Err(Error::unexpected_status(&handshake));
        }

        self.inner.subscriptions.remove(id);
        info!(subscription = id, "Unsubscribed");
        Ok(())
    }

    /// Run one handshake: allocate, register, write, then wait for the
    /// response, `cancel`, or shutdown. The pending entry is released when
    /// this future completes or is dropped.
    async fn handshake<C>(&self, op: Operation, args: Vec<Value>, cancel: C) -> Result<Handshake>
    where
        C: Future<Output = Error>,
    {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let sequence = inner.sequences.next(op);
        let mut slot = inner.pending.register(op, sequence);
        let mut shutdown = inner.shutdown_signal();

        debug!(%op, sequence, "Sending handshake request");
        inner.write(Frame::request(op, sequence, args)).await?;

        tokio::select! {
            handshake = slot.recv() => handshake.ok_or(Error::ConnectionClosed),
            err = cancel => {
                debug!(%op, sequence, error = %err, "Handshake abandoned");
                Err(err)
            }
            _ = shutdown.wait_for(|closed| *closed) => Err(Error::ConnectionClosed),
        }
    }

    /// Close the connection.
    ///
    /// Idempotent: the transport is closed once no matter how many callers
    /// race here or whether the reader loop already closed it. Every caller
    /// returns only after that close has finished. Outstanding handshakes
    /// fail with [`Error::ConnectionClosed`].
    ///
    /// # Errors
    ///
    /// Returns the transport's close error, to the first caller only.
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    /// Wait until the connection has shut down.
    pub async fn closed(&self) {
        let mut shutdown = self.inner.shutdown_signal();
        let _ = shutdown.wait_for(|closed| *closed).await;
    }

    /// Whether the connection has shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Look up a registered subscription.
    #[must_use]
    pub fn subscription(&self, id: u32) -> Option<Arc<Subscription>> {
        self.inner.subscriptions.get(id)
    }

    /// All registered subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Arc<Subscription>> {
        self.inner.subscriptions.snapshot()
    }

    /// Number of registered subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Number of handshakes of `op` awaiting a response.
    #[must_use]
    pub fn pending_count(&self, op: Operation) -> usize {
        self.inner.pending.len(op)
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        // The reader loop sees this and performs the close.
        self.inner.shutdown.send_replace(true);
    }
}

async fn deadline(timeout: Option<Duration>) -> Error {
    match timeout {
        Some(timeout) => {
            tokio::time::sleep(timeout).await;
            Error::Timeout(timeout)
        }
        None => std::future::pending().await,
    }
}

async fn cancelled<C: Future<Output = ()>>(cancel: C) -> Error {
    cancel.await;
    Error::Cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use rta_protocol::{read_header, Status};
    use rta_transport::memory::{self, MemoryPeer, MemoryTransport};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use tokio::sync::{mpsc, oneshot, Semaphore};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn connect() -> (Arc<Conn>, MemoryPeer) {
        connect_with(ConnConfig::default())
    }

    fn connect_with(config: ConnConfig) -> (Arc<Conn>, MemoryPeer) {
        let (transport, peer) = memory::pair();
        (Arc::new(Conn::new(transport, config)), peer)
    }

    /// Read the next request and split it into (type, sequence, args).
    async fn next_request(peer: &mut MemoryPeer) -> (u32, u32, Vec<Value>) {
        let frame = timeout(WAIT, peer.recv())
            .await
            .expect("timed out waiting for request")
            .expect("client closed");
        let mut values = frame.into_values();
        let typ = read_header(&values).unwrap();
        let mut rest = values.split_off(1).into_iter();
        let sequence = decode_field("sequence", &rest.next().unwrap()).unwrap();
        (typ, sequence, rest.collect())
    }

    /// Complete a subscribe handshake with `id`.
    async fn subscribe(conn: &Arc<Conn>, peer: &mut MemoryPeer, uri: &str, id: u32) -> Arc<Subscription> {
        let task = {
            let conn = Arc::clone(conn);
            let uri = uri.to_string();
            tokio::spawn(async move { conn.subscribe(&uri).await })
        };
        let (_, sequence, _) = next_request(peer).await;
        peer.send(Frame::handshake_response(
            Operation::Subscribe,
            sequence,
            Status::OK,
            [json!(id), json!({"resource": uri})],
        ));
        task.await.unwrap().unwrap()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        timeout(WAIT, async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition never became true");
    }

    #[tokio::test]
    async fn test_subscribe_success() {
        let (conn, mut peer) = connect();

        let task = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.subscribe("uri://presence").await })
        };

        let (typ, sequence, args) = next_request(&mut peer).await;
        assert_eq!(typ, 1);
        assert_eq!(sequence, 1);
        assert_eq!(args, vec![json!("uri://presence")]);

        peer.send(Frame::handshake_response(
            Operation::Subscribe,
            sequence,
            Status::OK,
            [json!(100), json!({"state": "online"})],
        ));

        let sub = task.await.unwrap().unwrap();
        assert_eq!(sub.id(), 100);
        assert_eq!(sub.custom(), &json!({"state": "online"}));
        assert_eq!(sub.resource_uri(), "uri://presence");
        assert_eq!(conn.subscription(100).unwrap().id(), 100);
        assert_eq!(conn.pending_count(Operation::Subscribe), 0);
    }

    #[tokio::test]
    async fn test_concurrent_subscribes() {
        const N: u32 = 16;
        let (conn, mut peer) = connect();

        let tasks: Vec<_> = (0..N)
            .map(|i| {
                let conn = Arc::clone(&conn);
                tokio::spawn(async move { conn.subscribe(&format!("uri://{}", i)).await })
            })
            .collect();

        let mut requests = Vec::new();
        for _ in 0..N {
            requests.push(next_request(&mut peer).await);
        }
        let sequences: HashSet<u32> = requests.iter().map(|(_, seq, _)| *seq).collect();
        assert_eq!(sequences.len(), N as usize, "sequence numbers must be distinct");

        // Answer out of order; correlation is by sequence only.
        let mut uris = HashMap::new();
        for (_, sequence, args) in requests.into_iter().rev() {
            let id = 1000 + sequence;
            uris.insert(id, args[0].as_str().unwrap().to_string());
            peer.send(Frame::handshake_response(
                Operation::Subscribe,
                sequence,
                Status::OK,
                [json!(id), json!(null)],
            ));
        }

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(conn.subscription_count(), N as usize);
        for (id, uri) in uris {
            assert_eq!(conn.subscription(id).unwrap().resource_uri(), uri);
        }
        assert_eq!(conn.pending_count(Operation::Subscribe), 0);
    }

    #[tokio::test]
    async fn test_subscribe_insufficient_payload() {
        let (conn, mut peer) = connect();

        let task = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.subscribe("uri://a").await })
        };
        let (_, sequence, _) = next_request(&mut peer).await;
        peer.send(Frame::handshake_response(
            Operation::Subscribe,
            sequence,
            Status::OK,
            [json!(5)],
        ));

        match task.await.unwrap() {
            Err(Error::Protocol(ProtocolError::InsufficientPayload { payload, index })) => {
                assert_eq!(index, 1);
                assert_eq!(payload, vec![json!(5)]);
            }
            other => panic!("Expected InsufficientPayload, got {:?}", other),
        }
        assert_eq!(conn.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_bad_id_is_decode_error() {
        let (conn, mut peer) = connect();

        let task = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.subscribe("uri://a").await })
        };
        let (_, sequence, _) = next_request(&mut peer).await;
        peer.send(Frame::handshake_response(
            Operation::Subscribe,
            sequence,
            Status::OK,
            [json!("not-a-number"), json!(null)],
        ));

        match task.await.unwrap() {
            Err(Error::Protocol(ProtocolError::Field { field, .. })) => {
                assert_eq!(field, "subscription ID");
            }
            other => panic!("Expected Field error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscribe_refused() {
        let (conn, mut peer) = connect();

        let task = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.subscribe("uri://nope").await })
        };
        let (_, sequence, _) = next_request(&mut peer).await;
        peer.send(Frame::handshake_response(
            Operation::Subscribe,
            sequence,
            Status::UNKNOWN_RESOURCE,
            [],
        ));

        match task.await.unwrap() {
            Err(Error::UnexpectedStatus { code, message }) => {
                assert_eq!(code, 1);
                assert_eq!(message, None);
            }
            other => panic!("Expected UnexpectedStatus, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_unexpected_status() {
        let (conn, mut peer) = connect();
        let sub = subscribe(&conn, &mut peer, "uri://a", 7).await;

        let task = {
            let conn = Arc::clone(&conn);
            let sub = Arc::clone(&sub);
            tokio::spawn(async move { conn.unsubscribe(&sub).await })
        };
        let (typ, sequence, args) = next_request(&mut peer).await;
        assert_eq!(typ, 2);
        assert_eq!(sequence, 1);
        assert_eq!(args, vec![json!(7)]);

        peer.send(Frame::handshake_response(
            Operation::Unsubscribe,
            sequence,
            Status(1001),
            [json!("not found")],
        ));

        match task.await.unwrap() {
            Err(Error::UnexpectedStatus { code, message }) => {
                assert_eq!(code, 1001);
                assert_eq!(message.as_deref(), Some("not found"));
            }
            other => panic!("Expected UnexpectedStatus, got {:?}", other),
        }
        assert!(conn.subscription(7).is_some());
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_subscription() {
        let (conn, mut peer) = connect();
        let sub = subscribe(&conn, &mut peer, "uri://a", 7).await;

        let task = {
            let conn = Arc::clone(&conn);
            let sub = Arc::clone(&sub);
            tokio::spawn(async move { conn.unsubscribe(&sub).await })
        };
        let (_, sequence, _) = next_request(&mut peer).await;
        peer.send(Frame::handshake_response(
            Operation::Unsubscribe,
            sequence,
            Status::OK,
            [],
        ));

        task.await.unwrap().unwrap();
        assert!(conn.subscription(7).is_none());
        assert_eq!(conn.pending_count(Operation::Unsubscribe), 0);
    }

    #[tokio::test]
    async fn test_unmatched_response_is_dropped() {
        let (conn, mut peer) = connect();

        peer.send(Frame::handshake_response(
            Operation::Subscribe,
            99,
            Status::OK,
            [json!(1), json!(null)],
        ));
        peer.send(Frame::handshake_response(
            Operation::Unsubscribe,
            99,
            Status::OK,
            [],
        ));

        // The reader keeps going: a real handshake still completes.
        let sub = subscribe(&conn, &mut peer, "uri://a", 2).await;
        assert_eq!(sub.id(), 2);
        assert!(conn.subscription(1).is_none());
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_concurrent_close() {
        let (conn, mut peer) = connect();
        let sub = subscribe(&conn, &mut peer, "uri://a", 3).await;

        let subscribing = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.subscribe("uri://b").await })
        };
        let unsubscribing = {
            let conn = Arc::clone(&conn);
            let sub = Arc::clone(&sub);
            tokio::spawn(async move { conn.unsubscribe(&sub).await })
        };
        next_request(&mut peer).await;
        next_request(&mut peer).await;

        let closers: Vec<_> = (0..3)
            .map(|_| {
                let conn = Arc::clone(&conn);
                tokio::spawn(async move { conn.close().await })
            })
            .collect();
        for closer in closers {
            closer.await.unwrap().unwrap();
        }

        assert_eq!(peer.close_calls(), 1);
        assert!(matches!(
            subscribing.await.unwrap(),
            Err(Error::ConnectionClosed)
        ));
        assert!(matches!(
            unsubscribing.await.unwrap(),
            Err(Error::ConnectionClosed)
        ));

        assert!(conn.is_closed());
        assert!(matches!(
            conn.subscribe("uri://c").await,
            Err(Error::ConnectionClosed)
        ));
        conn.close().await.unwrap();
        assert_eq!(peer.close_calls(), 1);
    }

    /// Memory transport whose `close` blocks until a permit is added.
    struct GatedClose {
        transport: MemoryTransport,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl Transport for GatedClose {
        async fn send(&self, frame: Frame) -> std::result::Result<(), TransportError> {
            self.transport.send(frame).await
        }

        async fn recv(&self) -> std::result::Result<Option<Frame>, TransportError> {
            self.transport.recv().await
        }

        async fn close(&self, reason: CloseReason) -> std::result::Result<(), TransportError> {
            let _permit = self.gate.acquire().await;
            self.transport.close(reason).await
        }

        fn name(&self) -> &'static str {
            "gated"
        }

        fn is_open(&self) -> bool {
            self.transport.is_open()
        }
    }

    #[tokio::test]
    async fn test_close_waits_for_first_closer() {
        let (transport, peer) = memory::pair();
        let gate = Arc::new(Semaphore::new(0));
        let conn = Arc::new(Conn::new(
            GatedClose {
                transport,
                gate: Arc::clone(&gate),
            },
            ConnConfig::default(),
        ));

        let first = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.close().await })
        };
        wait_until(|| conn.is_closed()).await;

        let mut second = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.close().await })
        };
        assert!(timeout(Duration::from_millis(50), &mut second).await.is_err());
        assert_eq!(peer.close_calls(), 0);

        gate.add_permits(1);
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(peer.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_events_route_by_id() {
        let (conn, mut peer) = connect();
        let sub = subscribe(&conn, &mut peer, "uri://a", 7).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        sub.handle(move |custom| {
            let _ = tx.send(custom);
        });

        peer.send(Frame::event(999, json!("lost")));
        peer.send(Frame::event(7, json!({"n": 1})));

        let received = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(received, json!({"n": 1}));
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_handler_replacement_takes_effect() {
        let (conn, mut peer) = connect();
        let sub = subscribe(&conn, &mut peer, "uri://a", 7).await;

        let (first_tx, mut first_rx) = mpsc::unbounded_channel();
        sub.handle(move |custom| {
            let _ = first_tx.send(custom);
        });
        peer.send(Frame::event(7, json!("one")));
        assert_eq!(
            timeout(WAIT, first_rx.recv()).await.unwrap().unwrap(),
            json!("one")
        );

        let (second_tx, mut second_rx) = mpsc::unbounded_channel();
        sub.handle(move |custom| {
            let _ = second_tx.send(custom);
        });
        peer.send(Frame::event(7, json!("two")));
        assert_eq!(
            timeout(WAIT, second_rx.recv()).await.unwrap().unwrap(),
            json!("two")
        );
    }

    #[tokio::test]
    async fn test_cancel_releases_pending_entry() {
        let (conn, mut peer) = connect();

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let task = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                conn.subscribe_until("uri://slow", async {
                    let _ = cancel_rx.await;
                })
                .await
            })
        };

        let (_, sequence, _) = next_request(&mut peer).await;
        assert_eq!(conn.pending_count(Operation::Subscribe), 1);
        cancel_tx.send(()).unwrap();

        assert!(matches!(task.await.unwrap(), Err(Error::Cancelled)));
        assert_eq!(conn.pending_count(Operation::Subscribe), 0);

        // The late response finds no waiter and registers nothing.
        peer.send(Frame::handshake_response(
            Operation::Subscribe,
            sequence,
            Status::OK,
            [json!(50), json!(null)],
        ));
        let sub = subscribe(&conn, &mut peer, "uri://next", 51).await;
        assert_eq!(sub.id(), 51);
        assert!(conn.subscription(50).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let (conn, mut peer) = connect_with(ConnConfig {
            handshake_timeout: Some(Duration::from_millis(200)),
        });

        let task = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.subscribe("uri://silent").await })
        };
        next_request(&mut peer).await;

        match task.await.unwrap() {
            Err(Error::Timeout(d)) => assert_eq!(d, Duration::from_millis(200)),
            other => panic!("Expected Timeout, got {:?}", other),
        }
        assert_eq!(conn.pending_count(Operation::Subscribe), 0);
    }

    #[tokio::test]
    async fn test_dropped_future_releases_pending_entry() {
        let (conn, mut peer) = connect_with(ConnConfig {
            handshake_timeout: None,
        });

        let task = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.subscribe("uri://abandoned").await })
        };
        next_request(&mut peer).await;
        assert_eq!(conn.pending_count(Operation::Subscribe), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(conn.pending_count(Operation::Subscribe), 0);
    }

    #[tokio::test]
    async fn test_read_failure_closes_connection() {
        let (conn, mut peer) = connect();

        let waiting = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.subscribe("uri://a").await })
        };
        next_request(&mut peer).await;

        peer.send_error(TransportError::ReceiveFailed("connection reset".into()));

        timeout(WAIT, conn.closed()).await.unwrap();
        assert!(matches!(waiting.await.unwrap(), Err(Error::ConnectionClosed)));
        wait_until(|| peer.close_calls() == 1).await;

        assert!(matches!(
            conn.subscribe("uri://b").await,
            Err(Error::ConnectionClosed)
        ));
        conn.close().await.unwrap();
        assert_eq!(peer.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_peer_hangup_closes_connection() {
        let (conn, peer) = connect();
        drop(peer);
        timeout(WAIT, conn.closed()).await.unwrap();
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_malformed_frames_are_tolerated() {
        let (conn, mut peer) = connect();
        let sub = subscribe(&conn, &mut peer, "uri://a", 4).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        sub.handle(move |custom| {
            let _ = tx.send(custom);
        });

        peer.send(Frame::new(vec![]));
        peer.send(Frame::new(vec![json!("event")]));
        peer.send(Frame::new(vec![json!(9), json!(1)]));
        peer.send(Frame::new(vec![json!(3), json!(4)]));
        peer.send(Frame::new(vec![json!(3), json!("four"), json!(1)]));
        peer.send(Frame::new(vec![json!(1), json!("seq"), json!(0)]));
        peer.send(Frame::new(vec![json!(2)]));
        peer.send(Frame::resync());
        peer.send_error(TransportError::Protocol(ProtocolError::Invalid(
            "garbage".into(),
        )));
        peer.send(Frame::event(4, json!("still here")));

        assert_eq!(
            timeout(WAIT, rx.recv()).await.unwrap().unwrap(),
            json!("still here")
        );
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_drop_closes_transport() {
        let (conn, peer) = connect();
        drop(conn);
        wait_until(|| peer.close_calls() == 1).await;
        assert!(peer.is_closed());
    }
}
