//! Serialized fan-out hub.
//!
//! The hub is a single-writer actor: one task owns the session registry and
//! consumes every mutation (register, unregister, broadcast, shutdown) from a
//! single event channel. Nothing else touches the registry, so a broadcast
//! iteration can never interleave with an eviction or a shutdown.
//!
//! Backpressure policy: a session whose outbound queue is full when a payload
//! is fanned out is evicted. Its queue is closed, which makes its write pump
//! send a close frame and disconnect. Delivery to the remaining sessions is
//! never delayed by a slow one.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::{BROADCAST_EVICTIONS_TOTAL, BROADCAST_MESSAGES_TOTAL};
use crate::queue::{OutboundQueue, PushError};
use crate::supervisor::{Worker, supervise};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique session identity. Ids increase in allocation order and are
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next id.
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Hub lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    /// Accepting events.
    Running,
    /// Closing session queues.
    ShuttingDown,
    /// Event loop has exited; every handle operation fails with
    /// [`HubError::Closed`].
    Stopped,
}

/// Errors returned by [`HubHandle`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HubError {
    /// The hub has shut down (or its loop faulted) and accepts no more events.
    #[error("hub is closed")]
    Closed,
}

enum HubEvent {
    Register { id: SessionId, queue: OutboundQueue },
    Unregister(SessionId),
    Broadcast(Bytes),
    SessionCount(oneshot::Sender<usize>),
    Shutdown(oneshot::Sender<()>),
    #[cfg(test)]
    Fault,
}

/// Cloneable handle for submitting events to a running [`Hub`].
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubEvent>,
    state: watch::Receiver<HubState>,
}

impl HubHandle {
    /// Add a session to the registry. The hub takes ownership of the queue's
    /// sending half; it is dropped when the session leaves the registry.
    pub async fn register(&self, id: SessionId, queue: OutboundQueue) -> Result<(), HubError> {
        self.submit(HubEvent::Register { id, queue }).await
    }

    /// Remove a session. Idempotent: only the first removal closes the queue.
    pub async fn unregister(&self, id: SessionId) -> Result<(), HubError> {
        self.submit(HubEvent::Unregister(id)).await
    }

    /// Queue `payload` for every registered session.
    pub async fn broadcast(&self, payload: impl Into<Bytes>) -> Result<(), HubError> {
        self.submit(HubEvent::Broadcast(payload.into())).await
    }

    /// Number of registered sessions, as seen by the event loop.
    pub async fn session_count(&self) -> Result<usize, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(HubEvent::SessionCount(reply_tx)).await?;
        reply_rx.await.map_err(|_| HubError::Closed)
    }

    /// Close every session queue, clear the registry and stop the loop.
    ///
    /// Only the first call does anything; later or concurrent calls return
    /// once the hub is stopped.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.submit(HubEvent::Shutdown(ack_tx)).await.is_err() {
            debug!("hub already closing, waiting for it to stop");
            self.stopped().await;
            return;
        }
        let _ = ack_rx.await;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HubState {
        *self.state.borrow()
    }

    /// Wait until the event loop has exited.
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == HubState::Stopped).await;
    }

    async fn submit(&self, event: HubEvent) -> Result<(), HubError> {
        if self.state() != HubState::Running {
            return Err(HubError::Closed);
        }
        self.tx.send(event).await.map_err(|_| HubError::Closed)
    }
}

/// The hub event loop and the registry it owns.
pub struct Hub {
    rx: mpsc::Receiver<HubEvent>,
    sessions: BTreeMap<SessionId, OutboundQueue>,
    state: watch::Sender<HubState>,
}

impl Hub {
    /// Create a hub whose event channel holds `buffer` pending events.
    pub fn new(buffer: usize) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (state_tx, state_rx) = watch::channel(HubState::Running);
        let hub = Self {
            rx,
            sessions: BTreeMap::new(),
            state: state_tx,
        };
        let handle = HubHandle {
            tx,
            state: state_rx,
        };
        (hub, handle)
    }

    /// Create a hub and run its loop on a supervised task.
    pub fn spawn(buffer: usize) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(buffer);
        let task = tokio::spawn(async move {
            let _ = supervise(Worker::Hub, hub.run()).await;
        });
        (handle, task)
    }

    /// Consume events until shutdown, or until every handle is dropped.
    pub async fn run(mut self) {
        info!("hub started");
        while let Some(event) = self.rx.recv().await {
            match event {
                HubEvent::Register { id, queue } => {
                    let _ = self.sessions.insert(id, queue);
                    info!(session_id = %id, total = self.sessions.len(), "session registered");
                }
                HubEvent::Unregister(id) => {
                    if self.sessions.remove(&id).is_some() {
                        info!(session_id = %id, total = self.sessions.len(), "session unregistered");
                    }
                }
                HubEvent::Broadcast(payload) => self.fan_out(&payload),
                HubEvent::SessionCount(reply) => {
                    let _ = reply.send(self.sessions.len());
                }
                HubEvent::Shutdown(ack) => {
                    self.close();
                    let _ = ack.send(());
                    return;
                }
                #[cfg(test)]
                HubEvent::Fault => panic!("injected hub fault"),
            }
        }
        self.close();
    }

    /// Push `payload` to every session in registration order, evicting the
    /// ones that cannot take it.
    fn fan_out(&mut self, payload: &Bytes) {
        counter!(BROADCAST_MESSAGES_TOTAL).increment(1);
        let recipients = self.sessions.len();
        self.sessions.retain(|id, queue| match queue.try_push(payload.clone()) {
            Ok(()) => true,
            Err(PushError::Full) => {
                warn!(
                    session_id = %id,
                    capacity = queue.capacity(),
                    "outbound queue full, evicting slow session"
                );
                counter!(BROADCAST_EVICTIONS_TOTAL).increment(1);
                false
            }
            Err(PushError::Closed) => {
                debug!(session_id = %id, "outbound queue already closed, removing session");
                false
            }
        });
        debug!(
            bytes = payload.len(),
            recipients,
            delivered = self.sessions.len(),
            "broadcast fanned out"
        );
    }

    fn close(&mut self) {
        if *self.state.borrow() == HubState::Stopped {
            return;
        }
        let _ = self.state.send_replace(HubState::ShuttingDown);
        self.rx.close();
        let closed = self.sessions.len();
        self.sessions.clear();
        let _ = self.state.send_replace(HubState::Stopped);
        info!(closed_sessions = closed, "hub stopped");
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        // Reached on every exit path, including a fault unwinding out of `run`.
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn add_session(hub: &HubHandle, capacity: usize) -> (SessionId, mpsc::Receiver<Bytes>) {
        let id = SessionId::next();
        let (queue, rx) = OutboundQueue::bounded(capacity);
        hub.register(id, queue).await.unwrap();
        (id, rx)
    }

    #[test]
    fn session_ids_are_unique_and_increasing() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert!(b > a);
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("session-"));
    }

    #[tokio::test]
    async fn register_and_count() {
        let (hub, _task) = Hub::spawn(16);
        assert_eq!(hub.session_count().await.unwrap(), 0);
        let (_a, _rx_a) = add_session(&hub, 4).await;
        let (_b, _rx_b) = add_session(&hub, 4).await;
        assert_eq!(hub.session_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_session_once() {
        let (hub, _task) = Hub::spawn(16);
        let mut receivers = Vec::new();
        for _ in 0..5 {
            receivers.push(add_session(&hub, 4).await.1);
        }
        hub.broadcast("M").await.unwrap();
        // Round-trip through the loop so the broadcast has been processed.
        assert_eq!(hub.session_count().await.unwrap(), 5);
        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"M"));
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn broadcast_with_no_sessions_is_fine() {
        let (hub, _task) = Hub::spawn(4);
        hub.broadcast(Bytes::from_static(b"nobody")).await.unwrap();
        assert_eq!(hub.session_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn full_session_is_evicted_and_closed() {
        let (hub, _task) = Hub::spawn(16);
        let (_s1, mut rx1) = add_session(&hub, 1).await;
        let (_s2, mut rx2) = add_session(&hub, 1).await;
        let (_s3, mut rx3) = add_session(&hub, 1).await;

        hub.broadcast("hello").await.unwrap();
        assert_eq!(hub.session_count().await.unwrap(), 3);
        assert_eq!(rx1.recv().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(rx3.recv().await.unwrap(), Bytes::from_static(b"hello"));
        // Session 2 never drains, so its single slot stays occupied.

        hub.broadcast("world").await.unwrap();
        assert_eq!(hub.session_count().await.unwrap(), 2);
        assert_eq!(rx1.recv().await.unwrap(), Bytes::from_static(b"world"));
        assert_eq!(rx3.recv().await.unwrap(), Bytes::from_static(b"world"));

        assert_eq!(rx2.recv().await.unwrap(), Bytes::from_static(b"hello"));
        assert!(rx2.recv().await.is_none(), "evicted queue must be closed");

        hub.broadcast("again").await.unwrap();
        assert_eq!(hub.session_count().await.unwrap(), 2);
        assert_eq!(rx1.recv().await.unwrap(), Bytes::from_static(b"again"));
    }

    #[tokio::test]
    async fn session_with_dropped_receiver_is_removed() {
        let (hub, _task) = Hub::spawn(16);
        let (_a, rx_a) = add_session(&hub, 4).await;
        let (_b, mut rx_b) = add_session(&hub, 4).await;
        drop(rx_a);
        hub.broadcast("x").await.unwrap();
        assert_eq!(hub.session_count().await.unwrap(), 1);
        assert_eq!(rx_b.recv().await.unwrap(), Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn unregister_closes_queue_once() {
        let (hub, _task) = Hub::spawn(16);
        let (id, mut rx) = add_session(&hub, 4).await;
        hub.unregister(id).await.unwrap();
        hub.unregister(id).await.unwrap();
        assert_eq!(hub.session_count().await.unwrap(), 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn unregister_unknown_session_is_noop() {
        let (hub, _task) = Hub::spawn(4);
        let (_id, _rx) = add_session(&hub, 4).await;
        hub.unregister(SessionId::next()).await.unwrap();
        assert_eq!(hub.session_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn per_session_order_is_preserved() {
        let (hub, _task) = Hub::spawn(64);
        let (_id, mut rx) = add_session(&hub, 32).await;
        for i in 0..10 {
            hub.broadcast(format!("m{i}")).await.unwrap();
        }
        for i in 0..10 {
            assert_eq!(rx.recv().await.unwrap(), Bytes::from(format!("m{i}")));
        }
    }

    #[tokio::test]
    async fn shutdown_closes_sessions_and_stops() {
        let (hub, task) = Hub::spawn(16);
        let (_a, mut rx_a) = add_session(&hub, 4).await;
        let (_b, mut rx_b) = add_session(&hub, 4).await;

        hub.shutdown().await;
        assert_eq!(hub.state(), HubState::Stopped);
        assert!(rx_a.recv().await.is_none());
        assert!(rx_b.recv().await.is_none());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_twice_is_noop() {
        let (hub, _task) = Hub::spawn(4);
        hub.shutdown().await;
        hub.shutdown().await;
        assert_eq!(hub.state(), HubState::Stopped);
    }

    #[tokio::test]
    async fn concurrent_shutdowns_complete() {
        let (hub, task) = Hub::spawn(4);
        let h1 = hub.clone();
        let h2 = hub.clone();
        let _ = tokio::join!(h1.shutdown(), h2.shutdown());
        task.await.unwrap();
        assert_eq!(hub.state(), HubState::Stopped);
    }

    #[tokio::test]
    async fn operations_after_shutdown_are_rejected() {
        let (hub, _task) = Hub::spawn(4);
        hub.shutdown().await;

        assert_eq!(hub.broadcast("late").await, Err(HubError::Closed));
        assert_eq!(hub.unregister(SessionId::next()).await, Err(HubError::Closed));
        assert_eq!(hub.session_count().await, Err(HubError::Closed));

        let (queue, mut rx) = OutboundQueue::bounded(4);
        assert_eq!(hub.register(SessionId::next(), queue).await, Err(HubError::Closed));
        // The rejected queue was dropped, so its session sees a closed queue.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn loop_stops_when_all_handles_dropped() {
        let (hub, task) = Hub::spawn(4);
        let watcher = hub.clone();
        let state = watcher.state.clone();
        drop(hub);
        drop(watcher);
        task.await.unwrap();
        assert_eq!(*state.borrow(), HubState::Stopped);
    }

    #[tokio::test]
    async fn faulted_loop_stops_and_closes_sessions() {
        let (hub, task) = Hub::spawn(16);
        let (_a, mut rx_a) = add_session(&hub, 4).await;
        let (_b, mut rx_b) = add_session(&hub, 4).await;

        hub.submit(HubEvent::Fault).await.unwrap();
        // The supervised task absorbs the panic and completes normally.
        task.await.unwrap();

        assert_eq!(hub.state(), HubState::Stopped);
        assert!(rx_a.recv().await.is_none());
        assert!(rx_b.recv().await.is_none());
        assert_eq!(hub.broadcast("after").await, Err(HubError::Closed));
        assert_eq!(hub.session_count().await, Err(HubError::Closed));
        let (queue, _rx) = OutboundQueue::bounded(4);
        assert_eq!(hub.register(SessionId::next(), queue).await, Err(HubError::Closed));
        // Shutdown after a fault returns instead of hanging.
        tokio::time::timeout(std::time::Duration::from_secs(1), hub.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stopped_resolves_after_shutdown() {
        let (hub, _task) = Hub::spawn(4);
        let waiter = hub.clone();
        let wait = tokio::spawn(async move { waiter.stopped().await });
        hub.shutdown().await;
        wait.await.unwrap();
    }
}
