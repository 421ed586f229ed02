//! Bounded per-session outbound queue.

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Why a payload could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PushError {
    /// Every slot is occupied; the consumer is not keeping up.
    #[error("outbound queue full")]
    Full,
    /// The receiving side is gone.
    #[error("outbound queue closed")]
    Closed,
}

/// Sending half of a session's outbound queue.
///
/// The hub holds the only instance for a registered session. Dropping it
/// closes the queue, which the session's write pump observes as the signal to
/// send a close frame and stop.
#[derive(Debug)]
pub struct OutboundQueue {
    tx: mpsc::Sender<Bytes>,
    capacity: usize,
}

impl OutboundQueue {
    /// Create a queue with `capacity` slots and return it with its receiver.
    ///
    /// A capacity of zero is bumped to one.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, capacity }, rx)
    }

    /// Queue a payload without waiting.
    pub fn try_push(&self, payload: Bytes) -> Result<(), PushError> {
        match self.tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(PushError::Full),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PushError::Closed),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
