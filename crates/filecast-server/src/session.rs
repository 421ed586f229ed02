//! WebSocket session lifecycle: one connected client from registration
//! through disconnect.
//!
//! A session runs two obligations concurrently:
//!
//! - the **write pump** drains the outbound queue (joining everything already
//!   queued into one newline-delimited frame) and sends a ping every
//!   `ping_period`;
//! - the **read pump** discards inbound frames and enforces the pong-driven
//!   liveness deadline.
//!
//! Whichever pump finishes first cancels the session token, which stops the
//! other one. The session then unregisters from the hub exactly once.

use std::fmt::Display;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use bytes::{BufMut, Bytes, BytesMut};
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::BroadcastConfig;
use crate::hub::{HubHandle, SessionId};
use crate::liveness::Liveness;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::queue::OutboundQueue;
use crate::supervisor::{Worker, supervise};

/// Delimiter placed between payloads drained into one frame.
pub const BATCH_DELIMITER: u8 = b'\n';

/// Per-session timing and sizing.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Outbound queue slots; also the most payloads joined into one frame.
    pub queue_capacity: usize,
    /// Deadline for writing a single frame.
    pub write_wait: Duration,
    /// Liveness deadline refreshed by pongs.
    pub pong_wait: Duration,
    /// Interval between pings.
    pub ping_period: Duration,
}

impl From<&BroadcastConfig> for SessionConfig {
    fn from(cfg: &BroadcastConfig) -> Self {
        Self {
            queue_capacity: cfg.queue_capacity,
            write_wait: cfg.write_wait(),
            pong_wait: cfg.pong_wait(),
            ping_period: cfg.ping_period(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&BroadcastConfig::default())
    }
}

/// Why the write pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteEnd {
    /// The hub closed the queue (unregister, eviction or shutdown).
    QueueClosed,
    /// The read side finished first.
    Cancelled,
    /// A data frame could not be written.
    WriteFailed(String),
    /// A keepalive ping could not be written.
    PingFailed(String),
}

/// Why the read pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEnd {
    /// The peer sent a close frame.
    PeerClosed,
    /// The connection ended without a close frame.
    StreamEnded,
    /// Reading failed (protocol error, oversized message, reset).
    ReadError(String),
    /// No pong arrived within the liveness deadline.
    LivenessExpired,
    /// The write side finished first.
    Cancelled,
}

/// A frame write that did not complete.
#[derive(Debug, Error)]
enum FrameError {
    #[error("{0}")]
    Sink(String),
    #[error("write deadline of {0:?} exceeded")]
    Deadline(Duration),
}

/// Serve an upgraded WebSocket until either side ends it.
pub async fn serve(socket: WebSocket, hub: HubHandle, config: SessionConfig, id: SessionId) {
    let (sink, stream) = socket.split();
    run_session(sink, stream, hub, config, id).await;
}

/// Register a session with the hub and run both pumps over `sink`/`stream`.
///
/// The read pump runs on the caller's task and anchors the connection's
/// lifetime; the write pump runs on its own task.
#[instrument(skip_all, fields(session_id = %id))]
pub async fn run_session<S, R, E>(
    mut sink: S,
    stream: R,
    hub: HubHandle,
    config: SessionConfig,
    id: SessionId,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (queue, rx) = OutboundQueue::bounded(config.queue_capacity);
    if hub.register(id, queue).await.is_err() {
        warn!("hub closed, refusing session");
        let _ = send_frame(&mut sink, Message::Close(None), config.write_wait).await;
        return;
    }

    let started = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let cancel = CancellationToken::new();
    let writer = tokio::spawn({
        let cancel = cancel.clone();
        let config = config.clone();
        async move {
            let end = supervise(Worker::SessionWriter, write_pump(sink, rx, &config, &cancel)).await;
            cancel.cancel();
            end
        }
    });

    let read_end = supervise(
        Worker::SessionReader,
        read_pump(stream, config.pong_wait, &cancel),
    )
    .await;
    cancel.cancel();

    if hub.unregister(id).await.is_err() {
        debug!("hub already stopped, nothing to unregister");
    }

    let write_end = match writer.await {
        Ok(end) => end,
        Err(e) => {
            warn!(error = %e, "write pump task failed");
            return;
        }
    };

    info!(read = ?read_end, write = ?write_end, "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

/// Deliver queued payloads and keepalive pings until the queue closes, a
/// write fails, or `cancel` fires.
pub async fn write_pump<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Bytes>,
    config: &SessionConfig,
    cancel: &CancellationToken,
) -> WriteEnd
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ping = interval_at(
        tokio::time::Instant::now() + config.ping_period,
        config.ping_period,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = rx.recv() => {
                let Some(first) = next else {
                    let _ = send_frame(&mut sink, Message::Close(None), config.write_wait).await;
                    return WriteEnd::QueueClosed;
                };
                let frame = drain_batch(first, &mut rx, config.queue_capacity);
                if let Err(e) = send_frame(&mut sink, frame_message(frame), config.write_wait).await {
                    debug!(error = %e, "write failed");
                    return WriteEnd::WriteFailed(e.to_string());
                }
            }
            _ = ping.tick() => {
                if let Err(e) = send_frame(&mut sink, Message::Ping(Bytes::new()), config.write_wait).await {
                    debug!(error = %e, "ping failed");
                    return WriteEnd::PingFailed(e.to_string());
                }
            }
            () = cancel.cancelled() => {
                let _ = send_frame(&mut sink, Message::Close(None), config.write_wait).await;
                return WriteEnd::Cancelled;
            }
        }
    }
}

/// Consume inbound frames until the peer goes away, the liveness deadline
/// passes, or `cancel` fires.
pub async fn read_pump<R, E>(mut stream: R, pong_wait: Duration, cancel: &CancellationToken) -> ReadEnd
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut liveness = Liveness::new(pong_wait);
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Pong(_))) => liveness.mark_alive(),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "client sent close frame");
                    return ReadEnd::PeerClosed;
                }
                // Inbound data is not part of the protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "read failed");
                    return ReadEnd::ReadError(e.to_string());
                }
                None => return ReadEnd::StreamEnded,
            },
            () = liveness.expired() => {
                info!(window = ?liveness.window(), pongs = liveness.pongs(), "no pong within liveness deadline");
                return ReadEnd::LivenessExpired;
            }
            () = cancel.cancelled() => return ReadEnd::Cancelled,
        }
    }
}

/// Take `first` plus whatever is already queued (up to `limit` payloads in
/// total) and join them into a single frame.
pub fn drain_batch(first: Bytes, rx: &mut mpsc::Receiver<Bytes>, limit: usize) -> Bytes {
    let mut batch = vec![first];
    while batch.len() < limit {
        match rx.try_recv() {
            Ok(payload) => batch.push(payload),
            Err(_) => break,
        }
    }
    join_payloads(batch)
}

/// Join payloads with [`BATCH_DELIMITER`].
pub fn join_payloads(mut batch: Vec<Bytes>) -> Bytes {
    if batch.len() == 1 {
        return batch.swap_remove(0);
    }
    let len = batch.iter().map(Bytes::len).sum::<usize>() + batch.len().saturating_sub(1);
    let mut frame = BytesMut::with_capacity(len);
    for (i, payload) in batch.iter().enumerate() {
        if i > 0 {
            frame.put_u8(BATCH_DELIMITER);
        }
        frame.extend_from_slice(payload);
    }
    frame.freeze()
}

/// Text frame when the bytes are UTF-8, binary otherwise.
pub fn frame_message(frame: Bytes) -> Message {
    match String::from_utf8(Vec::from(frame)) {
        Ok(text) => Message::Text(text.into()),
        Err(e) => Message::Binary(Bytes::from(e.into_bytes())),
    }
}

async fn send_frame<S>(sink: &mut S, message: Message, wait: Duration) -> Result<(), FrameError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(FrameError::Sink(e.to_string())),
        Err(_) => Err(FrameError::Deadline(wait)),
    }
}
