//! Broadcast service configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the broadcast service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Directory watched for newly created message files.
    pub message_dir: PathBuf,
    /// Address to bind (`host:port`, or `:port` for all interfaces).
    pub listen_addr: String,
    /// File inside `message_dir` broadcast once at startup, if readable.
    pub snapshot_file: Option<String>,
    /// Outbound queue slots per session.
    pub queue_capacity: usize,
    /// Capacity of the hub event channel.
    pub hub_buffer: usize,
    /// Wait after a file-creation event before reading the file.
    pub settle_delay_ms: u64,
    /// Deadline for a single frame write.
    pub write_wait_ms: u64,
    /// Liveness deadline, refreshed by every pong.
    pub pong_wait_ms: u64,
    /// Largest inbound message accepted from a client, in bytes.
    pub max_inbound_bytes: usize,
    /// Grace period for in-flight HTTP requests at shutdown.
    pub shutdown_grace_ms: u64,
}

impl BroadcastConfig {
    /// Settle delay as a [`Duration`].
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Frame write deadline as a [`Duration`].
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// Liveness deadline as a [`Duration`].
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Keepalive ping period: nine tenths of the liveness deadline.
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis((self.pong_wait_ms.saturating_mul(9) / 10).max(1))
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Socket address string suitable for `TcpListener::bind`.
    ///
    /// A bare `:port` binds every interface.
    pub fn bind_addr(&self) -> String {
        let addr = self.listen_addr.trim();
        if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        }
    }

    /// Full path of the startup snapshot file, if one is configured.
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.snapshot_file
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .map(|name| self.message_dir.join(name))
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            message_dir: PathBuf::from("broadcast_messages"),
            listen_addr: ":8081".into(),
            snapshot_file: Some("files.json".into()),
            queue_capacity: 256,
            hub_buffer: 1024,
            settle_delay_ms: 100,
            write_wait_ms: 10_000,
            pong_wait_ms: 60_000,
            max_inbound_bytes: 64,
            shutdown_grace_ms: 5_000,
        }
    }
}
