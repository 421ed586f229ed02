//! Listener and per-connection settings.

use serde::{Deserialize, Serialize};

/// Listener and per-connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address; `:port` listens on every interface.
    pub listen_addr: String,
    /// Deadline for writing one frame, in milliseconds.
    pub write_wait_ms: u64,
    /// Liveness deadline refreshed by pongs, in milliseconds.
    pub pong_wait_ms: u64,
    /// Largest inbound client message, in bytes.
    pub max_inbound_bytes: usize,
    /// Grace period for the listener at shutdown, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: ":8081".to_string(),
            write_wait_ms: 10_000,
            pong_wait_ms: 60_000,
            max_inbound_bytes: 64,
            shutdown_grace_ms: 5_000,
        }
    }
}
