//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`,
//! so a settings file only needs the keys it changes.

mod broadcast;
mod logging;
mod server;

pub use broadcast::*;
pub use logging::*;
pub use server::*;

use filecast_server::BroadcastConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Upper bound for `server.pongWaitMs` (one hour).
pub const MAX_PONG_WAIT_MS: u64 = 3_600_000;

/// Root settings type for the filecast service.
///
/// ```json
/// {
///   "server": { "listenAddr": "127.0.0.1:9000" },
///   "broadcast": { "messageDir": "/srv/outbox", "queueCapacity": 512 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilecastSettings {
    /// Settings schema version.
    pub version: String,
    /// Listener and per-connection settings.
    pub server: ServerSettings,
    /// Watched directory and fan-out settings.
    pub broadcast: BroadcastSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for FilecastSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            broadcast: BroadcastSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl FilecastSettings {
    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &'static str, reason: &'static str| -> Result<()> {
            Err(SettingsError::Invalid { field, reason })
        };
        if self.broadcast.message_dir.trim().is_empty() {
            return invalid("broadcast.messageDir", "must not be empty");
        }
        if self.server.listen_addr.trim().is_empty() {
            return invalid("server.listenAddr", "must not be empty");
        }
        if self.broadcast.queue_capacity == 0 {
            return invalid("broadcast.queueCapacity", "must be at least 1");
        }
        if self.broadcast.hub_buffer == 0 {
            return invalid("broadcast.hubBuffer", "must be at least 1");
        }
        if self.server.pong_wait_ms == 0 || self.server.pong_wait_ms > MAX_PONG_WAIT_MS {
            return invalid("server.pongWaitMs", "must be between 1 and 3600000");
        }
        Ok(())
    }

    /// Runtime configuration for the broadcast service.
    pub fn to_broadcast_config(&self) -> BroadcastConfig {
        let snapshot = self.broadcast.snapshot_file.trim();
        BroadcastConfig {
            message_dir: self.broadcast.message_dir.clone().into(),
            listen_addr: self.server.listen_addr.clone(),
            snapshot_file: (!snapshot.is_empty()).then(|| snapshot.to_string()),
            queue_capacity: self.broadcast.queue_capacity,
            hub_buffer: self.broadcast.hub_buffer,
            settle_delay_ms: self.broadcast.settle_delay_ms,
            write_wait_ms: self.server.write_wait_ms,
            pong_wait_ms: self.server.pong_wait_ms,
            max_inbound_bytes: self.server.max_inbound_bytes,
            shutdown_grace_ms: self.server.shutdown_grace_ms,
        }
    }
}
