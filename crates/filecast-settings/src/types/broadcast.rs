//! Watched directory and fan-out settings.

use serde::{Deserialize, Serialize};

/// Watched directory and fan-out settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcastSettings {
    /// Directory whose new files are broadcast.
    pub message_dir: String,
    /// File in `message_dir` sent once at startup; empty disables it.
    pub snapshot_file: String,
    /// Outbound queue slots per client.
    pub queue_capacity: usize,
    /// Pending hub events before submitters wait.
    pub hub_buffer: usize,
    /// Wait between a file appearing and reading it, in milliseconds.
    pub settle_delay_ms: u64,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            message_dir: "broadcast_messages".to_string(),
            snapshot_file: "files.json".to_string(),
            queue_capacity: 256,
            hub_buffer: 1024,
            settle_delay_ms: 100,
        }
    }
}
