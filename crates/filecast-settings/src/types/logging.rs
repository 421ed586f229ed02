//! Logging settings.

use serde::{Deserialize, Serialize};

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON lines on stdout instead of human-readable output.
    pub json: bool,
    /// Directory for the log file; empty disables file output.
    pub log_dir: String,
    /// Name substituted for `{name}` in `file_pattern`.
    pub name: String,
    /// Log file name pattern. Tokens: `{name}`, `{pid}`.
    pub file_pattern: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            log_dir: "logs".to_string(),
            name: "broadcast".to_string(),
            file_pattern: "{name}.log".to_string(),
        }
    }
}
