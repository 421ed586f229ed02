//! Why a settings load was rejected.

use std::path::PathBuf;

use thiserror::Error;

/// Failure loading `settings.json` or validating the merged result.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The settings file is not valid JSON.
    #[error("{} is not valid JSON: {source}", path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// The merged document has a field of the wrong type.
    #[error("settings do not match the expected shape: {0}")]
    Shape(#[source] serde_json::Error),
    /// A field holds a value the broadcast service cannot run with.
    #[error("{field} {reason}")]
    Invalid {
        /// camelCase path of the field, e.g. `broadcast.queueCapacity`.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
