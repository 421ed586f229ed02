//! # filecast-logging
//!
//! Installs the process-wide `tracing` subscriber: an `EnvFilter`
//! (`RUST_LOG` wins over the configured level), a stdout layer in JSON or
//! human format, and an optional file layer writing JSON lines.

#![deny(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Configuration for the logging subsystem.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Default filter directive (e.g. `info`, `filecast_server=debug`).
    pub level: String,
    /// JSON lines on stdout instead of human-readable output.
    pub json: bool,
    /// Directory for the log file; `None` disables file output.
    pub log_dir: Option<PathBuf>,
    /// Substituted for `{name}` in `file_pattern`.
    pub name: String,
    /// Log file name pattern. Tokens: `{name}`, `{pid}`.
    pub file_pattern: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            log_dir: Some(PathBuf::from("logs")),
            name: "broadcast".to_string(),
            file_pattern: "{name}.log".to_string(),
        }
    }
}

/// Result of [`init_logging`].
#[derive(Debug)]
pub struct LoggingGuard {
    log_file: Option<PathBuf>,
}

impl LoggingGuard {
    /// Path of the log file being written, if file output is active.
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

/// Initialize logging. Call once at startup.
///
/// A log file that cannot be opened is reported and skipped; stdout logging
/// still starts.
pub fn init_logging(config: &LoggingConfig) -> LoggingGuard {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = if config.json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let mut file_error = None;
    let (file_layer, log_file) = match open_log_file(config) {
        Ok(Some((path, file))) => {
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file))
                .boxed();
            (Some(layer), Some(path))
        }
        Ok(None) => (None, None),
        Err(e) => {
            file_error = Some(e);
            (None, None)
        }
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if let Some(e) = file_error {
        warn!(error = %e, "log file unavailable, logging to stdout only");
    }

    LoggingGuard {
        log_file: if installed { log_file } else { None },
    }
}

/// Resolve the log file path for `config`, or `None` when file output is off.
pub fn log_file_path(config: &LoggingConfig) -> Option<PathBuf> {
    let dir = config.log_dir.as_ref().filter(|d| !d.as_os_str().is_empty())?;
    let name = config
        .file_pattern
        .replace("{name}", &sanitize(&config.name))
        .replace("{pid}", &std::process::id().to_string());
    Some(dir.join(name))
}

fn open_log_file(config: &LoggingConfig) -> io::Result<Option<(PathBuf, File)>> {
    let Some(path) = log_file_path(config) else {
        return Ok(None);
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok(Some((path, file)))
}

/// Keep names filesystem-safe.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "app".to_string()
    } else {
        cleaned
    }
}
