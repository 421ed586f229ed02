//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`FilecastSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! A `.env` file in the working directory can feed step 3; see
//! [`load_dotenv`].

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{FilecastSettings, MAX_PONG_WAIT_MS};

/// Resolve the path to the settings file (`~/.filecast/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".filecast").join("settings.json")
}

/// Load `.env` from the working directory into the process environment.
///
/// Variables already set are left alone. A missing file is not an error;
/// returns the path that was loaded, if any.
pub fn load_dotenv() -> Option<PathBuf> {
    match dotenvy::dotenv() {
        Ok(path) => {
            debug!(path = %path.display(), "loaded .env");
            Some(path)
        }
        Err(e) if e.not_found() => None,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable .env file");
            None
        }
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<FilecastSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, or the result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<FilecastSettings> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

/// Load settings from `path`, reading overrides through `lookup`.
pub fn load_settings_with<F>(path: &Path, lookup: F) -> Result<FilecastSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(FilecastSettings::default()).map_err(SettingsError::Shape)?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: FilecastSettings = serde_json::from_value(merged).map_err(SettingsError::Shape)?;
    apply_env_overrides(&mut settings, lookup);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides read through `lookup`.
///
/// Integers must parse and fall inside their range; booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. Invalid values are
/// ignored with a warning.
pub fn apply_env_overrides<F>(settings: &mut FilecastSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Broadcast ───────────────────────────────────────────────────
    if let Some(v) = env.string("BROADCAST_MESSAGE_DIR") {
        settings.broadcast.message_dir = v;
    }
    if let Some(v) = env.usize("FILECAST_QUEUE_CAPACITY", 1, 65_536) {
        settings.broadcast.queue_capacity = v;
    }
    if let Some(v) = env.u64("FILECAST_SETTLE_DELAY_MS", 0, 60_000) {
        settings.broadcast.settle_delay_ms = v;
    }
    // Present-but-empty disables the snapshot.
    if let Some(v) = (env.lookup)("FILECAST_SNAPSHOT_FILE") {
        settings.broadcast.snapshot_file = v;
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("BROADCAST_WS_ADDR") {
        settings.server.listen_addr = v;
    }
    if let Some(v) = env.u64("FILECAST_PONG_WAIT_MS", 1_000, MAX_PONG_WAIT_MS) {
        settings.server.pong_wait_ms = v;
    }
    if let Some(v) = env.u64("FILECAST_SHUTDOWN_GRACE_MS", 0, 600_000) {
        settings.server.shutdown_grace_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("LOG_DIR") {
        settings.logging.log_dir = v;
    }
    if let Some(v) = env.string("FILECAST_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("FILECAST_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}
