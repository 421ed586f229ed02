//! # filecast-settings
//!
//! Layered configuration for the filecast broadcast service.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`FilecastSettings::default()`])
//! 2. **User file**: `~/.filecast/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `BROADCAST_*`, `LOG_DIR` and `FILECAST_*`
//!    overrides, optionally seeded from a `.env` file

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_dotenv, load_settings, load_settings_from_path,
    load_settings_with, settings_path,
};
pub use types::*;
