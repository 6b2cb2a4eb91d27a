//! # dirasa-settings
//!
//! Configuration management with layered sources for the dirasa client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`DirasaSettings::default()`]
//! 2. **User file**: `~/.dirasa/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `DIRASA_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use dirasa_settings::get_settings;
//!
//! let settings = get_settings();
//! println!("live channel: {}", settings.live.base_url);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton.
static SETTINGS: OnceLock<DirasaSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.dirasa/settings.json` with env var
/// overrides. If loading fails, returns compiled defaults.
pub fn get_settings() -> &'static DirasaSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: DirasaSettings) -> std::result::Result<(), DirasaSettings> {
    SETTINGS.set(settings)
}
