//! Logging and export settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Per-module level overrides, e.g. `{"dirasa_live": "debug"}`.
    pub modules: BTreeMap<String, String>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            modules: BTreeMap::new(),
            json: false,
        }
    }
}

/// Export job polling settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportSettings {
    /// REST API base, e.g. `https://api.example.com/api`.
    pub api_base_url: String,
    /// Delay between status checks.
    pub poll_interval_ms: u64,
    /// Status checks before giving up.
    pub max_attempts: u32,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000/api".to_string(),
            poll_interval_ms: 2_000,
            max_attempts: 90,
        }
    }
}
