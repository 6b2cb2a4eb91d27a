//! # dirasa-logging
//!
//! Structured logging with `tracing`.
//!
//! `RUST_LOG` takes precedence when set. Otherwise the filter is built from
//! the configured default level plus per-module overrides. Output is either
//! JSON lines or compact human-readable text.

#![deny(unsafe_code)]

mod types;

pub use types::LogLevel;

use dirasa_settings::LoggingSettings;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Resolved logging configuration.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Default level.
    pub level: LogLevel,
    /// Per-module level overrides (e.g. `dirasa_live` => `Debug`).
    pub module_levels: Vec<(String, LogLevel)>,
    /// Emit JSON lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl From<&LoggingSettings> for LoggingConfig {
    fn from(settings: &LoggingSettings) -> Self {
        Self {
            level: LogLevel::from_str_lossy(&settings.level),
            module_levels: settings
                .modules
                .iter()
                .map(|(module, level)| (module.clone(), LogLevel::from_str_lossy(level)))
                .collect(),
            json: settings.json,
        }
    }
}

impl LoggingConfig {
    /// `EnvFilter` directive string, e.g. `info,dirasa_live=debug`.
    pub fn filter_directive(&self) -> String {
        let mut directive = self.level.as_directive().to_string();
        for (module, level) in &self.module_levels {
            directive.push(',');
            directive.push_str(module);
            directive.push('=');
            directive.push_str(level.as_directive());
        }
        directive
    }
}

/// Install the global subscriber. Call once at startup.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let (json_layer, text_layer) = if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false);
        (Some(layer), None)
    } else {
        let layer = tracing_subscriber::fmt::layer().compact().with_target(true);
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
}
