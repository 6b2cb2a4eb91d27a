//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`], so a partial JSON file fills the remaining fields from
//! compiled defaults.

mod app;
mod live;

pub use app::*;
pub use live::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "live": { "baseUrl": "wss://api.example.com", "feature": "notifications" },
///   "alerts": { "locale": "ar" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirasaSettings {
    /// Settings schema version.
    pub version: String,
    /// Live channel connection settings.
    pub live: LiveSettings,
    /// User-facing alert settings.
    pub alerts: AlertSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Export job polling settings.
    pub export: ExportSettings,
}

impl Default for DirasaSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            live: LiveSettings::default(),
            alerts: AlertSettings::default(),
            logging: LoggingSettings::default(),
            export: ExportSettings::default(),
        }
    }
}
