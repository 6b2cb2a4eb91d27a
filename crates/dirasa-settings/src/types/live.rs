//! Live channel and alert settings.

use dirasa_core::Locale;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Live notification channel settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveSettings {
    /// Base WebSocket URL, without the channel path.
    pub base_url: String,
    /// Feature name appended to `/ws/` to form the channel path.
    pub feature: String,
    /// Bearer token sent on the upgrade request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Capacity of the outbound frame queue.
    pub send_queue_size: usize,
    /// How long the handshake may take before the attempt fails.
    pub connect_timeout_ms: u64,
    /// How long to wait for the server's close reply.
    pub close_timeout_ms: u64,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            base_url: "ws://127.0.0.1:8000".to_string(),
            feature: "notifications".to_string(),
            auth_token: None,
            send_queue_size: 64,
            connect_timeout_ms: 10_000,
            close_timeout_ms: 2_000,
        }
    }
}

impl LiveSettings {
    /// Reject values the connection manager cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("ws://") || self.base_url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue(format!(
                "live.baseUrl must start with ws:// or wss://, got {}",
                self.base_url
            )));
        }
        if self.feature.trim_matches('/').is_empty() {
            return Err(SettingsError::InvalidValue(
                "live.feature must not be empty".to_string(),
            ));
        }
        if self.send_queue_size == 0 {
            return Err(SettingsError::InvalidValue(
                "live.sendQueueSize must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Alert rendering settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertSettings {
    /// Language for alert text.
    pub locale: Locale,
}
