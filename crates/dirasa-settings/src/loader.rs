//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`DirasaSettings::default()`]
//! 2. If `~/.dirasa/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the live channel section
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use dirasa_core::Locale;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::DirasaSettings;

/// Resolve the path to the settings file (`~/.dirasa/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".dirasa").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<DirasaSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or an invalid live section, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<DirasaSettings> {
    load_with(path, |name| std::env::var(name).ok())
}

fn load_with(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<DirasaSettings> {
    let defaults = serde_json::to_value(DirasaSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: DirasaSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.live.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
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

/// Apply `DIRASA_*` overrides looked up through `env`.
///
/// Invalid values are ignored with a warning (fall back to file/default).
fn apply_overrides(settings: &mut DirasaSettings, env: impl Fn(&str) -> Option<String>) {
    let env = |name: &str| env(name).filter(|v| !v.is_empty());

    // ── Live channel ────────────────────────────────────────────────
    if let Some(v) = env("DIRASA_WS_URL") {
        settings.live.base_url = v;
    }
    if let Some(v) = env("DIRASA_FEATURE") {
        settings.live.feature = v;
    }
    if let Some(v) = env("DIRASA_AUTH_TOKEN") {
        settings.live.auth_token = Some(v);
    }
    if let Some(v) = env("DIRASA_SEND_QUEUE")
        .and_then(|v| checked("DIRASA_SEND_QUEUE", &v, parse_usize_range(&v, 1, 65_536)))
    {
        settings.live.send_queue_size = v;
    }
    if let Some(v) = env("DIRASA_CONNECT_TIMEOUT_MS")
        .and_then(|v| checked("DIRASA_CONNECT_TIMEOUT_MS", &v, parse_u64_range(&v, 100, 300_000)))
    {
        settings.live.connect_timeout_ms = v;
    }

    // ── Alerts ──────────────────────────────────────────────────────
    if let Some(v) =
        env("DIRASA_LOCALE").and_then(|v| checked("DIRASA_LOCALE", &v, Locale::from_tag(&v)))
    {
        settings.alerts.locale = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env("DIRASA_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) =
        env("DIRASA_LOG_JSON").and_then(|v| checked("DIRASA_LOG_JSON", &v, parse_bool(&v)))
    {
        settings.logging.json = v;
    }

    // ── Export ──────────────────────────────────────────────────────
    if let Some(v) = env("DIRASA_API_URL") {
        settings.export.api_base_url = v;
    }
    if let Some(v) = env("DIRASA_EXPORT_POLL_MS")
        .and_then(|v| checked("DIRASA_EXPORT_POLL_MS", &v, parse_u64_range(&v, 100, 600_000)))
    {
        settings.export.poll_interval_ms = v;
    }
}

fn checked<T>(key: &str, raw: &str, parsed: Option<T>) -> Option<T> {
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "invalid env var, ignoring");
    }
    parsed
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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
