//! User-facing alert surface.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Visual weight of an alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Neutral information.
    Info,
    /// Something the user wanted happened.
    Success,
    /// Something the user wanted did not happen.
    Warning,
}

impl AlertLevel {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
        }
    }
}

/// A transient message shown to the user.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Visual weight.
    pub level: AlertLevel,
    /// Wire kind of the message that produced the alert.
    pub kind: String,
    /// Rendered, localized text.
    pub text: String,
    /// When the alert was raised.
    pub shown_at: DateTime<Utc>,
}

impl Alert {
    /// Alert stamped with the current time.
    pub fn new(level: AlertLevel, kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            level,
            kind: kind.into(),
            text: text.into(),
            shown_at: Utc::now(),
        }
    }
}

/// Somewhere alerts can be shown. Fire-and-forget: there is no way to
/// retract an alert or learn whether it was seen.
pub trait AlertSink: Send + Sync {
    /// Show an alert.
    fn show(&self, alert: Alert);
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn show(&self, alert: Alert) {
        info!(level = alert.level.as_str(), kind = %alert.kind, text = %alert.text, "alert");
    }
}

/// Forwards alerts to a UI task over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::UnboundedSender<Alert>,
}

impl ChannelAlertSink {
    /// Sink plus the receiving end for the UI.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn show(&self, alert: Alert) {
        if self.tx.send(alert).is_err() {
            debug!("alert receiver gone, alert dropped");
        }
    }
}

/// Keeps every alert in memory; handy for headless embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every alert shown so far.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    /// Number of alerts shown so far.
    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    /// Whether nothing has been shown.
    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }
}

impl AlertSink for MemoryAlertSink {
    fn show(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}
