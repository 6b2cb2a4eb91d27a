//! # dirasa-listen
//!
//! Connects to the live notification channel as a signed-in user and prints
//! every alert until Ctrl+C or until the backend ends the session.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use dirasa_core::{Locale, SessionId};
use dirasa_live::{
    Alert, ChannelAlertSink, InMemoryQueryCache, LiveSupervisor, SessionEvent, SessionEvents,
    SupervisorConfig,
};
use dirasa_logging::{LoggingConfig, init_logging};
use dirasa_settings::DirasaSettings;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Live notification listener.
#[derive(Parser, Debug)]
#[command(name = "dirasa-listen", about = "Print live notifications as they arrive")]
struct Cli {
    /// WebSocket base URL (overrides settings).
    #[arg(long)]
    url: Option<String>,

    /// Feature channel to subscribe to.
    #[arg(long)]
    feature: Option<String>,

    /// Bearer token for the upgrade request.
    #[arg(long)]
    token: Option<String>,

    /// Alert language: `en` or `ar`.
    #[arg(long)]
    locale: Option<String>,

    /// Settings file (defaults to `~/.dirasa/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log and print alerts as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, settings: &mut DirasaSettings) -> Result<()> {
        if let Some(url) = &self.url {
            settings.live.base_url.clone_from(url);
        }
        if let Some(feature) = &self.feature {
            settings.live.feature.clone_from(feature);
        }
        if let Some(token) = &self.token {
            settings.live.auth_token = Some(token.clone());
        }
        if let Some(tag) = &self.locale {
            let Some(locale) = Locale::from_tag(tag) else {
                bail!("unsupported locale {tag:?}, expected en or ar");
            };
            settings.alerts.locale = locale;
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        settings.live.validate().context("Invalid live channel settings")?;
        Ok(())
    }
}

fn print_alert(alert: &Alert, json: bool) {
    if json {
        match serde_json::to_string(alert) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "failed to encode alert"),
        }
    } else {
        println!(
            "{} [{}] {}",
            alert.shown_at.format("%H:%M:%S"),
            alert.level.as_str(),
            alert.text
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(dirasa_settings::settings_path);
    let mut settings = dirasa_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings)?;

    init_logging(&LoggingConfig::from(&settings.logging)).context("Failed to initialize logging")?;

    let (sink, mut alerts) = ChannelAlertSink::new();
    let json = settings.logging.json;
    let printer = tokio::spawn(async move {
        while let Some(alert) = alerts.recv().await {
            print_alert(&alert, json);
        }
    });

    let events = SessionEvents::default();
    let mut expiry = events.subscribe();
    let supervisor = LiveSupervisor::new(
        SupervisorConfig::from(&settings),
        Arc::new(sink),
        Arc::new(InMemoryQueryCache::new()),
        events,
    );

    let session_id = SessionId::new();
    let channel = supervisor.acquire(&session_id);
    let mut transitions = channel.manager().subscribe_transitions();
    info!(
        session_id = %session_id,
        url = %settings.live.base_url,
        feature = %settings.live.feature,
        "listening for notifications"
    );

    let outcome = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                info!("interrupted");
                break Ok(());
            }
            status = transitions.recv() => match status {
                Ok(status) => info!(%status, "connection status"),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break Ok(()),
            },
            event = expiry.recv() => match event {
                Ok(SessionEvent::Expired { reason }) => {
                    break Err(anyhow::anyhow!("session expired: {reason}"));
                }
                Ok(SessionEvent::SignedOut) | Err(RecvError::Closed) => break Ok(()),
                Err(RecvError::Lagged(_)) => {}
            },
        }
    };

    channel.manager().shutdown().await;
    drop(channel);
    drop(supervisor);
    let _ = tokio::time::timeout(Duration::from_secs(2), printer).await;
    outcome
}
