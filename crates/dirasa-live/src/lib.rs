//! # dirasa-live
//!
//! Live notification channel for the dirasa client.
//!
//! - [`connection`]: owns one WebSocket, exposes status and the last message
//! - [`dispatcher`]: turns messages into alerts and cache invalidations
//! - [`session`]: keeps the socket in step with the auth flag
//! - [`supervisor`]: one shared channel per session id
//! - [`events`]: typed session-expiry events
//! - [`cache`] / [`alerts`]: the seams to the rest of the client
//! - [`export`]: export job polling over HTTP
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dirasa_core::SessionId;
//! use dirasa_live::{InMemoryQueryCache, LiveSupervisor, SessionEvents, SupervisorConfig, TracingAlertSink};
//! use dirasa_settings::get_settings;
//!
//! # async fn run() {
//! let supervisor = LiveSupervisor::new(
//!     SupervisorConfig::from(get_settings()),
//!     Arc::new(TracingAlertSink),
//!     Arc::new(InMemoryQueryCache::new()),
//!     SessionEvents::default(),
//! );
//! let channel = supervisor.acquire(&SessionId::new());
//! println!("{}", channel.manager().status());
//! # }
//! ```

#![deny(unsafe_code)]

pub mod alerts;
pub mod cache;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod export;
pub mod session;
pub mod supervisor;

pub use alerts::{Alert, AlertLevel, AlertSink, ChannelAlertSink, MemoryAlertSink, TracingAlertSink};
pub use cache::{CacheRegion, InMemoryQueryCache, QueryCache, regions};
pub use connection::{ConnectionConfig, ConnectionStatus, LastMessage, SocketManager};
pub use dispatcher::{DispatchOutcome, DispatchRule, NotificationDispatcher};
pub use error::LiveError;
pub use events::{SessionEvent, SessionEvents};
pub use export::{
    ExportError, ExportJobSource, ExportStatus, HttpExportJobSource, PollOptions, poll_export_job,
};
pub use session::{AuthState, spawn_live_session};
pub use supervisor::{LiveChannel, LiveSupervisor, SupervisorConfig};
