//! One live channel per logical session.
//!
//! UI layers come and go; the socket should not. Handles returned by
//! [`LiveSupervisor::acquire`] are reference counted: everyone asking for the
//! same session shares one manager, one dispatcher and one socket, and the
//! channel shuts down when the last handle is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use dirasa_core::{Locale, SessionId};
use dirasa_settings::DirasaSettings;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::alerts::AlertSink;
use crate::cache::QueryCache;
use crate::connection::{ConnectionConfig, SocketManager};
use crate::dispatcher::NotificationDispatcher;
use crate::events::SessionEvents;
use crate::session::{AuthState, spawn_live_session};

/// Everything needed to build a channel.
#[derive(Clone)]
pub struct SupervisorConfig {
    /// Socket parameters.
    pub connection: ConnectionConfig,
    /// Feature name that selects the topic.
    pub feature: String,
    /// Alert language.
    pub locale: Locale,
}

impl From<&DirasaSettings> for SupervisorConfig {
    fn from(settings: &DirasaSettings) -> Self {
        Self {
            connection: ConnectionConfig::from(&settings.live),
            feature: settings.live.feature.clone(),
            locale: settings.alerts.locale,
        }
    }
}

/// Hands out shared live channels keyed by session id.
pub struct LiveSupervisor {
    config: SupervisorConfig,
    alerts: Arc<dyn AlertSink>,
    cache: Arc<dyn QueryCache>,
    events: SessionEvents,
    channels: Mutex<HashMap<SessionId, Weak<LiveChannel>>>,
}

impl LiveSupervisor {
    /// Supervisor publishing alerts to `alerts`, invalidating `cache`, and
    /// reporting session expiry on `events`.
    pub fn new(
        config: SupervisorConfig,
        alerts: Arc<dyn AlertSink>,
        cache: Arc<dyn QueryCache>,
        events: SessionEvents,
    ) -> Self {
        Self {
            config,
            alerts,
            cache,
            events,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Shared channel for a session, created on first use.
    ///
    /// New channels start authenticated. Must be called inside a tokio runtime.
    pub fn acquire(&self, session_id: &SessionId) -> Arc<LiveChannel> {
        let mut channels = self.channels.lock();
        if let Some(channel) = channels.get(session_id).and_then(Weak::upgrade) {
            debug!(session_id = %session_id, "reusing live channel");
            return channel;
        }
        channels.retain(|_, weak| weak.strong_count() > 0);

        let channel = Arc::new(self.start(session_id.clone()));
        let _ = channels.insert(session_id.clone(), Arc::downgrade(&channel));
        channel
    }

    /// Sessions with at least one live handle.
    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.channels
            .lock()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// The event channel shared by every session.
    pub fn session_events(&self) -> &SessionEvents {
        &self.events
    }

    fn start(&self, session_id: SessionId) -> LiveChannel {
        info!(session_id = %session_id, "starting live channel");
        let manager = Arc::new(SocketManager::with_session_events(
            self.config.connection.clone(),
            self.events.clone(),
        ));
        let auth = AuthState::new(true);
        let cancel = CancellationToken::new();

        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::clone(&self.alerts),
            Arc::clone(&self.cache),
            self.config.locale,
        ));
        let dispatch_task = dispatcher.spawn(manager.subscribe_messages());
        let session_task = spawn_live_session(
            Arc::clone(&manager),
            auth.clone(),
            self.config.feature.clone(),
            Some(self.events.clone()),
            cancel.clone(),
        );

        LiveChannel {
            session_id,
            manager,
            auth,
            cancel,
            session_task,
            dispatch_task,
        }
    }
}

/// A running live channel. Dropping the last handle closes the socket.
pub struct LiveChannel {
    session_id: SessionId,
    manager: Arc<SocketManager>,
    auth: AuthState,
    cancel: CancellationToken,
    session_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
}

impl LiveChannel {
    /// Session this channel belongs to.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The socket manager.
    pub fn manager(&self) -> &SocketManager {
        &self.manager
    }

    /// The session's auth flag. Setting it to false closes the socket.
    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    /// Whether the session task is still running.
    pub fn is_running(&self) -> bool {
        !self.session_task.is_finished()
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        info!(session_id = %self.session_id, "stopping live channel");
        self.cancel.cancel();
        self.dispatch_task.abort();
    }
}
