//! Wires the auth flag to the socket manager.

use std::sync::Arc;

use dirasa_core::topic_for;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::SocketManager;
use crate::events::{SessionEvent, SessionEvents};

/// Whether the user is signed in. Cheap to clone; clones share the flag.
#[derive(Clone, Debug)]
pub struct AuthState {
    tx: Arc<watch::Sender<bool>>,
}

impl AuthState {
    /// Flag with an initial value.
    pub fn new(authenticated: bool) -> Self {
        let (tx, _) = watch::channel(authenticated);
        Self { tx: Arc::new(tx) }
    }

    /// Update the flag. Subscribers are only woken on an actual change.
    pub fn set_authenticated(&self, authenticated: bool) {
        let _ = self.tx.send_if_modified(|current| {
            let changed = *current != authenticated;
            *current = authenticated;
            changed
        });
    }

    /// Current value.
    pub fn is_authenticated(&self) -> bool {
        *self.tx.borrow()
    }

    /// Watch the flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new(false)
    }
}

/// What the session loop does after one `select!` round.
enum Action {
    Stop,
    Reconcile,
    SignOut(&'static str),
    EventsClosed,
    Idle,
}

/// Keep `manager` connected to the feature topic while `auth` is true.
///
/// Session expiry or sign-out events flip `auth` to false. When `cancel`
/// fires the socket is closed and the task ends.
pub fn spawn_live_session(
    manager: Arc<SocketManager>,
    auth: AuthState,
    feature: String,
    events: Option<SessionEvents>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut auth_rx = auth.subscribe();
    let mut events_rx = events.as_ref().map(SessionEvents::subscribe);

    tokio::spawn(async move {
        loop {
            let authenticated = *auth_rx.borrow_and_update();
            let topic = topic_for(authenticated, &feature);
            debug!(authenticated, topic = ?topic.as_ref().map(|t| t.as_str()), "reconciling live channel");
            manager.set_inputs(topic, authenticated);

            loop {
                let action = tokio::select! {
                    () = cancel.cancelled() => Action::Stop,
                    changed = auth_rx.changed() => match changed {
                        Ok(()) => Action::Reconcile,
                        Err(_) => Action::Stop,
                    },
                    event = recv_event(events_rx.as_mut()) => match event {
                        Ok(SessionEvent::Expired { reason }) => {
                            warn!(%reason, "session expired");
                            Action::SignOut("expired")
                        }
                        Ok(SessionEvent::SignedOut) => Action::SignOut("signed out"),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "session events lagged");
                            Action::Idle
                        }
                        Err(broadcast::error::RecvError::Closed) => Action::EventsClosed,
                    },
                };

                match action {
                    Action::Stop => {
                        manager.close();
                        info!(feature = %feature, "live session stopped");
                        return;
                    }
                    Action::Reconcile => break,
                    Action::SignOut(why) => {
                        info!(why, "dropping authentication");
                        auth.set_authenticated(false);
                    }
                    Action::EventsClosed => events_rx = None,
                    Action::Idle => {}
                }
            }
        }
    })
}

async fn recv_event(
    rx: Option<&mut broadcast::Receiver<SessionEvent>>,
) -> Result<SessionEvent, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
