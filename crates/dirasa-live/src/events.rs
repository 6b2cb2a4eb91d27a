//! Session lifecycle events.
//!
//! Auth failures are detected deep in the stack (a rejected handshake, an
//! auth close code) but handled at the top, where the UI shows a message and
//! signs the user out. `SessionEvents` is the typed channel between the two.
//! It is passed around as a value; there is no process-wide registry.

use tokio::sync::broadcast;
use tracing::debug;

/// Something happened to the user's session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The backend no longer accepts the session's credentials.
    Expired {
        /// Where the expiry was detected.
        reason: String,
    },
    /// The user signed out locally.
    SignedOut,
}

/// Broadcast channel for [`SessionEvent`]s.
#[derive(Clone, Debug)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    /// Channel retaining up to `capacity` undelivered events per listener.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Returns how many listeners received it.
    pub fn publish(&self, event: SessionEvent) -> usize {
        match self.tx.send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(event)) => {
                debug!(?event, "no session event listeners");
                0
            }
        }
    }

    /// Start listening.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_listeners_is_fine() {
        let events = SessionEvents::default();
        assert_eq!(events.publish(SessionEvent::SignedOut), 0);
    }

    #[tokio::test]
    async fn every_listener_receives() {
        let events = SessionEvents::default();
        let mut a = events.subscribe();
        let mut b = events.clone().subscribe();
        let delivered = events.publish(SessionEvent::Expired {
            reason: "handshake rejected with HTTP 401".into(),
        });
        assert_eq!(delivered, 2);
        assert_eq!(a.recv().await.unwrap(), b.recv().await.unwrap());
    }
}
