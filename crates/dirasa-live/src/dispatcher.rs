//! Notification dispatcher.
//!
//! Turns each new "last message" into side effects: one alert, plus a set of
//! stale cache regions. Rules are keyed by wire kind; kinds without a rule are
//! ignored.

use std::collections::HashMap;
use std::sync::Arc;

use dirasa_core::{InboundMessage, Locale, MessageKind};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::alerts::{Alert, AlertLevel, AlertSink};
use crate::cache::{CacheRegion, QueryCache, regions};
use crate::connection::LastMessage;

/// Renders alert text for a message.
pub type RenderFn = Arc<dyn Fn(&InboundMessage, Locale) -> String + Send + Sync>;

/// What to do when a message of some kind arrives.
#[derive(Clone)]
pub struct DispatchRule {
    /// Alert level.
    pub level: AlertLevel,
    /// Regions to mark stale.
    pub regions: Vec<CacheRegion>,
    /// Alert text.
    pub render: RenderFn,
}

impl DispatchRule {
    /// Rule from a level, regions and a renderer.
    pub fn new<F>(level: AlertLevel, regions: Vec<CacheRegion>, render: F) -> Self
    where
        F: Fn(&InboundMessage, Locale) -> String + Send + Sync + 'static,
    {
        Self {
            level,
            regions,
            render: Arc::new(render),
        }
    }
}

impl std::fmt::Debug for DispatchRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRule")
            .field("level", &self.level)
            .field("regions", &self.regions)
            .finish_non_exhaustive()
    }
}

/// Result of handing one message to the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// An alert was shown and these regions invalidated.
    Dispatched {
        /// Regions marked stale.
        regions: Vec<CacheRegion>,
    },
    /// The same message object was already processed.
    AlreadySeen,
    /// No rule for this kind.
    Ignored,
}

/// Routes messages to alerts and cache invalidations.
pub struct NotificationDispatcher {
    rules: HashMap<String, DispatchRule>,
    alerts: Arc<dyn AlertSink>,
    cache: Arc<dyn QueryCache>,
    locale: Locale,
    last_seen: Mutex<Option<Arc<InboundMessage>>>,
}

impl NotificationDispatcher {
    /// Dispatcher with the challenge notification rules installed.
    pub fn new(alerts: Arc<dyn AlertSink>, cache: Arc<dyn QueryCache>, locale: Locale) -> Self {
        let mut dispatcher = Self::empty(alerts, cache, locale);
        for (kind, rule) in challenge_rules() {
            dispatcher.register(kind.as_wire(), rule);
        }
        dispatcher
    }

    /// Dispatcher with no rules.
    pub fn empty(alerts: Arc<dyn AlertSink>, cache: Arc<dyn QueryCache>, locale: Locale) -> Self {
        Self {
            rules: HashMap::new(),
            alerts,
            cache,
            locale,
            last_seen: Mutex::new(None),
        }
    }

    /// Add or replace the rule for a wire kind.
    pub fn register(&mut self, kind: impl Into<String>, rule: DispatchRule) {
        let _ = self.rules.insert(kind.into(), rule);
    }

    /// Whether a rule exists for the wire kind.
    pub fn handles(&self, kind: &str) -> bool {
        self.rules.contains_key(kind)
    }

    /// Locale used for alert text.
    pub fn locale(&self) -> Locale {
        self.locale
    }

    /// Process one message. The same `Arc` handed in twice in a row is only
    /// processed the first time; equal content in a new `Arc` is processed again.
    pub fn dispatch(&self, message: &Arc<InboundMessage>) -> DispatchOutcome {
        {
            let mut last = self.last_seen.lock();
            if last.as_ref().is_some_and(|seen| Arc::ptr_eq(seen, message)) {
                trace!(kind = %message.kind, "message already dispatched");
                return DispatchOutcome::AlreadySeen;
            }
            *last = Some(Arc::clone(message));
        }

        let Some(rule) = self.rules.get(&message.kind) else {
            trace!(kind = %message.kind, "no rule for message kind");
            return DispatchOutcome::Ignored;
        };

        let text = (rule.render)(message, self.locale);
        self.alerts.show(Alert::new(rule.level, message.kind.clone(), text));
        for region in &rule.regions {
            self.cache.invalidate(region);
        }
        debug!(
            kind = %message.kind,
            regions = rule.regions.len(),
            "notification dispatched"
        );
        DispatchOutcome::Dispatched {
            regions: rule.regions.clone(),
        }
    }

    /// Dispatch the current value and then every change until the sender is
    /// dropped. Values overwritten before they were observed are skipped.
    pub async fn run(&self, mut messages: watch::Receiver<LastMessage>) {
        loop {
            let current = messages.borrow_and_update().clone();
            if let Some(message) = current {
                let _ = self.dispatch(&message);
            }
            if messages.changed().await.is_err() {
                debug!("message channel closed, dispatcher stopping");
                return;
            }
        }
    }

    /// Run on a new task.
    pub fn spawn(self: Arc<Self>, messages: watch::Receiver<LastMessage>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(messages).await })
    }
}

fn name_or_someone<'a>(message: &'a InboundMessage, path: &[&str], locale: Locale) -> &'a str {
    match message.payload_str(path).map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => name,
        None => match locale {
            Locale::En => "Someone",
            Locale::Ar => "أحدهم",
        },
    }
}

fn challenge_rules() -> Vec<(MessageKind, DispatchRule)> {
    use regions::{ACTIVE_CHALLENGES, CHALLENGES, CHALLENGE_INVITES};

    vec![
        (
            MessageKind::NewChallengeInvite,
            DispatchRule::new(
                AlertLevel::Info,
                vec![CHALLENGES, CHALLENGE_INVITES],
                |m, locale| {
                    let name = name_or_someone(m, &["challenger", "username"], locale);
                    match locale {
                        Locale::En => format!("{name} challenged you to a quiz"),
                        Locale::Ar => format!("{name} تحدّاك في اختبار"),
                    }
                },
            ),
        ),
        (
            MessageKind::ChallengeAccepted,
            DispatchRule::new(
                AlertLevel::Success,
                vec![CHALLENGES, ACTIVE_CHALLENGES],
                |m, locale| {
                    let name = name_or_someone(m, &["accepted_by"], locale);
                    match locale {
                        Locale::En => format!("{name} accepted your challenge"),
                        Locale::Ar => format!("{name} قبل تحدّيك"),
                    }
                },
            ),
        ),
        (
            MessageKind::ChallengeDeclined,
            DispatchRule::new(AlertLevel::Warning, vec![CHALLENGES], |m, locale| {
                let name = name_or_someone(m, &["declined_by"], locale);
                match locale {
                    Locale::En => format!("{name} declined your challenge"),
                    Locale::Ar => format!("{name} رفض تحدّيك"),
                }
            }),
        ),
        (
            MessageKind::ChallengeCancelled,
            DispatchRule::new(
                AlertLevel::Info,
                vec![CHALLENGES, CHALLENGE_INVITES],
                |m, locale| {
                    let name = name_or_someone(m, &["cancelled_by"], locale);
                    match locale {
                        Locale::En => format!("{name} cancelled the challenge"),
                        Locale::Ar => format!("{name} ألغى التحدّي"),
                    }
                },
            ),
        ),
    ]
}
