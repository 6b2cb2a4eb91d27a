//! Subscription topics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Channel path a client subscribes to, e.g. `/ws/notifications/`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Channel path for a feature name.
    pub fn for_feature(feature: &str) -> Self {
        let feature = feature.trim_matches('/');
        Self(format!("/ws/{feature}/"))
    }

    /// Borrow the path.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join onto a base URL such as `wss://api.example.com`.
    pub fn url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.0)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The topic is a function of the auth flag alone: a fixed path when
/// authenticated, `None` otherwise.
pub fn topic_for(authenticated: bool, feature: &str) -> Option<Topic> {
    authenticated.then(|| Topic::for_feature(feature))
}
