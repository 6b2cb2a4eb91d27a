//! Client data cache seam.
//!
//! The dispatcher only ever calls [`QueryCache::invalidate`]. Invalidation is
//! idempotent: marking a region stale twice before the next read still costs
//! one refetch.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

/// Name of a group of cached query results that are invalidated together.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheRegion(Cow<'static, str>);

impl CacheRegion {
    /// Region with a static name.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Region with an owned name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Region name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Regions touched by challenge events.
pub mod regions {
    use super::CacheRegion;

    /// The user's challenge list.
    pub const CHALLENGES: CacheRegion = CacheRegion::from_static("challenges");
    /// Invites waiting for an answer.
    pub const CHALLENGE_INVITES: CacheRegion = CacheRegion::from_static("challenge_invites");
    /// Challenges currently being played.
    pub const ACTIVE_CHALLENGES: CacheRegion = CacheRegion::from_static("active_challenges");
}

/// The cache operation the live channel needs.
pub trait QueryCache: Send + Sync {
    /// Mark a region stale so its next read refetches.
    fn invalidate(&self, region: &CacheRegion);
}

#[derive(Debug, Default)]
struct Entry {
    value: Option<Value>,
    stale: bool,
    invalidations: u64,
}

/// In-process cache of JSON query results keyed by region.
#[derive(Debug, Default)]
pub struct InMemoryQueryCache {
    entries: DashMap<CacheRegion, Entry>,
}

impl InMemoryQueryCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fresh value.
    pub fn put(&self, region: CacheRegion, value: Value) {
        let mut entry = self.entries.entry(region).or_default();
        entry.value = Some(value);
        entry.stale = false;
    }

    /// Fresh value for a region, or `None` if missing or stale.
    pub fn get(&self, region: &CacheRegion) -> Option<Value> {
        let entry = self.entries.get(region)?;
        if entry.stale {
            return None;
        }
        entry.value.clone()
    }

    /// Whether the region has been invalidated since its last fetch.
    pub fn is_stale(&self, region: &CacheRegion) -> bool {
        self.entries.get(region).is_some_and(|e| e.stale)
    }

    /// How many times the region was invalidated, collapsed or not.
    pub fn invalidation_count(&self, region: &CacheRegion) -> u64 {
        self.entries.get(region).map_or(0, |e| e.invalidations)
    }

    /// All regions currently marked stale, sorted by name.
    pub fn stale_regions(&self) -> Vec<CacheRegion> {
        let mut stale: Vec<CacheRegion> = self
            .entries
            .iter()
            .filter(|e| e.stale)
            .map(|e| e.key().clone())
            .collect();
        stale.sort();
        stale
    }

    /// Return the cached value, fetching and storing it when missing or stale.
    pub async fn get_or_fetch<F, Fut, E>(&self, region: &CacheRegion, fetch: F) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(value) = self.get(region) {
            return Ok(value);
        }
        debug!(region = %region, "cache miss, refetching");
        let value = fetch().await?;
        self.put(region.clone(), value.clone());
        Ok(value)
    }
}

impl QueryCache for InMemoryQueryCache {
    fn invalidate(&self, region: &CacheRegion) {
        let mut entry = self.entries.entry(region.clone()).or_default();
        entry.stale = true;
        entry.invalidations += 1;
        debug!(region = %region, "cache region invalidated");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::regions::CHALLENGES;
    use super::*;

    #[test]
    fn put_then_get() {
        let cache = InMemoryQueryCache::new();
        cache.put(CHALLENGES, json!([1, 2]));
        assert_eq!(cache.get(&CHALLENGES), Some(json!([1, 2])));
        assert!(!cache.is_stale(&CHALLENGES));
    }

    #[test]
    fn invalidate_hides_value() {
        let cache = InMemoryQueryCache::new();
        cache.put(CHALLENGES, json!([1]));
        cache.invalidate(&CHALLENGES);
        assert!(cache.is_stale(&CHALLENGES));
        assert_eq!(cache.get(&CHALLENGES), None);
    }

    #[test]
    fn invalidate_unknown_region_marks_stale() {
        let cache = InMemoryQueryCache::new();
        let region = CacheRegion::new("leaderboard");
        cache.invalidate(&region);
        assert_eq!(cache.stale_regions(), vec![region]);
    }

    #[test]
    fn region_names_compare_across_storage() {
        assert_eq!(CacheRegion::new("challenges"), CHALLENGES);
        assert_eq!(CHALLENGES.to_string(), "challenges");
    }

    #[tokio::test]
    async fn repeated_invalidations_collapse_to_one_refetch() {
        let cache = InMemoryQueryCache::new();
        let fetches = AtomicUsize::new(0);
        cache.put(CHALLENGES, json!(["old"]));

        for _ in 0..3 {
            cache.invalidate(&CHALLENGES);
        }
        assert_eq!(cache.invalidation_count(&CHALLENGES), 3);

        for _ in 0..2 {
            let value = cache
                .get_or_fetch(&CHALLENGES, || async {
                    let _ = fetches.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(json!(["new"]))
                })
                .await
                .unwrap();
            assert_eq!(value, json!(["new"]));
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(cache.stale_regions().is_empty());
    }

    #[tokio::test]
    async fn failed_refetch_stays_stale() {
        let cache = InMemoryQueryCache::new();
        cache.invalidate(&CHALLENGES);
        let result = cache
            .get_or_fetch(&CHALLENGES, || async { Err::<Value, _>("offline") })
            .await;
        assert_eq!(result.unwrap_err(), "offline");
        assert!(cache.is_stale(&CHALLENGES));
    }
}
