//! Short-lived read caches using moka
//!
//! Keyed by identity uid, so switching accounts never serves another
//! identity's data. Entries expire after a per-entity TTL and are
//! invalidated on every write that could change them.

use moka::future::Cache;
use river_tree::{RiverSummary, Settings};
use std::sync::Arc;
use std::time::Duration;

/// Settings and river-list caches
#[derive(Debug, Clone)]
pub struct SyncCache {
    settings: Cache<String, Settings>,
    summaries: Cache<String, Arc<Vec<RiverSummary>>>,
}

impl SyncCache {
    /// Create caches with their TTLs
    #[must_use]
    pub fn new(capacity: u64, settings_ttl: Duration, list_ttl: Duration) -> Self {
        Self {
            settings: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(settings_ttl)
                .build(),
            summaries: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(list_ttl)
                .build(),
        }
    }

    #[inline]
    pub async fn settings(&self, uid: &str) -> Option<Settings> {
        self.settings.get(uid).await
    }

    #[inline]
    pub async fn put_settings(&self, uid: &str, settings: Settings) {
        self.settings.insert(uid.to_string(), settings).await;
    }

    #[inline]
    pub async fn summaries(&self, uid: &str) -> Option<Arc<Vec<RiverSummary>>> {
        self.summaries.get(uid).await
    }

    #[inline]
    pub async fn put_summaries(&self, uid: &str, summaries: Vec<RiverSummary>) {
        self.summaries
            .insert(uid.to_string(), Arc::new(summaries))
            .await;
    }

    #[inline]
    pub async fn invalidate_summaries(&self, uid: &str) {
        self.summaries.invalidate(uid).await;
    }

    /// Drop everything cached for `uid`
    pub async fn invalidate(&self, uid: &str) {
        self.settings.invalidate(uid).await;
        self.summaries.invalidate(uid).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use river_tree::River;

    #[tokio::test]
    async fn entries_are_per_identity() {
        let cache = SyncCache::new(16, Duration::from_secs(60), Duration::from_secs(60));
        cache.put_summaries("a", vec![River::new("r").summary()]).await;

        assert_eq!(cache.summaries("a").await.map(|s| s.len()), Some(1));
        assert!(cache.summaries("b").await.is_none());

        cache.invalidate("a").await;
        assert!(cache.summaries("a").await.is_none());
    }

    #[tokio::test]
    async fn settings_expire_after_ttl() {
        let cache = SyncCache::new(16, Duration::from_millis(50), Duration::from_secs(60));
        cache.put_settings("a", Settings::default()).await;
        assert!(cache.settings("a").await.is_some());

        // moka keeps its own clock; wait in real time
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.settings("a").await.is_none());
    }
}
