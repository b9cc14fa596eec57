//! Sync Coordinator
//!
//! Decides per operation whether to hit the remote store, the local store
//! or the cache, and throttles writes.
//!
//! # Routing
//!
//! - No identity: every call goes to the local store
//! - Signed in: cache (reads only), then remote; a remote failure is
//!   logged and the call is served by the local store instead
//!
//! River and settings writes are debounced through [`WriteQueue`]s; the
//! `*_now` variants bypass the window and supersede anything staged. A river
//! delete travels through the same queue as its saves, so a save already
//! in flight lands before it and any older save is dropped after it.

use crate::cache::SyncCache;
use crate::cipher::{EncryptedApiKeys, KeyCipher, PassthroughCipher};
use crate::error::{SyncError, SyncResult};
use crate::identity::{Identity, IdentityGate, IdentityProvider};
use crate::local::LocalStore;
use crate::queue::{ApplyFn, WriteQueue};
use crate::remote::{MemoryRemoteStore, PreferencesDoc, RemoteStore};
use futures::FutureExt;
use river_tree::{River, RiverId, RiverSummary, Settings};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Sync timing and cache sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub river_debounce_ms: u64,
    pub settings_debounce_ms: u64,
    pub settings_ttl_secs: u64,
    pub list_ttl_secs: u64,
    pub cache_capacity: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            river_debounce_ms: 1_000,
            settings_debounce_ms: 2_000,
            settings_ttl_secs: 5 * 60,
            list_ttl_secs: 10 * 60,
            cache_capacity: 64,
        }
    }
}

impl SyncConfig {
    #[inline]
    #[must_use]
    pub fn river_debounce(&self) -> Duration {
        Duration::from_millis(self.river_debounce_ms)
    }

    #[inline]
    #[must_use]
    pub fn settings_debounce(&self) -> Duration {
        Duration::from_millis(self.settings_debounce_ms)
    }

    #[inline]
    #[must_use]
    pub fn settings_ttl(&self) -> Duration {
        Duration::from_secs(self.settings_ttl_secs)
    }

    #[inline]
    #[must_use]
    pub fn list_ttl(&self) -> Duration {
        Duration::from_secs(self.list_ttl_secs)
    }
}

/// What a migration copied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MigrationReport {
    pub rivers_copied: usize,
    /// Local rivers already present remotely
    pub rivers_skipped: usize,
    pub keys_copied: bool,
}

/// One write to a river document
#[derive(Debug, Clone)]
enum RiverWrite {
    Save(River),
    Delete,
}

/// Backing stores shared by the coordinator and its write queues
struct Stores {
    identity: Arc<dyn IdentityProvider>,
    remote: Arc<dyn RemoteStore>,
    local: Arc<LocalStore>,
    cipher: Arc<dyn KeyCipher>,
    cache: SyncCache,
}

/// Sync Coordinator
#[derive(Clone)]
pub struct SyncCoordinator {
    stores: Arc<Stores>,
    rivers: WriteQueue<RiverId, RiverWrite>,
    settings: WriteQueue<(), Settings>,
}

impl SyncCoordinator {
    /// Coordinator with a remote store behind an identity
    #[must_use]
    pub fn new(
        config: &SyncConfig,
        identity: Arc<dyn IdentityProvider>,
        remote: Arc<dyn RemoteStore>,
        local: Arc<LocalStore>,
        cipher: Arc<dyn KeyCipher>,
    ) -> Self {
        let stores = Arc::new(Stores {
            identity,
            remote,
            local,
            cipher,
            cache: SyncCache::new(
                config.cache_capacity,
                config.settings_ttl(),
                config.list_ttl(),
            ),
        });

        let river_writer: ApplyFn<RiverId, RiverWrite> = {
            let stores = Arc::clone(&stores);
            Arc::new(move |id, write| {
                let stores = Arc::clone(&stores);
                async move {
                    match write {
                        RiverWrite::Save(river) => stores.save_river(&river).await,
                        RiverWrite::Delete => stores.delete_river(id).await,
                    }
                }
                .boxed()
            })
        };
        let settings_writer: ApplyFn<(), Settings> = {
            let stores = Arc::clone(&stores);
            Arc::new(move |(), settings| {
                let stores = Arc::clone(&stores);
                async move { stores.save_settings(&settings).await }.boxed()
            })
        };

        Self {
            rivers: WriteQueue::new(config.river_debounce(), river_writer),
            settings: WriteQueue::new(config.settings_debounce(), settings_writer),
            stores,
        }
    }

    /// Anonymous coordinator: everything stays local
    #[must_use]
    pub fn offline(config: &SyncConfig, local: Arc<LocalStore>) -> Self {
        Self::new(
            config,
            Arc::new(IdentityGate::resolved(None)),
            Arc::new(MemoryRemoteStore::new()),
            local,
            Arc::new(PassthroughCipher),
        )
    }

    #[inline]
    #[must_use]
    pub fn local(&self) -> &Arc<LocalStore> {
        &self.stores.local
    }

    /// River summaries, newest first
    pub async fn list_rivers(&self, force_refresh: bool) -> Vec<RiverSummary> {
        self.stores.list_rivers(force_refresh).await
    }

    pub async fn get_river(&self, id: RiverId) -> Option<River> {
        self.stores.get_river(id).await
    }

    /// Stage a river snapshot behind the river debounce window
    pub fn schedule_river_save(&self, river: River) -> u64 {
        self.rivers.schedule(river.id, RiverWrite::Save(river))
    }

    /// Write a river snapshot now
    pub async fn save_river_now(&self, river: River) -> bool {
        self.rivers.immediate(river.id, RiverWrite::Save(river)).await
    }

    /// Apply the staged write for one river now, if any
    pub async fn flush_river(&self, id: RiverId) -> bool {
        self.rivers.flush_key(&id).await
    }

    /// Delete a river
    ///
    /// Drops any staged write for it and waits for one already in flight;
    /// saves staged before the delete can no longer land.
    pub async fn delete_river(&self, id: RiverId) {
        self.rivers.immediate(id, RiverWrite::Delete).await;
    }

    pub async fn get_settings(&self, force_refresh: bool) -> Settings {
        self.stores.get_settings(force_refresh).await
    }

    /// Stage settings behind the settings debounce window
    pub fn schedule_settings_save(&self, settings: Settings) -> u64 {
        self.settings.schedule((), settings)
    }

    /// Write settings now; a staged settings write is discarded
    pub async fn save_settings_now(&self, settings: Settings) -> bool {
        self.settings.immediate((), settings).await
    }

    /// Number of writes waiting on a debounce window
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.rivers.pending() + self.settings.pending()
    }

    /// Apply every staged write now
    pub async fn flush(&self) -> usize {
        let rivers = self.rivers.flush().await;
        let settings = self.settings.flush().await;
        tracing::debug!(rivers, settings, "flushed pending writes");
        rivers + settings
    }

    /// Copy local data to the remote store for a newly signed-in identity
    ///
    /// Only records absent remotely are copied; remote data always wins.
    ///
    /// # Errors
    /// - `NoIdentity` if nobody is signed in
    /// - `Remote` if the remote store fails; nothing is rolled back
    pub async fn migrate_local_data(&self) -> SyncResult<MigrationReport> {
        let identity = self
            .stores
            .identity
            .current()
            .await
            .ok_or(SyncError::NoIdentity)?;
        let report = self.stores.migrate(&identity).await?;
        self.stores.cache.invalidate(&identity.uid).await;
        tracing::info!(
            uid = %identity,
            rivers_copied = report.rivers_copied,
            rivers_skipped = report.rivers_skipped,
            keys_copied = report.keys_copied,
            "local data migrated"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("rivers", &self.rivers)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn summaries_newest_first(rivers: &[River]) -> Vec<RiverSummary> {
    let mut summaries: Vec<RiverSummary> = rivers.iter().map(River::summary).collect();
    summaries.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
    summaries
}

fn log_local(result: SyncResult<()>, what: &'static str) {
    if let Err(err) = result {
        tracing::error!(error = %err, what, "local store write failed");
    }
}

impl Stores {
    async fn list_rivers(&self, force_refresh: bool) -> Vec<RiverSummary> {
        let Some(identity) = self.identity.current().await else {
            return summaries_newest_first(&self.local.rivers());
        };
        if !force_refresh {
            if let Some(cached) = self.cache.summaries(&identity.uid).await {
                return cached.as_ref().clone();
            }
        }
        match self.remote.list_rivers(&identity.uid).await {
            Ok(rivers) => {
                let summaries = summaries_newest_first(&rivers);
                self.cache
                    .put_summaries(&identity.uid, summaries.clone())
                    .await;
                summaries
            }
            Err(err) => {
                tracing::warn!(error = %err, "listing rivers remotely failed; using local store");
                summaries_newest_first(&self.local.rivers())
            }
        }
    }

    async fn get_river(&self, id: RiverId) -> Option<River> {
        let Some(identity) = self.identity.current().await else {
            return self.local.river(id);
        };
        match self.remote.get_river(&identity.uid, id).await {
            Ok(river) => river,
            Err(err) => {
                tracing::warn!(river = %id, error = %err, "remote read failed; using local store");
                self.local.river(id)
            }
        }
    }

    async fn save_river(&self, river: &River) {
        let Some(identity) = self.identity.current().await else {
            log_local(self.local.save_river(river), "river");
            return;
        };
        match self.remote.put_river(&identity.uid, river).await {
            Ok(()) => {
                self.cache.invalidate_summaries(&identity.uid).await;
                tracing::debug!(river = %river.id, nodes = river.nodes.len(), "river saved");
            }
            Err(err) => {
                tracing::warn!(river = %river.id, error = %err, "remote write failed; saving locally");
                log_local(self.local.save_river(river), "river");
            }
        }
    }

    async fn delete_river(&self, id: RiverId) {
        let Some(identity) = self.identity.current().await else {
            log_local(self.local.delete_river(id), "river delete");
            return;
        };
        match self.remote.delete_river(&identity.uid, id).await {
            Ok(()) => self.cache.invalidate_summaries(&identity.uid).await,
            Err(err) => {
                tracing::warn!(river = %id, error = %err, "remote delete failed; deleting locally");
                log_local(self.local.delete_river(id), "river delete");
            }
        }
    }

    async fn get_settings(&self, force_refresh: bool) -> Settings {
        let Some(identity) = self.identity.current().await else {
            return self.local.settings();
        };
        if !force_refresh {
            if let Some(cached) = self.cache.settings(&identity.uid).await {
                return cached;
            }
        }
        match self.fetch_settings(&identity).await {
            Ok(Some(settings)) => {
                self.cache
                    .put_settings(&identity.uid, settings.clone())
                    .await;
                settings
            }
            Ok(None) => Settings::default(),
            Err(err) => {
                tracing::warn!(error = %err, "remote settings read failed; using local store");
                self.local.settings()
            }
        }
    }

    /// Keys come from the profile, falling back to legacy keys in the
    /// preferences document. `None` when neither document exists.
    async fn fetch_settings(&self, identity: &Identity) -> SyncResult<Option<Settings>> {
        let profile = self.remote.get_profile(&identity.uid).await?;
        let prefs = self.remote.get_preferences(&identity.uid).await?;
        let profile_keys = profile.and_then(|p| p.encrypted_api_keys);
        if profile_keys.is_none() && prefs.is_none() {
            return Ok(None);
        }

        let prefs = prefs.unwrap_or_default();
        let sealed = profile_keys.or_else(|| prefs.legacy_api_keys.clone());
        let api_keys = sealed
            .map(|keys| keys.open(self.cipher.as_ref(), &identity.uid))
            .unwrap_or_default();

        Ok(Some(Settings {
            api_keys,
            last_used_model: prefs.last_used_model,
            enabled_models: prefs.enabled_models,
            last_chat_selected_models: prefs.last_chat_selected_models,
            available_models: prefs.available_models,
        }))
    }

    async fn save_settings(&self, settings: &Settings) {
        let Some(identity) = self.identity.current().await else {
            log_local(self.local.save_settings(settings), "settings");
            return;
        };
        match self.push_settings(&identity, settings).await {
            Ok(()) => {
                self.cache
                    .put_settings(&identity.uid, settings.clone())
                    .await;
                tracing::debug!(uid = %identity, "settings saved");
            }
            Err(err) => {
                tracing::warn!(error = %err, "remote settings write failed; saving locally");
                log_local(self.local.save_settings(settings), "settings");
            }
        }
    }

    async fn push_settings(&self, identity: &Identity, settings: &Settings) -> SyncResult<()> {
        let sealed = EncryptedApiKeys::seal(&settings.api_keys, self.cipher.as_ref(), &identity.uid);
        self.remote.put_encrypted_keys(&identity.uid, sealed).await?;
        let prefs = PreferencesDoc {
            last_used_model: settings.last_used_model.clone(),
            enabled_models: settings.enabled_models.clone(),
            last_chat_selected_models: settings.last_chat_selected_models.clone(),
            available_models: settings.available_models.clone(),
            legacy_api_keys: None,
        };
        self.remote.put_preferences(&identity.uid, &prefs).await
    }

    async fn migrate(&self, identity: &Identity) -> SyncResult<MigrationReport> {
        let local = self.local.snapshot();
        let mut report = MigrationReport::default();
        if local.rivers.is_empty() && !local.settings.api_keys.has_any() {
            tracing::debug!("nothing to migrate");
            return Ok(report);
        }

        for river in &local.rivers {
            if self.remote.get_river(&identity.uid, river.id).await?.is_some() {
                report.rivers_skipped += 1;
            } else {
                self.remote.put_river(&identity.uid, river).await?;
                report.rivers_copied += 1;
            }
        }

        let remote_has_keys = self
            .remote
            .get_profile(&identity.uid)
            .await?
            .and_then(|p| p.encrypted_api_keys)
            .is_some_and(|keys| !keys.is_empty());
        if remote_has_keys {
            tracing::info!("remote already holds API keys; keeping them");
        } else if local.settings.api_keys.has_any() {
            let sealed =
                EncryptedApiKeys::seal(&local.settings.api_keys, self.cipher.as_ref(), &identity.uid);
            self.remote.put_encrypted_keys(&identity.uid, sealed).await?;

            let mut prefs = self
                .remote
                .get_preferences(&identity.uid)
                .await?
                .unwrap_or_default();
            if prefs.last_used_model.is_none() {
                prefs.last_used_model = local.settings.last_used_model.clone();
            }
            for (model, enabled) in &local.settings.enabled_models {
                prefs.enabled_models.entry(model.clone()).or_insert(*enabled);
            }
            self.remote.put_preferences(&identity.uid, &prefs).await?;
            report.keys_copied = true;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timings() {
        let config = SyncConfig::default();
        assert_eq!(config.river_debounce(), Duration::from_secs(1));
        assert_eq!(config.settings_debounce(), Duration::from_secs(2));
        assert_eq!(config.settings_ttl(), Duration::from_secs(300));
        assert_eq!(config.list_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn summaries_sorted_newest_first() {
        let older = River::new("older");
        let mut newer = River::new("newer");
        newer.last_modified = older.last_modified + chrono::Duration::seconds(5);

        let sorted = summaries_newest_first(&[older, newer]);
        assert_eq!(sorted[0].name, "newer");
        assert_eq!(sorted[1].name, "older");
    }
}
