//! Remote authoritative store
//!
//! Document layout per identity:
//! - one river document per river, node map inlined
//! - a profile document holding the encrypted API keys
//! - a preferences document holding non-secret settings

use crate::cipher::EncryptedApiKeys;
use crate::error::{SyncError, SyncResult};
use dashmap::DashMap;
use river_tree::{ModelRef, River, RiverId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Per-identity profile document
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileDoc {
    pub encrypted_api_keys: Option<EncryptedApiKeys>,
}

/// Per-identity preferences document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreferencesDoc {
    pub last_used_model: Option<ModelRef>,
    pub enabled_models: BTreeMap<String, bool>,
    pub last_chat_selected_models: Vec<ModelRef>,
    pub available_models: Vec<ModelRef>,
    /// Keys written here by older clients; read-only fallback
    #[serde(rename = "apiKeys", skip_serializing_if = "Option::is_none")]
    pub legacy_api_keys: Option<EncryptedApiKeys>,
}

/// Remote document store
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_rivers(&self, uid: &str) -> SyncResult<Vec<River>>;
    async fn get_river(&self, uid: &str, id: RiverId) -> SyncResult<Option<River>>;
    async fn put_river(&self, uid: &str, river: &River) -> SyncResult<()>;
    async fn delete_river(&self, uid: &str, id: RiverId) -> SyncResult<()>;

    async fn get_profile(&self, uid: &str) -> SyncResult<Option<ProfileDoc>>;
    async fn put_encrypted_keys(&self, uid: &str, keys: EncryptedApiKeys) -> SyncResult<()>;

    async fn get_preferences(&self, uid: &str) -> SyncResult<Option<PreferencesDoc>>;
    async fn put_preferences(&self, uid: &str, prefs: &PreferencesDoc) -> SyncResult<()>;
}

/// In-process remote store
///
/// Can be switched offline to exercise the fallback paths.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    rivers: DashMap<(String, RiverId), River>,
    profiles: DashMap<String, ProfileDoc>,
    preferences: DashMap<String, PreferencesDoc>,
    offline: AtomicBool,
    river_writes: AtomicUsize,
    settings_writes: AtomicUsize,
}

impl MemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of river documents written so far
    #[inline]
    #[must_use]
    pub fn river_writes(&self) -> usize {
        self.river_writes.load(Ordering::SeqCst)
    }

    /// Number of preference documents written so far
    #[inline]
    #[must_use]
    pub fn settings_writes(&self) -> usize {
        self.settings_writes.load(Ordering::SeqCst)
    }

    /// Seed a river without counting a write
    pub fn insert_river(&self, uid: &str, river: River) {
        self.rivers.insert((uid.to_string(), river.id), river);
    }

    /// Seed preferences without counting a write
    pub fn insert_preferences(&self, uid: &str, prefs: PreferencesDoc) {
        self.preferences.insert(uid.to_string(), prefs);
    }

    fn check(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(SyncError::remote("remote store unreachable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn list_rivers(&self, uid: &str) -> SyncResult<Vec<River>> {
        self.check()?;
        Ok(self
            .rivers
            .iter()
            .filter(|entry| entry.key().0 == uid)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get_river(&self, uid: &str, id: RiverId) -> SyncResult<Option<River>> {
        self.check()?;
        Ok(self
            .rivers
            .get(&(uid.to_string(), id))
            .map(|entry| entry.value().clone()))
    }

    async fn put_river(&self, uid: &str, river: &River) -> SyncResult<()> {
        self.check()?;
        self.rivers.insert((uid.to_string(), river.id), river.clone());
        self.river_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_river(&self, uid: &str, id: RiverId) -> SyncResult<()> {
        self.check()?;
        self.rivers.remove(&(uid.to_string(), id));
        Ok(())
    }

    async fn get_profile(&self, uid: &str) -> SyncResult<Option<ProfileDoc>> {
        self.check()?;
        Ok(self.profiles.get(uid).map(|entry| entry.value().clone()))
    }

    async fn put_encrypted_keys(&self, uid: &str, keys: EncryptedApiKeys) -> SyncResult<()> {
        self.check()?;
        self.profiles
            .entry(uid.to_string())
            .or_default()
            .encrypted_api_keys = Some(keys);
        Ok(())
    }

    async fn get_preferences(&self, uid: &str) -> SyncResult<Option<PreferencesDoc>> {
        self.check()?;
        Ok(self.preferences.get(uid).map(|entry| entry.value().clone()))
    }

    async fn put_preferences(&self, uid: &str, prefs: &PreferencesDoc) -> SyncResult<()> {
        self.check()?;
        self.preferences.insert(uid.to_string(), prefs.clone());
        self.settings_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rivers_are_scoped_per_identity() {
        let store = MemoryRemoteStore::new();
        let river = River::new("mine");
        store.put_river("a", &river).await.unwrap();

        assert_eq!(store.list_rivers("a").await.unwrap().len(), 1);
        assert!(store.list_rivers("b").await.unwrap().is_empty());
        assert!(store.get_river("b", river.id).await.unwrap().is_none());
        assert_eq!(store.river_writes(), 1);
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemoryRemoteStore::new();
        store.set_offline(true);
        assert!(store.get_profile("a").await.is_err());
        assert!(store.put_river("a", &River::new("x")).await.is_err());
        assert_eq!(store.river_writes(), 0);

        store.set_offline(false);
        assert!(store.get_profile("a").await.unwrap().is_none());
    }

    #[test]
    fn legacy_keys_read_from_api_keys_field() {
        let json = r#"{"enabledModels":{"a/b":true},"apiKeys":{"openrouter":"sealed"}}"#;
        let prefs: PreferencesDoc = serde_json::from_str(json).unwrap();
        assert_eq!(prefs.enabled_models.get("a/b"), Some(&true));
        assert_eq!(
            prefs.legacy_api_keys.map(|k| k.openrouter),
            Some("sealed".to_string())
        );
    }
}
