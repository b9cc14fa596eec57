//! Local fallback store
//!
//! A single JSON document holding every river, the settings and the active
//! river id. Canonical for anonymous use and the landing spot for failed
//! remote writes. When file-backed, every mutation rewrites the file via a
//! temp file and rename.

use crate::error::SyncResult;
use parking_lot::Mutex;
use river_tree::{River, RiverId, Settings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persisted local document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalData {
    pub rivers: Vec<River>,
    pub settings: Settings,
    pub active_river_id: Option<RiverId>,
}

/// Local store
#[derive(Debug)]
pub struct LocalStore {
    path: Option<PathBuf>,
    data: Mutex<LocalData>,
}

impl LocalStore {
    /// Memory-only store
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(LocalData::default()),
        }
    }

    /// File-backed store; a missing file starts empty
    ///
    /// # Errors
    /// `Local` if the file exists but cannot be read or parsed
    pub fn open(path: impl Into<PathBuf>) -> SyncResult<Self> {
        let path = path.into();
        let data = if path.exists() {
            let raw = std::fs::read(&path)?;
            serde_json::from_slice(&raw)?
        } else {
            LocalData::default()
        };
        tracing::debug!(path = %path.display(), "local store opened");
        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Copy of the whole document
    #[must_use]
    pub fn snapshot(&self) -> LocalData {
        self.data.lock().clone()
    }

    #[must_use]
    pub fn rivers(&self) -> Vec<River> {
        self.data.lock().rivers.clone()
    }

    #[must_use]
    pub fn river(&self, id: RiverId) -> Option<River> {
        self.data.lock().rivers.iter().find(|r| r.id == id).cloned()
    }

    /// Insert or replace by id
    ///
    /// # Errors
    /// `Local` if the file cannot be written
    pub fn save_river(&self, river: &River) -> SyncResult<()> {
        self.mutate(|data| {
            match data.rivers.iter_mut().find(|r| r.id == river.id) {
                Some(slot) => *slot = river.clone(),
                None => data.rivers.push(river.clone()),
            }
        })
    }

    /// Remove a river; clears the active id if it pointed there
    ///
    /// # Errors
    /// `Local` if the file cannot be written
    pub fn delete_river(&self, id: RiverId) -> SyncResult<()> {
        self.mutate(|data| {
            data.rivers.retain(|r| r.id != id);
            if data.active_river_id == Some(id) {
                data.active_river_id = None;
            }
        })
    }

    #[must_use]
    pub fn settings(&self) -> Settings {
        self.data.lock().settings.clone()
    }

    /// # Errors
    /// `Local` if the file cannot be written
    pub fn save_settings(&self, settings: &Settings) -> SyncResult<()> {
        self.mutate(|data| data.settings = settings.clone())
    }

    #[must_use]
    pub fn active_river_id(&self) -> Option<RiverId> {
        self.data.lock().active_river_id
    }

    /// # Errors
    /// `Local` if the file cannot be written
    pub fn set_active_river_id(&self, id: Option<RiverId>) -> SyncResult<()> {
        self.mutate(|data| data.active_river_id = id)
    }

    fn mutate(&self, f: impl FnOnce(&mut LocalData)) -> SyncResult<()> {
        let mut data = self.data.lock();
        f(&mut data);
        if let Some(path) = &self.path {
            let encoded = serde_json::to_vec_pretty(&*data)?;
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, encoded)?;
            std::fs::rename(&tmp, path)?;
        }
        Ok(())
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
