//! Configuration
//!
//! One TOML document; every section is optional and falls back to its
//! defaults.
//!
//! ```toml
//! local_store_path = "~/.riverchat/data.json"
//!
//! [layout]
//! node_width = 400.0
//!
//! [sync]
//! river_debounce_ms = 1000
//!
//! [endpoints]
//! max_tokens = 4096
//! ```

use crate::error::SessionError;
use river_stream::EndpointConfig;
use river_sync::SyncConfig;
use river_tree::LayoutConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiverConfig {
    /// JSON file of the offline store; memory-only when unset
    pub local_store_path: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub layout: LayoutConfig,
    pub sync: SyncConfig,
    pub endpoints: EndpointConfig,
}

impl Default for RiverConfig {
    fn default() -> Self {
        Self {
            local_store_path: None,
            connect_timeout_secs: 10,
            layout: LayoutConfig::default(),
            sync: SyncConfig::default(),
            endpoints: EndpointConfig::default(),
        }
    }
}

impl RiverConfig {
    /// Create default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// `Config` on malformed TOML or mistyped fields
    pub fn from_toml_str(text: &str) -> Result<Self, SessionError> {
        toml::from_str(text).map_err(|e| SessionError::Config(e.to_string()))
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `Config` if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML
    ///
    /// # Errors
    /// `Config` if a value has no TOML representation
    pub fn to_toml_string(&self) -> Result<String, SessionError> {
        toml::to_string_pretty(self).map_err(|e| SessionError::Config(e.to_string()))
    }

    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// With layout constants
    #[inline]
    #[must_use]
    pub fn with_layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = layout;
        self
    }

    /// With sync timing
    #[inline]
    #[must_use]
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// With upstream endpoints
    #[inline]
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: EndpointConfig) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// With local store file
    #[inline]
    #[must_use]
    pub fn with_local_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_store_path = Some(path.into());
        self
    }
}
