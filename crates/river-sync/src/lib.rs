//! River Sync
//!
//! Persistence routing for rivers and settings.
//!
//! # Core Concepts
//!
//! - [`IdentityGate`]: readiness signal for "who is signed in"
//! - [`RemoteStore`]: authoritative per-identity documents
//! - [`LocalStore`]: single-document fallback, canonical when anonymous
//! - [`SyncCache`]: TTL caches for settings and river lists
//! - [`WriteQueue`]: debounced writes ordered by version
//! - [`SyncCoordinator`]: ties the above together
//!
//! # Example
//!
//! ```rust,ignore
//! let local = Arc::new(LocalStore::open("riverchat.json")?);
//! let sync = SyncCoordinator::offline(&SyncConfig::default(), local);
//!
//! sync.schedule_river_save(store.river().clone());
//! sync.flush().await;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cache;
pub mod cipher;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod local;
pub mod queue;
pub mod remote;

pub use cache::SyncCache;
pub use cipher::{EncryptedApiKeys, KeyCipher, PassthroughCipher};
pub use coordinator::{MigrationReport, SyncConfig, SyncCoordinator};
pub use error::{SyncError, SyncResult};
pub use identity::{Identity, IdentityGate, IdentityProvider};
pub use local::{LocalData, LocalStore};
pub use queue::{ApplyFn, WriteQueue};
pub use remote::{MemoryRemoteStore, PreferencesDoc, ProfileDoc, RemoteStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
