//! River Core
//!
//! The session layer of RiverChat: one active river, the streaming
//! generations writing into it and the persistence behind it.
//!
//! # Core Concepts
//!
//! - [`RiverSession`]: create, branch, stream, select and delete nodes
//! - [`RiverConfig`]: layout, sync timing and upstream endpoints in one
//!   TOML document
//! - [`catalog`]: which models are enabled and selectable
//!
//! # Example
//!
//! ```rust,ignore
//! use river_core::prelude::*;
//!
//! let config = RiverConfig::load("riverchat.toml")?;
//! let transport = Arc::new(HttpTransport::new(config.connect_timeout())?);
//! let sync = SyncCoordinator::offline(&config.sync, Arc::new(LocalStore::in_memory()));
//! let session = RiverSession::new(&config, transport, sync);
//!
//! session.create_river("Physics").await;
//! let question = session.create_user_node("Why is the sky blue?", None)?;
//! let answer = session.create_ai_node_and_stream(question, model).await?;
//! session.flush().await;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod session;

pub use catalog::{default_enabled_models, enabled_models, validate_selected_models};
pub use config::RiverConfig;
pub use error::{SessionError, SessionResult};
pub use session::{RiverSession, TokenObserver};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a session
    pub use crate::{RiverConfig, RiverSession, SessionError, SessionResult};
    pub use river_stream::{ChatTransport, HttpTransport};
    pub use river_sync::{LocalStore, SyncCoordinator};
    pub use river_tree::{Backend, ModelRef, Node, NodeId, NodeState, River, RiverId};
    pub use std::sync::Arc;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
