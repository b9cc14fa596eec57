//! Error types for session operations
//!
//! Only structural problems reach the caller. Streaming failures end up in
//! the node's `error` field; persistence failures are recovered by the sync
//! layer and logged.

use river_sync::SyncError;
use river_tree::{NodeId, RiverId, TreeError};

/// Session errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No river is loaded
    #[error("no active river")]
    NoActiveRiver,

    /// Node not in the active river
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// River not found in any store
    #[error("river not found: {0}")]
    RiverNotFound(RiverId),

    /// Broken parent link in the active river
    #[error("node {node} references missing ancestor {missing}")]
    MissingAncestor { node: NodeId, missing: NodeId },

    /// Other tree rule violated
    #[error("tree error: {0}")]
    Tree(TreeError),

    /// Persistence failed where no fallback applies
    #[error("persistence error: {0}")]
    Persistence(#[from] SyncError),

    /// Configuration unreadable
    #[error("configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// Check if the error signals a usage mistake rather than a transient
    /// condition
    #[inline]
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::NoActiveRiver | Self::NodeNotFound(_) | Self::RiverNotFound(_)
        )
    }
}

impl From<TreeError> for SessionError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::NodeNotFound(id) | TreeError::ParentNotFound(id) => Self::NodeNotFound(id),
            TreeError::MissingAncestor { node, missing } => Self::MissingAncestor { node, missing },
            other => Self::Tree(other),
        }
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
