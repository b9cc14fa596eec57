//! Error types for river trees

use crate::types::{NodeId, NodeState};

/// Node store and invariant errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// Node is not in the river
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// Parent referenced by a new node is not in the river
    #[error("parent not found: {0}")]
    ParentNotFound(NodeId),

    /// Node ID already present
    #[error("duplicate node: {0}")]
    DuplicateNode(NodeId),

    /// Ancestor walk hit a dangling parent reference
    #[error("node {node} references missing ancestor {missing}")]
    MissingAncestor { node: NodeId, missing: NodeId },

    /// Ancestor walk revisited a node
    #[error("parent cycle detected at {0}")]
    CycleDetected(NodeId),

    /// Lifecycle transition not allowed
    #[error("illegal transition for {node}: {from:?} -> {to:?}")]
    IllegalTransition {
        node: NodeId,
        from: NodeState,
        to: NodeState,
    },

    /// Append attempted on a node that is no longer streaming
    #[error("node {0} is not generating")]
    NotGenerating(NodeId),

    /// Content replacement attempted while streaming
    #[error("node {0} is generating; content is append-only")]
    ContentLocked(NodeId),

    /// Loaded river violates a structural invariant
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl TreeError {
    /// Check if error indicates corrupted tree data rather than misuse
    #[inline]
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::MissingAncestor { .. } | Self::CycleDetected(_) | Self::Invariant(_)
        )
    }
}

/// Result alias for tree operations
pub type TreeResult<T> = Result<T, TreeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_error_display() {
        let id = NodeId::new();
        let err = TreeError::NodeNotFound(id);
        assert_eq!(err.to_string(), format!("node not found: {id}"));
    }

    #[test]
    fn corruption_classification() {
        let a = NodeId::new();
        let b = NodeId::new();
        assert!(TreeError::MissingAncestor { node: a, missing: b }.is_corruption());
        assert!(!TreeError::NodeNotFound(a).is_corruption());
        assert!(!TreeError::NotGenerating(a).is_corruption());
    }
}
