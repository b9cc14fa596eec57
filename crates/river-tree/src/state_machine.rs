//! Node lifecycle
//!
//! AI nodes start `Generating` and settle once, to `Complete` or `Error`.
//! User nodes are created `Complete`. No transition leaves a terminal state.

use crate::error::TreeError;
use crate::types::{NodeId, NodeState};

/// Validates a node lifecycle transition.
///
/// `Generating` may move to `Complete` or `Error`; both are terminal.
pub fn validate_transition(node: NodeId, from: NodeState, to: NodeState) -> Result<(), TreeError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(TreeError::IllegalTransition { node, from, to })
    }
}

pub fn allowed_transitions(from: NodeState) -> Vec<NodeState> {
    use NodeState::*;
    match from {
        Generating => vec![Complete, Error],
        Complete => vec![],
        Error => vec![],
    }
}

fn allowed(from: NodeState, to: NodeState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
