//! Conversation context construction
//!
//! The ordered path root → parent is the context of a new AI turn.
//! Branch nodes carry the highlighted excerpt out of band; it is spliced
//! into the outgoing message here, never into the stored content.

use river_tree::{Node, NodeId, NodeStore, NodeType, TreeResult};
use serde::{Deserialize, Serialize};

/// Excerpt delimiter used for branch nodes
pub const QUOTE_FENCE: &str = "\"\"\"";

/// Chat role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message sent upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Map a stored node to its outgoing message
    #[must_use]
    pub fn from_node(node: &Node) -> Self {
        let role = match node.kind {
            NodeType::User => Role::User,
            NodeType::Ai => Role::Assistant,
        };
        let content = match &node.branch_metadata {
            Some(branch) => format!(
                "Regarding this excerpt:\n{QUOTE_FENCE}\n{}\n{QUOTE_FENCE}\n\n{}",
                branch.highlighted_text, node.content
            ),
            None => node.content.clone(),
        };
        Self { role, content }
    }
}

/// Build the message list for a reply to `parent_id`
///
/// # Errors
///
/// Returns the store's error when the node is unknown or its ancestry is
/// broken.
pub fn build_context(store: &NodeStore, parent_id: NodeId) -> TreeResult<Vec<ChatMessage>> {
    let path = store.path_to_root(parent_id)?;
    Ok(path.into_iter().map(ChatMessage::from_node).collect())
}
