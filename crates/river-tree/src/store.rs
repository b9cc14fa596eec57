//! In-memory node store for one river
//!
//! Wraps a [`River`] document and keeps a child index beside it so that
//! subtree collection is proportional to the subtree, not the river.
//! The index is derived state: it is rebuilt from `parent_id` links whenever
//! a store is opened and is never persisted.

use crate::error::{TreeError, TreeResult};
use crate::state_machine::validate_transition;
use crate::types::{Node, NodeId, NodeState, NodeType, Position, River, RiverSummary};
use std::collections::{HashMap, HashSet, VecDeque};

/// Result of a cascading delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    /// Removed IDs, breadth-first from the requested node
    pub removed: Vec<NodeId>,
    /// Whether the river root was among them and has been cleared
    pub root_cleared: bool,
}

impl Removal {
    /// Check if an ID was removed
    #[inline]
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.removed.contains(&id)
    }
}

/// Node store over a single river
#[derive(Debug, Clone)]
pub struct NodeStore {
    river: River,
    children: HashMap<NodeId, Vec<NodeId>>,
}

impl NodeStore {
    /// Open a store over a river document
    ///
    /// Siblings are indexed by creation time so child order is stable
    /// across reloads.
    #[must_use]
    pub fn new(river: River) -> Self {
        let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut ordered: Vec<&Node> = river.nodes.values().collect();
        ordered.sort_by_key(|n| (n.timestamp, n.id));
        for node in ordered {
            if let Some(parent) = node.parent_id {
                children.entry(parent).or_default().push(node.id);
            }
        }
        Self { river, children }
    }

    /// Borrow the underlying document
    #[inline]
    #[must_use]
    pub fn river(&self) -> &River {
        &self.river
    }

    /// Give back the underlying document
    #[inline]
    #[must_use]
    pub fn into_river(self) -> River {
        self.river
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.river.nodes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.river.nodes.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.river.nodes.get(&id)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.river.nodes.contains_key(&id)
    }

    #[inline]
    #[must_use]
    pub fn root_node_id(&self) -> Option<NodeId> {
        self.river.root_node_id
    }

    #[inline]
    #[must_use]
    pub fn summary(&self) -> RiverSummary {
        self.river.summary()
    }

    /// Rename the river
    pub fn rename(&mut self, name: impl Into<String>) {
        self.river.name = name.into();
        self.river.touch();
    }

    /// Insert a node
    ///
    /// The first parentless node of an empty-rooted river becomes its root.
    ///
    /// # Errors
    /// - `DuplicateNode` if the ID is taken
    /// - `ParentNotFound` if `parent_id` is dangling
    pub fn add_node(&mut self, node: Node) -> TreeResult<NodeId> {
        if self.contains(node.id) {
            return Err(TreeError::DuplicateNode(node.id));
        }
        if let Some(parent) = node.parent_id {
            if !self.contains(parent) {
                return Err(TreeError::ParentNotFound(parent));
            }
            self.children.entry(parent).or_default().push(node.id);
        } else if self.river.root_node_id.is_none() {
            self.river.root_node_id = Some(node.id);
        }

        let id = node.id;
        self.river.nodes.insert(id, node);
        self.river.touch();
        tracing::debug!(river = %self.river.id, node = %id, "node added");
        Ok(id)
    }

    /// Delete a node and all of its descendants
    ///
    /// Collection is breadth-first; deletion happens only after the whole
    /// set is known, so a failure leaves the store untouched.
    ///
    /// # Errors
    /// `NodeNotFound` if the node is absent
    pub fn remove_subtree(&mut self, id: NodeId) -> TreeResult<Removal> {
        if !self.contains(id) {
            return Err(TreeError::NodeNotFound(id));
        }

        let parent = self.get(id).and_then(|n| n.parent_id);
        let mut removed = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            removed.push(current);
            if let Some(kids) = self.children.get(&current) {
                queue.extend(kids.iter().copied());
            }
        }

        for victim in &removed {
            self.river.nodes.remove(victim);
            self.children.remove(victim);
        }
        if let Some(parent_kids) = parent.and_then(|p| self.children.get_mut(&p)) {
            parent_kids.retain(|k| *k != id);
        }

        let root_cleared = self
            .river
            .root_node_id
            .is_some_and(|root| removed.contains(&root));
        if root_cleared {
            self.river.root_node_id = None;
        }

        self.river.touch();
        tracing::debug!(
            river = %self.river.id,
            node = %id,
            count = removed.len(),
            root_cleared,
            "subtree removed"
        );
        Ok(Removal {
            removed,
            root_cleared,
        })
    }

    /// Ordered path from the root down to `id`
    ///
    /// # Errors
    /// - `NodeNotFound` if `id` is absent
    /// - `MissingAncestor` if a parent link dangles
    /// - `CycleDetected` if parent links loop
    pub fn path_to_root(&self, id: NodeId) -> TreeResult<Vec<&Node>> {
        let mut current = self.get(id).ok_or(TreeError::NodeNotFound(id))?;
        let mut path = vec![current];
        let mut seen = HashSet::from([id]);

        while let Some(parent) = current.parent_id {
            if !seen.insert(parent) {
                return Err(TreeError::CycleDetected(parent));
            }
            current = self.get(parent).ok_or(TreeError::MissingAncestor {
                node: current.id,
                missing: parent,
            })?;
            path.push(current);
        }

        path.reverse();
        Ok(path)
    }

    /// Direct children in creation order
    #[must_use]
    pub fn children(&self, id: NodeId) -> Vec<&Node> {
        self.children
            .get(&id)
            .map(|kids| kids.iter().filter_map(|k| self.get(*k)).collect())
            .unwrap_or_default()
    }

    /// Number of nodes branched from highlighted text in `id`
    #[must_use]
    pub fn branch_count(&self, id: NodeId) -> usize {
        self.river
            .nodes
            .values()
            .filter(|n| {
                n.branch_metadata
                    .as_ref()
                    .is_some_and(|b| b.source_node_id == id)
            })
            .count()
    }

    /// Replace the content of a settled node
    ///
    /// # Errors
    /// - `NodeNotFound` if absent
    /// - `ContentLocked` while the node is generating
    pub fn update_content(&mut self, id: NodeId, text: impl Into<String>) -> TreeResult<()> {
        let node = self.node_mut(id)?;
        if node.state == NodeState::Generating {
            return Err(TreeError::ContentLocked(id));
        }
        node.content = text.into();
        self.river.touch();
        Ok(())
    }

    /// Append a streamed delta to a generating node
    ///
    /// # Errors
    /// - `NodeNotFound` if absent
    /// - `NotGenerating` once the node has settled
    pub fn append_content(&mut self, id: NodeId, delta: &str) -> TreeResult<()> {
        let node = self.node_mut(id)?;
        if node.state != NodeState::Generating {
            return Err(TreeError::NotGenerating(id));
        }
        if delta.is_empty() {
            return Ok(());
        }
        node.content.push_str(delta);
        self.river.touch();
        Ok(())
    }

    /// Move a generating node to `Complete`
    ///
    /// # Errors
    /// `NodeNotFound` or `IllegalTransition`
    pub fn complete(&mut self, id: NodeId) -> TreeResult<()> {
        let node = self.node_mut(id)?;
        validate_transition(id, node.state, NodeState::Complete)?;
        node.state = NodeState::Complete;
        self.river.touch();
        Ok(())
    }

    /// Move a generating node to `Error` with a message
    ///
    /// An empty message is replaced so the error invariant holds.
    ///
    /// # Errors
    /// `NodeNotFound` or `IllegalTransition`
    pub fn fail(&mut self, id: NodeId, message: impl Into<String>) -> TreeResult<()> {
        let node = self.node_mut(id)?;
        validate_transition(id, node.state, NodeState::Error)?;
        let message = message.into();
        node.state = NodeState::Error;
        node.error = Some(if message.trim().is_empty() {
            "Unknown error".to_string()
        } else {
            message
        });
        self.river.touch();
        Ok(())
    }

    /// Apply a batch of positions as one update
    ///
    /// Every ID is checked before anything is written.
    ///
    /// # Errors
    /// `NodeNotFound` for the first unknown ID
    pub fn apply_positions(&mut self, moves: &[(NodeId, Position)]) -> TreeResult<usize> {
        if let Some((missing, _)) = moves.iter().find(|(id, _)| !self.contains(*id)) {
            return Err(TreeError::NodeNotFound(*missing));
        }
        for (id, position) in moves {
            if let Some(node) = self.river.nodes.get_mut(id) {
                node.position = Some(*position);
            }
        }
        if !moves.is_empty() {
            self.river.touch();
        }
        Ok(moves.len())
    }

    /// Check the structural invariants of the document
    ///
    /// # Errors
    /// The first violated invariant
    pub fn validate(&self) -> TreeResult<()> {
        validate_river(&self.river)
    }

    fn node_mut(&mut self, id: NodeId) -> TreeResult<&mut Node> {
        self.river
            .nodes
            .get_mut(&id)
            .ok_or(TreeError::NodeNotFound(id))
    }
}

impl From<River> for NodeStore {
    fn from(river: River) -> Self {
        Self::new(river)
    }
}

impl River {
    /// Check the structural invariants of this document
    ///
    /// # Errors
    /// The first violated invariant
    pub fn validate(&self) -> TreeResult<()> {
        validate_river(self)
    }
}

/// Check the structural invariants of a river document
///
/// # Errors
/// The first violated invariant
pub fn validate_river(river: &River) -> TreeResult<()> {
    for (key, node) in &river.nodes {
        if *key != node.id {
            return Err(TreeError::Invariant(format!(
                "node stored under {key} carries id {}",
                node.id
            )));
        }
        if let Some(parent) = node.parent_id {
            if !river.nodes.contains_key(&parent) {
                return Err(TreeError::MissingAncestor {
                    node: node.id,
                    missing: parent,
                });
            }
        }
        if node.kind == NodeType::Ai && node.model.is_none() {
            return Err(TreeError::Invariant(format!("ai node {} has no model", node.id)));
        }
        if node.state == NodeState::Error && node.error.as_deref().map_or(true, str::is_empty) {
            return Err(TreeError::Invariant(format!(
                "error node {} has no message",
                node.id
            )));
        }
    }

    if let Some(root) = river.root_node_id {
        match river.nodes.get(&root) {
            None => return Err(TreeError::NodeNotFound(root)),
            Some(node) if !node.is_root() => {
                return Err(TreeError::Invariant(format!("root {root} has a parent")));
            }
            Some(_) => {}
        }
    }
    Ok(())
}
