//! Deterministic auto-layout
//!
//! Positions are computed from the store snapshot alone; nothing here
//! measures rendered output. Dimensions are estimated from content length:
//!
//! ```text
//! width  = node_width
//! height = min(base_height + ceil(len / chars_per_line) * line_height
//!              + (branch ? branch_bonus : 0), max_height)
//! ```
//!
//! Roots are laid out left to right along `y = 0`. Children cascade below
//! their parent: the first child sits directly beneath it, later children
//! extend to the right of the rightmost positioned sibling.

use crate::types::{Node, NodeId, Position, River};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Layout constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub node_width: f64,
    pub base_height: f64,
    pub chars_per_line: usize,
    pub line_height: f64,
    pub branch_bonus: f64,
    pub max_height: f64,
    pub horizontal_gap: f64,
    pub vertical_gap: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            node_width: 400.0,
            base_height: 120.0,
            chars_per_line: 50,
            line_height: 20.0,
            branch_bonus: 60.0,
            max_height: 600.0,
            horizontal_gap: 50.0,
            vertical_gap: 80.0,
        }
    }
}

/// Where a new node goes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    /// Position resolved
    At(Position),
    /// Parent has no position yet; retry in a later batch pass
    Deferred,
}

impl Placement {
    /// Resolved position, if any
    #[inline]
    #[must_use]
    pub fn position(self) -> Option<Position> {
        match self {
            Placement::At(p) => Some(p),
            Placement::Deferred => None,
        }
    }
}

/// Layout engine
#[derive(Debug, Clone, Copy, Default)]
pub struct LayoutEngine {
    config: LayoutConfig,
}

impl LayoutEngine {
    #[inline]
    #[must_use]
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Estimated rendered width
    #[inline]
    #[must_use]
    pub fn estimate_width(&self, _node: &Node) -> f64 {
        self.config.node_width
    }

    /// Estimated rendered height
    #[must_use]
    pub fn estimate_height(&self, node: &Node) -> f64 {
        let chars = node.content.chars().count();
        let per_line = self.config.chars_per_line.max(1);
        let lines = chars.div_ceil(per_line);
        #[allow(clippy::cast_precision_loss)]
        let mut height = self.config.base_height + lines as f64 * self.config.line_height;
        if node.branch_metadata.is_some() {
            height += self.config.branch_bonus;
        }
        height.min(self.config.max_height)
    }

    /// Compute the position of a node about to be inserted under `parent_id`
    ///
    /// The new node itself is not consulted; only its parent and siblings.
    #[must_use]
    pub fn place(&self, river: &River, parent_id: Option<NodeId>) -> Placement {
        match parent_id {
            None => Placement::At(self.place_root(river)),
            Some(parent_id) => self.place_child(river, parent_id),
        }
    }

    fn place_root(&self, river: &River) -> Position {
        let rightmost = river
            .nodes
            .values()
            .filter_map(|n| n.position.map(|p| (p, n)))
            .max_by(|(a, na), (b, nb)| a.x.total_cmp(&b.x).then_with(|| na.id.cmp(&nb.id)));

        match rightmost {
            None => Position::ORIGIN,
            Some((pos, node)) => Position::new(
                pos.x + self.estimate_width(node) + self.config.horizontal_gap,
                0.0,
            ),
        }
    }

    fn place_child(&self, river: &River, parent_id: NodeId) -> Placement {
        let Some(parent) = river.nodes.get(&parent_id) else {
            return Placement::Deferred;
        };
        let Some(parent_pos) = parent.position else {
            return Placement::Deferred;
        };

        let y = parent_pos.y + self.estimate_height(parent) + self.config.vertical_gap;
        let rightmost_sibling = river
            .nodes
            .values()
            .filter(|n| n.parent_id == Some(parent_id))
            .filter_map(|n| n.position.map(|p| (p, n)))
            .max_by(|(a, na), (b, nb)| a.x.total_cmp(&b.x).then_with(|| na.id.cmp(&nb.id)));

        let position = match rightmost_sibling {
            None => Position::new(parent_pos.x, y),
            Some((pos, sibling)) => Position::new(
                pos.x + self.estimate_width(sibling) + self.config.horizontal_gap,
                y,
            ),
        };
        Placement::At(position)
    }

    /// Resolve every node that still lacks a position
    ///
    /// Works parent-first on a scratch copy so each placement sees the ones
    /// before it. Returns the moves to apply as a single batch; nodes whose
    /// ancestry cannot be resolved are left out.
    #[must_use]
    pub fn resolve_pending(&self, river: &River) -> Vec<(NodeId, Position)> {
        let mut scratch = river.clone();
        let mut pending: Vec<(i64, NodeId)> = scratch
            .nodes
            .values()
            .filter(|n| n.position.is_none())
            .map(|n| (n.timestamp, n.id))
            .collect();
        pending.sort_unstable();

        let mut resolved: HashMap<NodeId, Position> = HashMap::new();
        let mut order = Vec::new();
        loop {
            let mut progressed = false;
            for (_, id) in &pending {
                if resolved.contains_key(id) {
                    continue;
                }
                let parent_id = scratch.nodes.get(id).and_then(|n| n.parent_id);
                if let Placement::At(position) = self.place(&scratch, parent_id) {
                    if let Some(node) = scratch.nodes.get_mut(id) {
                        node.position = Some(position);
                    }
                    resolved.insert(*id, position);
                    order.push((*id, position));
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }

        tracing::debug!(
            resolved = order.len(),
            unresolved = pending.len() - order.len(),
            "layout batch pass"
        );
        order
    }
}
