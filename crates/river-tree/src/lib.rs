//! River Tree
//!
//! The data model of a branching conversation ("river") and the pure
//! operations over it.
//!
//! # Core Concepts
//!
//! - [`River`]: one conversation tree, persisted as a single document
//! - [`Node`]: one user or AI message, linked to its parent by `parent_id`
//! - [`NodeStore`]: mutation and query API over one river
//! - [`LayoutEngine`]: deterministic canvas placement for new nodes
//!
//! # Example
//!
//! ```rust,ignore
//! use river_tree::{LayoutEngine, Node, NodeStore, River};
//!
//! let mut store = NodeStore::new(River::new("Physics questions"));
//! let layout = LayoutEngine::default();
//!
//! let mut node = Node::user("Why is the sky blue?", None);
//! node.position = layout.place(store.river(), None).position();
//! let root = store.add_node(node)?;
//!
//! assert_eq!(store.root_node_id(), Some(root));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod layout;
pub mod state_machine;
pub mod store;
pub mod types;

pub use error::{TreeError, TreeResult};
pub use layout::{LayoutConfig, LayoutEngine, Placement};
pub use store::{validate_river, NodeStore, Removal};
pub use types::{
    ApiKeys, Backend, BranchMetadata, ModelRef, Node, NodeId, NodeState, NodeType, Position,
    Pricing, River, RiverId, RiverSummary, Settings,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with river trees
    pub use crate::{
        LayoutEngine, ModelRef, Node, NodeId, NodeState, NodeStore, NodeType, Placement, River,
        RiverId, TreeError,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
