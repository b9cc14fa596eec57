//! Node store property tests
//!
//! Random trees are built from a list of parent choices: entry `i` picks the
//! parent of node `i` among the nodes created before it (or none).

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use river_tree::{LayoutEngine, ModelRef, Node, NodeId, NodeStore, River};
use std::collections::HashSet;

fn build(parents: &[Option<usize>], layout: bool) -> (NodeStore, Vec<NodeId>) {
    let engine = LayoutEngine::default();
    let mut store = NodeStore::new(River::new("prop"));
    let mut ids = Vec::new();
    for (i, choice) in parents.iter().enumerate() {
        let parent = choice.and_then(|c| ids.get(c % ids.len().max(1)).copied());
        let mut node = Node::user(format!("node {i} {}", "x".repeat(i * 7)), parent);
        if layout {
            node.position = engine.place(store.river(), parent).position();
        }
        ids.push(store.add_node(node).unwrap());
    }
    (store, ids)
}

fn descendants(store: &NodeStore, id: NodeId) -> HashSet<NodeId> {
    let mut out = HashSet::from([id]);
    let mut changed = true;
    while changed {
        changed = false;
        for node in store.river().nodes.values() {
            if let Some(p) = node.parent_id {
                if out.contains(&p) && out.insert(node.id) {
                    changed = true;
                }
            }
        }
    }
    out
}

proptest! {
    #[test]
    fn prop_every_ancestor_is_present(
        parents in proptest::collection::vec(proptest::option::of(0..40usize), 1..40)
    ) {
        let (store, ids) = build(&parents, false);
        prop_assert!(store.validate().is_ok());
        for id in ids {
            let path = store.path_to_root(id).unwrap();
            prop_assert!(path[0].parent_id.is_none());
            prop_assert_eq!(path.last().unwrap().id, id);
        }
    }

    #[test]
    fn prop_delete_removes_exactly_the_subtree(
        parents in proptest::collection::vec(proptest::option::of(0..40usize), 1..40),
        victim in 0..40usize
    ) {
        let (mut store, ids) = build(&parents, false);
        let target = ids[victim % ids.len()];
        let expected = descendants(&store, target);
        let before: HashSet<NodeId> = ids.iter().copied().collect();

        let removal = store.remove_subtree(target).unwrap();
        let removed: HashSet<NodeId> = removal.removed.iter().copied().collect();
        prop_assert_eq!(&removed, &expected);

        let after: HashSet<NodeId> = store.river().nodes.keys().copied().collect();
        prop_assert_eq!(after, before.difference(&expected).copied().collect::<HashSet<_>>());
        prop_assert!(store.validate().is_ok());
        if removal.root_cleared {
            prop_assert_eq!(store.root_node_id(), None);
        }
    }

    #[test]
    fn prop_append_concatenates_in_order(
        deltas in proptest::collection::vec(".{0,8}", 0..30)
    ) {
        let mut store = NodeStore::new(River::new("prop"));
        let root = store.add_node(Node::user("q", None)).unwrap();
        let ai = store
            .add_node(Node::ai(root, ModelRef::new("openai/gpt-4o", "GPT-4o")))
            .unwrap();

        let mut previous = String::new();
        for delta in &deltas {
            store.append_content(ai, delta).unwrap();
            let current = store.get(ai).unwrap().content.clone();
            prop_assert!(current.starts_with(&previous));
            previous = current;
        }
        prop_assert_eq!(previous, deltas.concat());
    }

    #[test]
    fn prop_layout_is_pure(
        parents in proptest::collection::vec(proptest::option::of(0..30usize), 1..30),
        pick in 0..30usize
    ) {
        let (store, ids) = build(&parents, true);
        let engine = LayoutEngine::default();
        let target = ids[pick % ids.len()];

        let first = engine.place(store.river(), Some(target));
        for other in &ids {
            let _ = engine.place(store.river(), Some(*other));
        }
        let _ = engine.place(store.river(), None);
        let again = engine.place(store.river(), Some(target));
        let on_copy = engine.place(&store.river().clone(), Some(target));

        prop_assert_eq!(first, again);
        prop_assert_eq!(first, on_copy);
    }
}

#[test]
fn river_document_round_trips() {
    let (store, ids) = build(&[None, Some(0), Some(0), Some(1), None], true);
    let mut river = store.into_river();
    let ai = Node::ai(ids[3], ModelRef::new("anthropic/claude", "Claude"));
    river.nodes.insert(ai.id, ai);

    let json = serde_json::to_string(&river).unwrap();
    let parsed: River = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed, river);
}

#[test]
fn root_placement_ignores_unpositioned_nodes() {
    let (mut store, _) = build(&[None], true);
    store.add_node(Node::user("floating", None)).unwrap();

    let engine = LayoutEngine::default();
    let placed = engine.place(store.river(), None).position().unwrap();
    assert_eq!(placed.x, 450.0);
    assert_eq!(placed.y, 0.0);
}
