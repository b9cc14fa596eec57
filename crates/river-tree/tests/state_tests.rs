use river_tree::state_machine::{allowed_transitions, validate_transition};
use river_tree::{NodeId, NodeState};
use proptest::prelude::*;

#[test]
fn test_generating_transitions() {
    let id = NodeId::new();
    assert!(validate_transition(id, NodeState::Generating, NodeState::Complete).is_ok());
    assert!(validate_transition(id, NodeState::Generating, NodeState::Error).is_ok());

    // Invalid
    assert!(validate_transition(id, NodeState::Generating, NodeState::Generating).is_err());
}

#[test]
fn test_terminal_states_are_final() {
    let id = NodeId::new();
    assert!(validate_transition(id, NodeState::Complete, NodeState::Error).is_err());
    assert!(validate_transition(id, NodeState::Error, NodeState::Complete).is_err());
    assert!(validate_transition(id, NodeState::Complete, NodeState::Generating).is_err());
    assert!(NodeState::Complete.is_terminal());
    assert!(NodeState::Error.is_terminal());
    assert!(!NodeState::Generating.is_terminal());
}

proptest! {
    #[test]
    fn prop_all_transitions_are_subset_of_allowed(
        from in prop_oneof![
            Just(NodeState::Complete),
            Just(NodeState::Generating),
            Just(NodeState::Error),
        ],
        to in prop_oneof![
            Just(NodeState::Complete),
            Just(NodeState::Generating),
            Just(NodeState::Error),
        ]
    ) {
        let res = validate_transition(NodeId::new(), from, to);
        let allowed = allowed_transitions(from);

        if res.is_ok() {
            prop_assert!(allowed.contains(&to));
        } else {
            prop_assert!(!allowed.contains(&to));
        }
    }
}
