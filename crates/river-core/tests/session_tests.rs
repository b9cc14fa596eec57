//! Session behaviour end to end against scripted streams

use bytes::Bytes;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use river_core::{RiverConfig, RiverSession, SessionError};
use river_sync::{LocalStore, SyncConfig, SyncCoordinator};
use river_test_utils::{all_keys, error_body, free_model, openai_frames, Script, ScriptedTransport};
use river_tree::{
    ApiKeys, ModelRef, Node, NodeId, NodeState, NodeType, Position, River, RiverId, Settings,
    TreeError,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    session: RiverSession,
    transport: ScriptedTransport,
    local: Arc<LocalStore>,
}

fn harness() -> Harness {
    harness_on(Arc::new(LocalStore::in_memory()))
}

fn harness_on(local: Arc<LocalStore>) -> Harness {
    let transport = ScriptedTransport::new();
    let sync = SyncCoordinator::offline(&SyncConfig::default(), local.clone());
    let session = RiverSession::new(&RiverConfig::default(), Arc::new(transport.clone()), sync);
    session.use_api_keys(&all_keys());
    Harness {
        session,
        transport,
        local,
    }
}

fn token_frame(text: &str) -> Bytes {
    let payload = serde_json::json!({ "choices": [{ "delta": { "content": text } }] });
    Bytes::from(format!("data: {payload}\n\n"))
}

#[tokio::test]
async fn first_user_node_becomes_root() {
    let h = harness();
    h.session.create_river("scenario a").await;

    let id = h.session.create_user_node("Hello", None).unwrap();

    let river = h.session.active_river().unwrap();
    assert_eq!(river.nodes.len(), 1);
    assert_eq!(river.root_node_id, Some(id));
    let node = &river.nodes[&id];
    assert_eq!(node.kind, NodeType::User);
    assert_eq!(node.state, NodeState::Complete);
    assert_eq!(node.content, "Hello");
}

#[tokio::test]
async fn streamed_tokens_build_the_answer() {
    let h = harness();
    h.transport.push(Script::ok(openai_frames(&["Hel", "lo!"])));
    h.session.create_river("scenario b").await;
    let user = h.session.create_user_node("Say hello", None).unwrap();

    let ai = h
        .session
        .create_ai_node_and_stream(user, free_model())
        .await
        .unwrap();

    let node = h.session.node(ai).unwrap();
    assert_eq!(node.content, "Hello!");
    assert_eq!(node.state, NodeState::Complete);
    assert_eq!(node.parent_id, Some(user));
    assert_eq!(node.model, Some(free_model()));
    assert_eq!(h.session.selected_node_id(), Some(ai));
    assert_eq!(h.session.last_used_model(), Some(free_model()));

    let sent = h.transport.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body["messages"][0]["content"], "Say hello");
    assert_eq!(h.session.active_streams(), 0);
}

#[tokio::test]
async fn rate_limit_is_recorded_on_the_node() {
    let h = harness();
    h.transport
        .push(Script::status(429, error_body("rate limited")));
    h.session.create_river("scenario c").await;
    let user = h.session.create_user_node("Hi", None).unwrap();

    let ai = h
        .session
        .create_ai_node_and_stream(user, free_model())
        .await
        .unwrap();

    let node = h.session.node(ai).unwrap();
    assert_eq!(node.state, NodeState::Error);
    assert_eq!(node.error.as_deref(), Some("rate limited"));
    assert_eq!(node.content, "");
}

#[tokio::test]
async fn missing_credentials_fail_the_node_without_a_request() {
    let local = Arc::new(LocalStore::in_memory());
    let transport = ScriptedTransport::new();
    let sync = SyncCoordinator::offline(&SyncConfig::default(), local);
    let session = RiverSession::new(&RiverConfig::default(), Arc::new(transport.clone()), sync);
    session.create_river("no keys").await;
    let user = session.create_user_node("Hi", None).unwrap();

    let ai = session
        .create_ai_node_and_stream(user, free_model())
        .await
        .unwrap();

    let node = session.node(ai).unwrap();
    assert_eq!(node.state, NodeState::Error);
    assert_eq!(
        node.error.as_deref(),
        Some("no API key configured for openrouter")
    );
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn deleting_the_root_empties_the_river() {
    let h = harness();
    h.session.create_river("scenario d").await;
    let root = h.session.create_user_node("root", None).unwrap();
    let a = h.session.create_user_node("a", Some(root)).unwrap();
    let b = h.session.create_user_node("b", Some(root)).unwrap();
    h.session.select_node(Some(a)).unwrap();

    let removal = h.session.delete_node(root).unwrap();

    assert_eq!(removal.removed.len(), 3);
    assert!(removal.contains(b));
    assert!(removal.root_cleared);
    let river = h.session.active_river().unwrap();
    assert!(river.nodes.is_empty());
    assert_eq!(river.root_node_id, None);
    assert_eq!(h.session.selected_node_id(), None);
}

#[tokio::test]
async fn deleting_an_unrelated_subtree_keeps_the_selection() {
    let h = harness();
    h.session.create_river("selection").await;
    let root = h.session.create_user_node("root", None).unwrap();
    let keep = h.session.create_user_node("keep", Some(root)).unwrap();
    let drop = h.session.create_user_node("drop", Some(root)).unwrap();
    h.session.select_node(Some(keep)).unwrap();

    h.session.delete_node(drop).unwrap();

    assert_eq!(h.session.selected_node_id(), Some(keep));
    assert_eq!(h.session.children(root).unwrap().len(), 1);
}

#[tokio::test]
async fn branch_prompt_is_kept_verbatim() {
    let h = harness();
    h.transport.push(Script::ok(openai_frames(&["It bends."])));
    h.session.create_river("scenario e").await;
    let source = h
        .session
        .create_user_node("Light travels through quoted text and glass", None)
        .unwrap();

    let (user, ai) = h
        .session
        .branch_from_selection(source, "quoted text", "explain this", free_model())
        .await
        .unwrap();

    let branch = h.session.node(user).unwrap();
    assert_eq!(branch.content, "explain this");
    assert_eq!(branch.parent_id, Some(source));
    let metadata = branch.branch_metadata.unwrap();
    assert_eq!(metadata.highlighted_text, "quoted text");
    assert_eq!(metadata.source_node_id, source);
    assert_eq!(metadata.elaboration_prompt.as_deref(), Some("explain this"));

    let answer = h.session.node(ai).unwrap();
    assert_eq!(answer.parent_id, Some(user));
    assert_eq!(answer.content, "It bends.");
    assert_eq!(h.session.branch_count(source).unwrap(), 1);

    let sent = h.transport.requests();
    let last = sent[0].body["messages"][1]["content"].as_str().unwrap();
    assert!(last.contains("quoted text"));
    assert!(last.ends_with("explain this"));
}

#[tokio::test]
async fn fan_out_streams_one_answer_per_model() {
    let h = harness();
    h.transport.push(Script::ok(openai_frames(&["first"])));
    h.transport.push(Script::ok(openai_frames(&["second"])));
    h.session.create_river("fan out").await;
    let user = h.session.create_user_node("Compare", None).unwrap();
    let models = vec![free_model(), ModelRef::new("openai/gpt-4o-mini", "GPT-4o mini")];

    let answers = h
        .session
        .create_ai_nodes_and_stream(user, &models)
        .await
        .unwrap();

    assert_eq!(answers.len(), 2);
    let mut contents: Vec<String> = h
        .session
        .children(user)
        .unwrap()
        .into_iter()
        .inspect(|n| assert_eq!(n.state, NodeState::Complete))
        .map(|n| n.content)
        .collect();
    contents.sort();
    assert_eq!(contents, vec!["first".to_string(), "second".to_string()]);
    assert_eq!(h.session.settings().last_chat_selected_models, models);
}

#[tokio::test]
async fn structural_errors_reach_the_caller() {
    let h = harness();
    assert_eq!(
        h.session.create_user_node("orphan", None),
        Err(SessionError::NoActiveRiver)
    );
    assert_eq!(
        h.session
            .create_ai_node_and_stream(NodeId::new(), free_model())
            .await,
        Err(SessionError::NoActiveRiver)
    );

    h.session.create_river("errors").await;
    let ghost = NodeId::new();
    assert_eq!(
        h.session.create_user_node("lost", Some(ghost)),
        Err(SessionError::NodeNotFound(ghost))
    );
    assert_eq!(
        h.session.create_ai_node_and_stream(ghost, free_model()).await,
        Err(SessionError::NodeNotFound(ghost))
    );
    assert_eq!(
        h.session.select_node(Some(ghost)),
        Err(SessionError::NodeNotFound(ghost))
    );
    assert_eq!(h.session.delete_node(ghost), Err(SessionError::NodeNotFound(ghost)));
    assert!(h.transport.requests().is_empty());
    assert!(h.session.active_river().unwrap().nodes.is_empty());
}

#[tokio::test]
async fn new_nodes_are_laid_out() {
    let h = harness();
    h.session.create_river("layout").await;
    let root = h.session.create_user_node("Hello", None).unwrap();
    let first = h.session.create_user_node("one", Some(root)).unwrap();
    let second = h.session.create_user_node("two", Some(root)).unwrap();
    let other_root = h.session.create_user_node("again", None).unwrap();

    let at = |id| h.session.node(id).unwrap().position.unwrap();
    assert_eq!(at(root), Position::ORIGIN);
    assert_eq!(at(first), Position::new(0.0, 220.0));
    assert_eq!(at(second), Position::new(450.0, 220.0));
    assert_eq!(at(other_root), Position::new(900.0, 0.0));
}

#[tokio::test]
async fn relocation_is_one_update() {
    let h = harness();
    h.session.create_river("drag").await;
    let a = h.session.create_user_node("a", None).unwrap();
    let b = h.session.create_user_node("b", Some(a)).unwrap();

    let moved = h
        .session
        .relocate_nodes(&[(a, Position::new(10.0, 10.0)), (b, Position::new(10.0, 300.0))])
        .unwrap();

    assert_eq!(moved, 2);
    assert_eq!(h.session.node(b).unwrap().position, Some(Position::new(10.0, 300.0)));
    let ghost = NodeId::new();
    assert_eq!(
        h.session
            .relocate_nodes(&[(a, Position::ORIGIN), (ghost, Position::ORIGIN)]),
        Err(SessionError::NodeNotFound(ghost))
    );
    assert_eq!(h.session.node(a).unwrap().position, Some(Position::new(10.0, 10.0)));
}

#[tokio::test]
async fn unplaced_nodes_are_resolved_in_one_pass() {
    let h = harness();
    let mut river = River::new("imported");
    let root = Node::user("question", None);
    let child = Node::user("answer", Some(root.id));
    river.root_node_id = Some(root.id);
    let (root_id, child_id) = (root.id, child.id);
    river.nodes.insert(root.id, root);
    river.nodes.insert(child.id, child);
    h.local.save_river(&river).unwrap();

    h.session.load_river(river.id).await.unwrap();
    assert_eq!(h.session.layout_pending().unwrap(), 2);
    assert_eq!(h.session.layout_pending().unwrap(), 0);

    assert_eq!(h.session.node(root_id).unwrap().position, Some(Position::ORIGIN));
    assert_eq!(
        h.session.node(child_id).unwrap().position,
        Some(Position::new(0.0, 220.0))
    );
}

#[tokio::test]
async fn corrupt_river_is_refused() {
    let h = harness();
    let mut river = River::new("broken");
    let missing = NodeId::new();
    let orphan = Node::user("lost", Some(missing));
    let orphan_id = orphan.id;
    river.nodes.insert(orphan.id, orphan);
    h.local.save_river(&river).unwrap();

    assert_eq!(
        h.session.load_river(river.id).await,
        Err(SessionError::MissingAncestor {
            node: orphan_id,
            missing
        })
    );
    assert_eq!(h.session.active_river_id(), None);
    let unknown = RiverId::new();
    assert_eq!(
        h.session.load_river(unknown).await,
        Err(SessionError::RiverNotFound(unknown))
    );
}

#[tokio::test]
async fn edits_persist_on_flush() {
    let h = harness();
    let summary = h.session.create_river("durable").await;
    assert!(h.local.river(summary.id).unwrap().nodes.is_empty());

    h.session.create_user_node("kept", None).unwrap();
    h.session.rename_river("renamed").unwrap();
    assert!(h.local.river(summary.id).unwrap().nodes.is_empty());

    assert_eq!(h.session.flush().await, 1);
    let stored = h.local.river(summary.id).unwrap();
    assert_eq!(stored.nodes.len(), 1);
    assert_eq!(stored.name, "renamed");
    assert_eq!(h.session.list_rivers(true).await[0].name, "renamed");
}

#[tokio::test(start_paused = true)]
async fn edits_persist_after_the_debounce_window() {
    let h = harness();
    let summary = h.session.create_river("debounced").await;
    h.session.create_user_node("one", None).unwrap();
    h.session.create_user_node("two", None).unwrap();

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(h.local.river(summary.id).unwrap().nodes.len(), 2);
    assert_eq!(h.session.sync().pending_writes(), 0);
}

#[tokio::test]
async fn api_keys_are_written_immediately() {
    let local = Arc::new(LocalStore::in_memory());
    let stored = Settings {
        api_keys: ApiKeys {
            openrouter: "stored-openrouter".into(),
            ..ApiKeys::default()
        },
        ..Settings::default()
    };
    local.save_settings(&stored).unwrap();
    let h = harness_on(local);
    h.session.initialize().await.unwrap();
    let patch = ApiKeys {
        openai: "sk-new".into(),
        ..ApiKeys::default()
    };

    assert!(h.session.update_api_keys(&patch).await);

    let stored = h.local.settings().api_keys;
    assert_eq!(stored.openai, "sk-new");
    assert_eq!(stored.openrouter, "stored-openrouter");
    assert_eq!(stored.google, "");
    assert_eq!(h.session.sync().pending_writes(), 0);
}

#[tokio::test]
async fn session_only_keys_are_not_persisted() {
    let h = harness();
    h.transport.push(Script::ok(openai_frames(&["ok"])));
    h.transport.push(Script::ok(openai_frames(&["again"])));
    assert!(h.session.api_keys().has_any());
    assert!(!h.session.settings().api_keys.has_any());

    h.session.create_river("ephemeral keys").await;
    let user = h.session.create_user_node("hi", None).unwrap();
    h.session
        .create_ai_node_and_stream(user, free_model())
        .await
        .unwrap();
    h.session
        .create_ai_nodes_and_stream(user, &[free_model()])
        .await
        .unwrap();
    h.session.flush().await;

    assert_eq!(
        h.transport.requests()[0].header("authorization"),
        Some("Bearer test-openrouter")
    );
    let stored = h.local.settings();
    assert!(!stored.api_keys.has_any());
    assert_eq!(stored.last_used_model, Some(free_model()));
    assert_eq!(stored.last_chat_selected_models, vec![free_model()]);
}

#[tokio::test]
async fn initialize_reopens_the_last_river() {
    let local = Arc::new(LocalStore::in_memory());
    let first = harness_on(local.clone());
    let summary = first.session.create_river("remembered").await;
    first.session.create_user_node("still here", None).unwrap();
    first.session.flush().await;

    let second = harness_on(local);
    second.session.initialize().await.unwrap();
    assert_eq!(second.session.active_river_id(), Some(summary.id));
    assert_eq!(second.session.active_river().unwrap().nodes.len(), 1);
}

#[tokio::test]
async fn initialize_forgets_a_vanished_river() {
    let h = harness();
    h.local.set_active_river_id(Some(RiverId::new())).unwrap();

    h.session.initialize().await.unwrap();

    assert_eq!(h.session.active_river_id(), None);
    assert_eq!(h.local.active_river_id(), None);
}

#[tokio::test]
async fn deleting_the_active_river_closes_it() {
    let h = harness();
    let summary = h.session.create_river("gone soon").await;
    h.session.create_user_node("x", None).unwrap();

    h.session.delete_river(summary.id).await;

    assert_eq!(h.session.active_river_id(), None);
    assert_eq!(h.session.selected_node(), None);
    assert!(h.session.list_rivers(true).await.is_empty());
    assert_eq!(h.local.active_river_id(), None);
}

#[tokio::test]
async fn observer_sees_every_token() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let h = harness();
    let session = h.session.clone().with_token_observer({
        let seen = seen.clone();
        Arc::new(move |_: NodeId, token: &str| seen.lock().push(token.to_string()))
    });
    h.transport.push(Script::ok(openai_frames(&["a", "b", "c"])));
    session.create_river("observed").await;
    let user = session.create_user_node("go", None).unwrap();

    session.create_ai_node_and_stream(user, free_model()).await.unwrap();

    assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn generating_node_is_locked_until_it_settles() {
    let h = harness();
    h.transport
        .push(Script::ok(vec![token_frame("partial")]).hanging());
    h.session.create_river("hanging").await;
    let user = h.session.create_user_node("wait", None).unwrap();

    let session = h.session.clone();
    let task = tokio::spawn(async move { session.create_ai_node_and_stream(user, free_model()).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let ai = h.session.selected_node_id().unwrap();
    let node = h.session.node(ai).unwrap();
    assert_eq!(node.state, NodeState::Generating);
    assert_eq!(node.content, "partial");
    assert_eq!(h.session.active_streams(), 1);
    assert_eq!(
        h.session.update_node_content(ai, "edited"),
        Err(SessionError::Tree(TreeError::ContentLocked(ai)))
    );

    task.abort();
    let _ = task.await;
    assert_eq!(h.session.active_streams(), 0);
}

#[tokio::test(start_paused = true)]
async fn tokens_for_a_deleted_node_are_dropped() {
    let h = harness();
    h.transport.push(
        Script::ok(openai_frames(&["one", "two", "three"])).with_delay(Duration::from_millis(100)),
    );
    h.session.create_river("deleted mid-stream").await;
    let user = h.session.create_user_node("go", None).unwrap();

    let session = h.session.clone();
    let task = tokio::spawn(async move { session.create_ai_node_and_stream(user, free_model()).await });
    tokio::time::sleep(Duration::from_millis(150)).await;

    let ai = h.session.selected_node_id().unwrap();
    h.session.delete_node(ai).unwrap();
    let returned = task.await.unwrap().unwrap();

    assert_eq!(returned, ai);
    assert_eq!(h.session.active_river().unwrap().nodes.len(), 1);
    assert_eq!(h.session.selected_node_id(), None);
}

#[tokio::test(start_paused = true)]
async fn stream_settles_into_a_river_closed_mid_stream() {
    let h = harness();
    h.transport.push(
        Script::ok(openai_frames(&["Hel", "lo"])).with_delay(Duration::from_millis(100)),
    );
    let first = h.session.create_river("first").await;
    let user = h.session.create_user_node("go", None).unwrap();

    let session = h.session.clone();
    let task = tokio::spawn(async move { session.create_ai_node_and_stream(user, free_model()).await });
    tokio::time::sleep(Duration::from_millis(150)).await;
    let ai = h.session.selected_node_id().unwrap();

    let second = h.session.create_river("second").await;
    assert_eq!(task.await.unwrap().unwrap(), ai);
    h.session.flush().await;

    assert_eq!(h.session.active_river_id(), Some(second.id));
    let stored = h.local.river(first.id).unwrap();
    let node = &stored.nodes[&ai];
    assert_eq!(node.state, NodeState::Complete);
    assert_eq!(node.content, "Hello");

    h.session.load_river(first.id).await.unwrap();
    h.session.update_node_content(ai, "edited").unwrap();
    assert_eq!(h.session.node(ai).unwrap().content, "edited");
}

#[tokio::test(start_paused = true)]
async fn stream_into_a_deleted_river_does_not_revive_it() {
    let h = harness();
    h.transport.push(
        Script::ok(openai_frames(&["a", "b"])).with_delay(Duration::from_millis(100)),
    );
    let doomed = h.session.create_river("doomed").await;
    let user = h.session.create_user_node("go", None).unwrap();

    let session = h.session.clone();
    let task = tokio::spawn(async move { session.create_ai_node_and_stream(user, free_model()).await });
    tokio::time::sleep(Duration::from_millis(150)).await;

    h.session.delete_river(doomed.id).await;
    task.await.unwrap().unwrap();
    h.session.flush().await;

    assert!(h.local.river(doomed.id).is_none());
    assert!(h.session.list_rivers(true).await.is_empty());
}

#[tokio::test]
async fn catalog_seeds_enabled_models_once() {
    let h = harness();
    let catalog = vec![
        ModelRef::new("x/a", "A"),
        ModelRef::new("mistralai/mistral-7b-instruct:free", "Mistral 7B"),
    ];
    h.session.update_settings(|s| {
        s.last_chat_selected_models = vec![ModelRef::new("retired/model", "Retired")];
    });

    let settings = h.session.set_available_models(catalog.clone());

    assert_eq!(settings.enabled_models.len(), 1);
    assert!(settings.last_chat_selected_models.is_empty());
    assert_eq!(h.session.enabled_models(), vec![catalog[1].clone()]);

    h.session.update_settings(|s| {
        s.enabled_models.insert("x/a".into(), true);
    });
    h.session.set_available_models(catalog.clone());
    assert_eq!(h.session.enabled_models(), catalog);
}
