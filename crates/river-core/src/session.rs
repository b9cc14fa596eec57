//! River Session
//!
//! Orchestrates the node store, layout engine, streaming aggregator and
//! sync coordinator behind the operations a client needs.
//!
//! # State
//!
//! The active river, the selected node, the hydrated settings and any
//! session-only credentials live behind one mutex. Every mutation takes the lock, changes the store,
//! snapshots what needs persisting and releases the lock before any await.
//! Stream callbacks take the same lock per token, so concurrent streams and
//! user edits are serialized without ever overlapping on a field.
//!
//! # Persistence
//!
//! Structural changes schedule a debounced river save. Tokens do not; the
//! terminal transition of a generating node does. A stream that settles
//! after its river was closed writes its final state into the saved copy.
//! Session-only credentials never reach a store.

use crate::catalog;
use crate::config::RiverConfig;
use crate::error::{SessionError, SessionResult};
use futures::future::join_all;
use parking_lot::Mutex;
use river_stream::{
    build_context, ChatTransport, CompletionRequest, StreamError, StreamSink, StreamingAggregator,
};
use river_sync::SyncCoordinator;
use river_tree::{
    ApiKeys, BranchMetadata, LayoutEngine, ModelRef, Node, NodeId, NodeStore, Position, Removal,
    River, RiverId, RiverSummary, Settings, TreeError, TreeResult,
};
use std::sync::Arc;

/// Called with every token appended to a node
pub type TokenObserver = Arc<dyn Fn(NodeId, &str) + Send + Sync>;

#[derive(Default)]
struct SessionState {
    store: Option<NodeStore>,
    selected: Option<NodeId>,
    settings: Settings,
    session_keys: ApiKeys,
}

impl SessionState {
    fn store(&self) -> SessionResult<&NodeStore> {
        self.store.as_ref().ok_or(SessionError::NoActiveRiver)
    }

    fn store_mut(&mut self) -> SessionResult<&mut NodeStore> {
        self.store.as_mut().ok_or(SessionError::NoActiveRiver)
    }

    fn api_keys(&self) -> ApiKeys {
        self.settings.api_keys.merged_with(&self.session_keys)
    }
}

/// How a stream ended
enum Settlement {
    Complete,
    Failed(String),
}

impl Settlement {
    /// Bring `node` up to `received`, then move it to its terminal state
    fn apply(&self, store: &mut NodeStore, node: NodeId, received: &str) -> TreeResult<()> {
        let stored = store.get(node).ok_or(TreeError::NodeNotFound(node))?;
        if let Some(missing) = received.strip_prefix(stored.content.as_str()) {
            if !missing.is_empty() {
                store.append_content(node, missing)?;
            }
        }
        match self {
            Self::Complete => store.complete(node),
            Self::Failed(message) => store.fail(node, message.clone()),
        }
    }
}

/// Result of routing a stream callback to the active river
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Routed {
    Applied,
    Rejected,
    Detached,
}

/// River Session
#[derive(Clone)]
pub struct RiverSession {
    state: Arc<Mutex<SessionState>>,
    layout: LayoutEngine,
    aggregator: StreamingAggregator,
    sync: SyncCoordinator,
    observer: Option<TokenObserver>,
}

impl RiverSession {
    /// Create a session with no river loaded
    #[must_use]
    pub fn new(config: &RiverConfig, transport: Arc<dyn ChatTransport>, sync: SyncCoordinator) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState::default())),
            layout: LayoutEngine::new(config.layout),
            aggregator: StreamingAggregator::new(transport).with_endpoints(config.endpoints.clone()),
            sync,
            observer: None,
        }
    }

    /// With a per-token observer
    #[must_use]
    pub fn with_token_observer(mut self, observer: TokenObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    #[inline]
    #[must_use]
    pub fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }

    /// Hydrate settings and reopen the last active river
    ///
    /// A remembered river that no longer exists is forgotten, not an error.
    ///
    /// # Errors
    /// `MissingAncestor` or `Tree` if the remembered river is corrupt
    pub async fn initialize(&self) -> SessionResult<()> {
        let settings = self.sync.get_settings(false).await;
        self.state.lock().settings = settings;

        let Some(id) = self.sync.local().active_river_id() else {
            tracing::debug!("no river to restore");
            return Ok(());
        };
        match self.load_river(id).await {
            Ok(_) => Ok(()),
            Err(SessionError::RiverNotFound(_)) => {
                tracing::warn!(river = %id, "remembered river is gone");
                self.remember_active(None);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    // ---- Rivers -------------------------------------------------------

    /// Create an empty river and make it active
    pub async fn create_river(&self, name: impl Into<String>) -> RiverSummary {
        let river = River::new(name);
        let summary = river.summary();
        self.sync.save_river_now(river.clone()).await;
        self.activate(NodeStore::new(river));
        tracing::info!(river = %summary.id, name = %summary.name, "river created");
        summary
    }

    /// Load a river and make it active
    ///
    /// # Errors
    /// - `RiverNotFound` if no store holds it
    /// - `MissingAncestor` or `Tree` if the document breaks tree invariants
    pub async fn load_river(&self, id: RiverId) -> SessionResult<RiverSummary> {
        let river = self
            .sync
            .get_river(id)
            .await
            .ok_or(SessionError::RiverNotFound(id))?;
        river.validate()?;
        let summary = river.summary();
        self.activate(NodeStore::new(river));
        tracing::info!(river = %id, nodes = summary.node_count, "river loaded");
        Ok(summary)
    }

    /// Delete a river; closes it if it is the active one
    pub async fn delete_river(&self, id: RiverId) {
        let was_active = {
            let mut state = self.state.lock();
            let active = state.store.as_ref().is_some_and(|s| s.river().id == id);
            if active {
                state.store = None;
                state.selected = None;
            }
            active
        };
        if was_active {
            self.remember_active(None);
        }
        self.sync.delete_river(id).await;
        tracing::info!(river = %id, was_active, "river deleted");
    }

    /// Rename the active river
    ///
    /// # Errors
    /// `NoActiveRiver`
    pub fn rename_river(&self, name: impl Into<String>) -> SessionResult<()> {
        self.mutate(|state| {
            state.store_mut()?.rename(name);
            Ok(())
        })
    }

    /// River summaries, newest first
    pub async fn list_rivers(&self, force_refresh: bool) -> Vec<RiverSummary> {
        self.sync.list_rivers(force_refresh).await
    }

    /// Snapshot of the active river
    #[must_use]
    pub fn active_river(&self) -> Option<River> {
        self.state.lock().store.as_ref().map(|s| s.river().clone())
    }

    #[must_use]
    pub fn active_river_id(&self) -> Option<RiverId> {
        self.state.lock().store.as_ref().map(|s| s.river().id)
    }

    fn activate(&self, store: NodeStore) {
        let id = store.river().id;
        {
            let mut state = self.state.lock();
            state.store = Some(store);
            state.selected = None;
        }
        self.remember_active(Some(id));
    }

    fn remember_active(&self, id: Option<RiverId>) {
        if let Err(err) = self.sync.local().set_active_river_id(id) {
            tracing::warn!(error = %err, "could not record active river");
        }
    }

    // ---- Nodes --------------------------------------------------------

    /// Add a user turn under `parent_id`, or a new root when `None`
    ///
    /// # Errors
    /// - `NoActiveRiver`
    /// - `NodeNotFound` if the parent is absent
    pub fn create_user_node(
        &self,
        content: impl Into<String>,
        parent_id: Option<NodeId>,
    ) -> SessionResult<NodeId> {
        self.mutate(|state| {
            let store = state.store_mut()?;
            let node = Node::user(content, parent_id);
            self.insert_placed(store, node)
        })
    }

    /// Add a generating AI node under `parent_id` and stream into it
    ///
    /// Returns once the stream has settled. Provider and transport failures
    /// are recorded on the node, not returned.
    ///
    /// # Errors
    /// - `NoActiveRiver`
    /// - `NodeNotFound` if the parent is absent
    /// - `MissingAncestor` if the parent's context cannot be built
    pub async fn create_ai_node_and_stream(
        &self,
        parent_id: NodeId,
        model: ModelRef,
    ) -> SessionResult<NodeId> {
        let (river_id, node_id, request) = self.prepare_generation(parent_id, model)?;

        let mut sink = NodeStreamSink {
            session: self,
            river: river_id,
            node: node_id,
            received: String::new(),
            detached: None,
        };
        let outcome = self.aggregator.run(&request, &mut sink).await;
        tracing::debug!(node = %node_id, completed = outcome.is_completed(), "generation settled");
        if let Some(settlement) = sink.detached.take() {
            self.settle_detached(river_id, node_id, &sink.received, &settlement)
                .await;
        }
        Ok(node_id)
    }

    /// Write the final state of a stream whose river is no longer active
    async fn settle_detached(
        &self,
        river_id: RiverId,
        node_id: NodeId,
        received: &str,
        settlement: &Settlement,
    ) {
        self.sync.flush_river(river_id).await;
        let Some(river) = self.sync.get_river(river_id).await else {
            tracing::debug!(river = %river_id, node = %node_id, "river gone before stream settled");
            return;
        };
        let mut store = NodeStore::new(river);
        if let Err(err) = settlement.apply(&mut store, node_id, received) {
            tracing::debug!(node = %node_id, error = %err, "detached stream update dropped");
            return;
        }
        tracing::info!(river = %river_id, node = %node_id, "stream settled after its river was closed");
        self.sync.schedule_river_save(store.into_river());
    }

    /// One generation per model under the same parent, streamed concurrently
    ///
    /// # Errors
    /// The first structural error any generation raised
    pub async fn create_ai_nodes_and_stream(
        &self,
        parent_id: NodeId,
        models: &[ModelRef],
    ) -> SessionResult<Vec<NodeId>> {
        self.update_settings(|s| s.last_chat_selected_models = models.to_vec());
        let runs = models
            .iter()
            .map(|model| self.create_ai_node_and_stream(parent_id, model.clone()));
        join_all(runs).await.into_iter().collect()
    }

    /// Ask about a highlighted excerpt of `source_id`
    ///
    /// The user node's content is exactly `prompt`; the excerpt travels in
    /// its branch metadata. Returns the user and AI node IDs.
    ///
    /// # Errors
    /// As [`Self::create_ai_node_and_stream`], with `NodeNotFound` for a
    /// missing source
    pub async fn branch_from_selection(
        &self,
        source_id: NodeId,
        highlighted_text: impl Into<String>,
        prompt: impl Into<String>,
        model: ModelRef,
    ) -> SessionResult<(NodeId, NodeId)> {
        let prompt = prompt.into();
        let metadata = BranchMetadata {
            source_node_id: source_id,
            highlighted_text: highlighted_text.into(),
            elaboration_prompt: Some(prompt.clone()),
        };
        let user_id = self.mutate(|state| {
            let store = state.store_mut()?;
            let node = Node::user(prompt, Some(source_id)).with_branch(metadata);
            self.insert_placed(store, node)
        })?;
        let ai_id = self.create_ai_node_and_stream(user_id, model).await?;
        Ok((user_id, ai_id))
    }

    /// Delete a node and its descendants
    ///
    /// # Errors
    /// - `NoActiveRiver`
    /// - `NodeNotFound`
    pub fn delete_node(&self, id: NodeId) -> SessionResult<Removal> {
        self.mutate(|state| {
            let removal = state.store_mut()?.remove_subtree(id)?;
            if state.selected.is_some_and(|s| removal.contains(s)) {
                state.selected = None;
            }
            Ok(removal)
        })
    }

    /// Replace the content of a settled node
    ///
    /// # Errors
    /// `NoActiveRiver`, `NodeNotFound`, or `Tree` while it is generating
    pub fn update_node_content(&self, id: NodeId, text: impl Into<String>) -> SessionResult<()> {
        self.mutate(|state| Ok(state.store_mut()?.update_content(id, text)?))
    }

    /// Select a node, or clear the selection with `None`
    ///
    /// # Errors
    /// `NoActiveRiver` or `NodeNotFound` when selecting
    pub fn select_node(&self, id: Option<NodeId>) -> SessionResult<()> {
        let mut state = self.state.lock();
        if let Some(id) = id {
            if !state.store()?.contains(id) {
                return Err(SessionError::NodeNotFound(id));
            }
        }
        state.selected = id;
        Ok(())
    }

    #[must_use]
    pub fn selected_node_id(&self) -> Option<NodeId> {
        self.state.lock().selected
    }

    #[must_use]
    pub fn selected_node(&self) -> Option<Node> {
        let state = self.state.lock();
        let id = state.selected?;
        state.store.as_ref()?.get(id).cloned()
    }

    /// # Errors
    /// `NoActiveRiver` or `NodeNotFound`
    pub fn node(&self, id: NodeId) -> SessionResult<Node> {
        let state = self.state.lock();
        state
            .store()?
            .get(id)
            .cloned()
            .ok_or(SessionError::NodeNotFound(id))
    }

    /// Conversation from the root down to `id`
    ///
    /// # Errors
    /// `NoActiveRiver`, `NodeNotFound` or `MissingAncestor`
    pub fn path_to_node(&self, id: NodeId) -> SessionResult<Vec<Node>> {
        let state = self.state.lock();
        let path = state.store()?.path_to_root(id)?;
        Ok(path.into_iter().cloned().collect())
    }

    /// # Errors
    /// `NoActiveRiver` or `NodeNotFound`
    pub fn children(&self, id: NodeId) -> SessionResult<Vec<Node>> {
        let state = self.state.lock();
        let store = state.store()?;
        if !store.contains(id) {
            return Err(SessionError::NodeNotFound(id));
        }
        Ok(store.children(id).into_iter().cloned().collect())
    }

    /// # Errors
    /// `NoActiveRiver` or `NodeNotFound`
    pub fn branch_count(&self, id: NodeId) -> SessionResult<usize> {
        let state = self.state.lock();
        let store = state.store()?;
        if !store.contains(id) {
            return Err(SessionError::NodeNotFound(id));
        }
        Ok(store.branch_count(id))
    }

    /// Move several nodes as one update
    ///
    /// # Errors
    /// `NoActiveRiver`, or `NodeNotFound` for the first unknown ID (nothing
    /// is moved)
    pub fn relocate_nodes(&self, moves: &[(NodeId, Position)]) -> SessionResult<usize> {
        self.mutate(|state| Ok(state.store_mut()?.apply_positions(moves)?))
    }

    /// Place every node whose layout was deferred
    ///
    /// # Errors
    /// `NoActiveRiver`
    pub fn layout_pending(&self) -> SessionResult<usize> {
        self.mutate(|state| {
            let store = state.store_mut()?;
            let moves = self.layout.resolve_pending(store.river());
            if moves.is_empty() {
                return Ok(0);
            }
            Ok(store.apply_positions(&moves)?)
        })
    }

    fn insert_placed(&self, store: &mut NodeStore, mut node: Node) -> SessionResult<NodeId> {
        if let Some(parent) = node.parent_id {
            if !store.contains(parent) {
                return Err(SessionError::NodeNotFound(parent));
            }
        }
        node.position = self.layout.place(store.river(), node.parent_id).position();
        if node.position.is_none() {
            tracing::debug!(node = %node.id, "layout deferred until parent is placed");
        }
        Ok(store.add_node(node)?)
    }

    /// Everything a generation needs, captured under one lock
    fn prepare_generation(
        &self,
        parent_id: NodeId,
        model: ModelRef,
    ) -> SessionResult<(RiverId, NodeId, CompletionRequest)> {
        let (river, settings, node_id, request) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let store = state.store.as_mut().ok_or(SessionError::NoActiveRiver)?;
            if !store.contains(parent_id) {
                return Err(SessionError::NodeNotFound(parent_id));
            }
            let messages = build_context(store, parent_id)?;
            let node_id = self.insert_placed(store, Node::ai(parent_id, model.clone()))?;

            state.selected = Some(node_id);
            state.settings.last_used_model = Some(model.clone());
            let river = store.river().clone();
            let request = CompletionRequest::new(model, messages, state.api_keys());
            (
                river,
                state.settings.clone(),
                node_id,
                request,
            )
        };

        let river_id = river.id;
        tracing::info!(
            river = %river_id,
            node = %node_id,
            model = %request.model.id,
            context = request.messages.len(),
            "generation started"
        );
        self.sync.schedule_river_save(river);
        self.sync.schedule_settings_save(settings);
        Ok((river_id, node_id, request))
    }

    /// Run `f` under the lock; on success schedule a save of the active river
    fn mutate<T>(&self, f: impl FnOnce(&mut SessionState) -> SessionResult<T>) -> SessionResult<T> {
        let (value, snapshot) = {
            let mut state = self.state.lock();
            let value = f(&mut *state)?;
            (value, state.store.as_ref().map(|s| s.river().clone()))
        };
        if let Some(river) = snapshot {
            self.sync.schedule_river_save(river);
        }
        Ok(value)
    }

    /// Apply a stream callback to a node of `river`
    ///
    /// `Detached` when `river` is not the active river; `Rejected` when the
    /// node was deleted mid-stream.
    fn apply_to_node(
        &self,
        river: RiverId,
        node: NodeId,
        persist: bool,
        f: impl FnOnce(&mut NodeStore) -> TreeResult<()>,
    ) -> Routed {
        let snapshot = {
            let mut state = self.state.lock();
            let Some(store) = state.store.as_mut().filter(|s| s.river().id == river) else {
                tracing::debug!(river = %river, node = %node, "stream target river no longer active");
                return Routed::Detached;
            };
            if let Err(err) = f(store) {
                tracing::warn!(node = %node, error = %err, "stream update dropped");
                return Routed::Rejected;
            }
            persist.then(|| store.river().clone())
        };
        if let Some(river) = snapshot {
            self.sync.schedule_river_save(river);
        }
        Routed::Applied
    }

    // ---- Settings -----------------------------------------------------

    /// Stored settings; session-only credentials are not included
    #[must_use]
    pub fn settings(&self) -> Settings {
        self.state.lock().settings.clone()
    }

    /// Credentials requests are sent with: stored keys under the session overlay
    #[must_use]
    pub fn api_keys(&self) -> ApiKeys {
        self.state.lock().api_keys()
    }

    /// Edit settings; the write is debounced
    pub fn update_settings(&self, f: impl FnOnce(&mut Settings)) -> Settings {
        let settings = {
            let mut state = self.state.lock();
            f(&mut state.settings);
            state.settings.clone()
        };
        self.sync.schedule_settings_save(settings.clone());
        settings
    }

    /// Store newly entered credentials immediately
    ///
    /// Empty fields in `keys` keep the current value.
    pub async fn update_api_keys(&self, keys: &ApiKeys) -> bool {
        let settings = {
            let mut state = self.state.lock();
            state.settings.api_keys = state.settings.api_keys.merged_with(keys);
            state.settings.clone()
        };
        self.sync.save_settings_now(settings).await
    }

    /// Overlay credentials for this session only; nothing is persisted
    ///
    /// Empty fields in `keys` leave the stored key in effect.
    pub fn use_api_keys(&self, keys: &ApiKeys) {
        let mut state = self.state.lock();
        state.session_keys = state.session_keys.merged_with(keys);
    }

    /// Replace the cached model catalog
    ///
    /// Seeds `enabled_models` on first use and drops remembered selections
    /// that are no longer valid.
    pub fn set_available_models(&self, models: Vec<ModelRef>) -> Settings {
        self.update_settings(|s| {
            if s.enabled_models.is_empty() {
                s.enabled_models = catalog::default_enabled_models(&models);
            }
            s.last_chat_selected_models = catalog::validate_selected_models(
                &s.last_chat_selected_models,
                &models,
                &s.enabled_models,
            );
            s.available_models = models;
        })
    }

    #[must_use]
    pub fn last_used_model(&self) -> Option<ModelRef> {
        self.state.lock().settings.last_used_model.clone()
    }

    /// Catalog models the user has switched on
    #[must_use]
    pub fn enabled_models(&self) -> Vec<ModelRef> {
        let state = self.state.lock();
        catalog::enabled_models(&state.settings.enabled_models, &state.settings.available_models)
    }

    // ---- Lifecycle ----------------------------------------------------

    /// Write every pending debounced save
    pub async fn flush(&self) -> usize {
        self.sync.flush().await
    }

    /// Streams currently being read
    #[inline]
    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.aggregator.active_streams()
    }
}

impl std::fmt::Debug for RiverSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiverSession")
            .field("active_river", &self.active_river_id())
            .field("selected", &self.selected_node_id())
            .field("aggregator", &self.aggregator)
            .finish_non_exhaustive()
    }
}

/// Routes stream callbacks into one node of the session
struct NodeStreamSink<'a> {
    session: &'a RiverSession,
    river: RiverId,
    node: NodeId,
    /// Full text streamed so far
    received: String,
    /// Terminal state that could not reach the active river
    detached: Option<Settlement>,
}

impl NodeStreamSink<'_> {
    fn settle(&mut self, settlement: Settlement) {
        let (node, received) = (self.node, self.received.as_str());
        let routed = self.session.apply_to_node(self.river, node, true, |store| {
            settlement.apply(store, node, received)
        });
        if routed == Routed::Detached {
            self.detached = Some(settlement);
        }
    }
}

impl StreamSink for NodeStreamSink<'_> {
    fn on_token(&mut self, text: &str) {
        let node = self.node;
        self.received.push_str(text);
        self.session
            .apply_to_node(self.river, node, false, |store| store.append_content(node, text));
        if let Some(observer) = &self.session.observer {
            observer(node, text);
        }
    }

    fn on_complete(&mut self) {
        self.settle(Settlement::Complete);
    }

    fn on_error(&mut self, error: &StreamError) {
        self.settle(Settlement::Failed(error.to_string()));
    }
}
