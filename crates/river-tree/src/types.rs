//! Core types for river trees
//!
//! Defines the persisted shape of a conversation tree:
//! - River and node identifiers
//! - Message nodes and their lifecycle state
//! - Branch provenance and advisory positions
//! - Model references and per-identity settings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Generate new node ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique river identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiverId(pub Uuid);

impl RiverId {
    /// Generate new river ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RiverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RiverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RiverId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// A user turn
    User,
    /// A model turn
    Ai,
}

/// Node lifecycle state
///
/// `Generating` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Content is final
    Complete,
    /// Content is still streaming in
    Generating,
    /// Generation failed; `error` carries the reason
    Error,
}

impl NodeState {
    /// Check if no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NodeState::Generating)
    }
}

/// Advisory canvas position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Create new position
    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Canvas origin
    pub const ORIGIN: Self = Self::new(0.0, 0.0);
}

/// Provenance of a node created from highlighted text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchMetadata {
    /// The node the text was highlighted in
    pub source_node_id: NodeId,
    /// The highlighted fragment, verbatim
    pub highlighted_text: String,
    /// The prompt typed for the elaboration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elaboration_prompt: Option<String>,
}

/// Which upstream API serves a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// OpenRouter aggregation API (OpenAI-compatible framing)
    #[default]
    OpenRouter,
    /// OpenAI chat completions
    OpenAi,
    /// Anthropic messages
    Anthropic,
    /// Google Generative Language
    Google,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::OpenRouter => "openrouter",
            Backend::OpenAi => "openai",
            Backend::Anthropic => "anthropic",
            Backend::Google => "google",
        };
        f.write_str(name)
    }
}

/// Cost per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pricing {
    pub prompt: f64,
    pub completion: f64,
}

/// Reference to a model in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRef {
    /// Catalog ID (e.g. `openai/gpt-4o`)
    pub id: String,
    /// Display name
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub context_length: u32,
    #[serde(default)]
    pub pricing: Pricing,
    #[serde(default)]
    pub is_free: bool,
    /// Display name of the vendor
    #[serde(default)]
    pub provider: String,
    /// API that serves the model
    #[serde(default)]
    pub backend: Backend,
}

impl ModelRef {
    /// Create model reference served through the default backend
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        let provider = id.split('/').next().unwrap_or_default().to_string();
        Self {
            id,
            name: name.into(),
            description: None,
            context_length: 0,
            pricing: Pricing::default(),
            is_free: false,
            provider,
            backend: Backend::default(),
        }
    }

    /// With backend
    #[inline]
    #[must_use]
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }
}

/// One message in a river
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: NodeType,
    pub content: String,
    /// Creation time, milliseconds since the Unix epoch
    pub timestamp: i64,
    pub parent_id: Option<NodeId>,
    pub state: NodeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_metadata: Option<BranchMetadata>,
}

impl Node {
    /// Create a complete user node
    #[must_use]
    pub fn user(content: impl Into<String>, parent_id: Option<NodeId>) -> Self {
        Self {
            id: NodeId::new(),
            kind: NodeType::User,
            content: content.into(),
            timestamp: Utc::now().timestamp_millis(),
            parent_id,
            state: NodeState::Complete,
            model: None,
            error: None,
            position: None,
            branch_metadata: None,
        }
    }

    /// Create an empty AI node in the `Generating` state
    #[must_use]
    pub fn ai(parent_id: NodeId, model: ModelRef) -> Self {
        Self {
            id: NodeId::new(),
            kind: NodeType::Ai,
            content: String::new(),
            timestamp: Utc::now().timestamp_millis(),
            parent_id: Some(parent_id),
            state: NodeState::Generating,
            model: Some(model),
            error: None,
            position: None,
            branch_metadata: None,
        }
    }

    /// With branch metadata
    #[inline]
    #[must_use]
    pub fn with_branch(mut self, metadata: BranchMetadata) -> Self {
        self.branch_metadata = Some(metadata);
        self
    }

    /// With position
    #[inline]
    #[must_use]
    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    /// Check if node has no parent
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// One conversation tree, persisted as a single document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct River {
    pub id: RiverId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub nodes: HashMap<NodeId, Node>,
    pub root_node_id: Option<NodeId>,
}

impl River {
    /// Create an empty river
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: RiverId::new(),
            name: name.into(),
            created_at: now,
            last_modified: now,
            nodes: HashMap::new(),
            root_node_id: None,
        }
    }

    /// Metadata projection without node bodies
    #[must_use]
    pub fn summary(&self) -> RiverSummary {
        RiverSummary {
            id: self.id,
            name: self.name.clone(),
            created_at: self.created_at,
            last_modified: self.last_modified,
            root_node_id: self.root_node_id,
            node_count: self.nodes.len(),
        }
    }

    /// Stamp the modification time
    #[inline]
    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }
}

/// River metadata used by list views and the list cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiverSummary {
    pub id: RiverId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub root_node_id: Option<NodeId>,
    pub node_count: usize,
}

/// Credentials per backend; empty string means unset
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub openrouter: String,
    pub openai: String,
    pub anthropic: String,
    pub google: String,
}

impl ApiKeys {
    /// Key for a backend, if set
    #[must_use]
    pub fn key_for(&self, backend: Backend) -> Option<&str> {
        let key = match backend {
            Backend::OpenRouter => &self.openrouter,
            Backend::OpenAi => &self.openai,
            Backend::Anthropic => &self.anthropic,
            Backend::Google => &self.google,
        };
        (!key.is_empty()).then_some(key.as_str())
    }

    /// Check if any key is configured
    #[inline]
    #[must_use]
    pub fn has_any(&self) -> bool {
        [Backend::OpenRouter, Backend::OpenAi, Backend::Anthropic, Backend::Google]
            .into_iter()
            .any(|b| self.key_for(b).is_some())
    }

    /// Overlay the non-empty keys of `patch`
    #[must_use]
    pub fn merged_with(&self, patch: &ApiKeys) -> ApiKeys {
        let pick = |new: &String, old: &String| {
            if new.is_empty() {
                old.clone()
            } else {
                new.clone()
            }
        };
        ApiKeys {
            openrouter: pick(&patch.openrouter, &self.openrouter),
            openai: pick(&patch.openai, &self.openai),
            anthropic: pick(&patch.anthropic, &self.anthropic),
            google: pick(&patch.google, &self.google),
        }
    }
}

/// Per-identity configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub api_keys: ApiKeys,
    pub last_used_model: Option<ModelRef>,
    /// Model ID -> enabled
    pub enabled_models: BTreeMap<String, bool>,
    pub last_chat_selected_models: Vec<ModelRef>,
    /// Cached catalog
    pub available_models: Vec<ModelRef>,
}
