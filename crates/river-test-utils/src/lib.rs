//! Testing utilities for the RiverChat workspace
//!
//! Shared fixtures, a scripted transport and a recording sink.

#![allow(missing_docs)]

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use river_stream::{
    ChatTransport, HttpRequest, StreamError, StreamSink, TransportResponse,
};
use river_tree::{ApiKeys, Backend, ModelRef, Node, NodeId, NodeStore, River};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

pub fn free_model() -> ModelRef {
    let mut model = ModelRef::new("mistralai/mistral-7b-instruct:free", "Mistral 7B Instruct");
    model.is_free = true;
    model.context_length = 32_768;
    model
}

pub fn model_on(backend: Backend) -> ModelRef {
    let id = match backend {
        Backend::OpenRouter => "openai/gpt-4o",
        Backend::OpenAi => "openai/gpt-4o-mini",
        Backend::Anthropic => "anthropic/claude-3-5-haiku",
        Backend::Google => "google/gemini-1.5-flash",
    };
    ModelRef::new(id, id).with_backend(backend)
}

pub fn all_keys() -> ApiKeys {
    ApiKeys {
        openrouter: "test-openrouter".into(),
        openai: "test-openai".into(),
        anthropic: "test-anthropic".into(),
        google: "test-google".into(),
    }
}

/// Linear user/user/... chain of `len` nodes; returns ids root first
pub fn chain(len: usize) -> (NodeStore, Vec<NodeId>) {
    let mut store = NodeStore::new(River::new("fixture"));
    let mut ids: Vec<NodeId> = Vec::new();
    for i in 0..len {
        let node = Node::user(format!("turn {i}"), ids.last().copied());
        ids.push(store.add_node(node).unwrap());
    }
    (store, ids)
}

/// OpenAI-compatible SSE body for `tokens`, ending in `[DONE]`
pub fn openai_frames(tokens: &[&str]) -> Vec<Bytes> {
    let mut frames: Vec<Bytes> = tokens
        .iter()
        .map(|t| {
            let payload = serde_json::json!({ "choices": [{ "delta": { "content": t } }] });
            Bytes::from(format!("data: {payload}\n\n"))
        })
        .collect();
    frames.push(Bytes::from_static(b"data: [DONE]\n\n"));
    frames
}

/// Anthropic SSE body for `tokens`, ending in `message_stop`
pub fn anthropic_frames(tokens: &[&str]) -> Vec<Bytes> {
    let mut frames = vec![Bytes::from_static(
        b"event: message_start\ndata: {\"type\":\"message_start\"}\n\n",
    )];
    frames.extend(tokens.iter().map(|t| {
        let payload = serde_json::json!({
            "type": "content_block_delta",
            "delta": { "type": "text_delta", "text": t }
        });
        Bytes::from(format!("event: content_block_delta\ndata: {payload}\n\n"))
    }));
    frames.push(Bytes::from_static(
        b"event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
    ));
    frames
}

/// Google SSE body; Google has no terminator frame
pub fn google_frames(tokens: &[&str]) -> Vec<Bytes> {
    tokens
        .iter()
        .map(|t| {
            let payload = serde_json::json!({
                "candidates": [{ "content": { "role": "model", "parts": [{ "text": t }] } }]
            });
            Bytes::from(format!("data: {payload}\n\n"))
        })
        .collect()
}

/// `{ "error": { "message": .. } }`
pub fn error_body(message: &str) -> Bytes {
    Bytes::from(serde_json::json!({ "error": { "message": message } }).to_string())
}

/// One canned response
#[derive(Debug, Clone)]
pub struct Script {
    pub status: u16,
    pub chunks: Vec<Result<Bytes, StreamError>>,
    /// Never end the body after the last chunk
    pub hang: bool,
    /// Sleep before each chunk
    pub chunk_delay: Option<Duration>,
}

impl Script {
    pub fn ok(chunks: Vec<Bytes>) -> Self {
        Self {
            status: 200,
            chunks: chunks.into_iter().map(Ok).collect(),
            hang: false,
            chunk_delay: None,
        }
    }

    pub fn status(status: u16, body: Bytes) -> Self {
        Self {
            status,
            chunks: vec![Ok(body)],
            hang: false,
            chunk_delay: None,
        }
    }

    /// Chunks followed by a transport failure
    pub fn broken(chunks: Vec<Bytes>, error: &str) -> Self {
        let mut script = Self::ok(chunks);
        script.chunks.push(Err(StreamError::transport(error)));
        script
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }
}

/// Transport that replays scripts in order and records every request
#[derive(Debug, Default, Clone)]
pub struct ScriptedTransport {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, script: Script) -> Self {
        self.push(script);
        self
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.scripts.lock().len()
    }
}

#[async_trait::async_trait]
impl ChatTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<TransportResponse, StreamError> {
        self.requests.lock().push(request);
        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| StreamError::transport("connection refused"))?;

        let delay = script.chunk_delay;
        let body = stream::iter(script.chunks).then(move |chunk| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            chunk
        });
        let body = if script.hang {
            body.chain(stream::pending()).boxed()
        } else {
            body.boxed()
        };
        Ok(TransportResponse {
            status: script.status,
            body,
        })
    }
}

/// Sink that records every callback
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecordingSink {
    pub tokens: Vec<String>,
    pub completed: usize,
    pub errors: Vec<String>,
}

impl RecordingSink {
    pub fn text(&self) -> String {
        self.tokens.concat()
    }
}

impl StreamSink for RecordingSink {
    fn on_token(&mut self, text: &str) {
        self.tokens.push(text.to_string());
    }

    fn on_complete(&mut self) {
        self.completed += 1;
    }

    fn on_error(&mut self, error: &StreamError) {
        self.errors.push(error.to_string());
    }
}
