//! Streaming Aggregator
//!
//! Drives one chat completion and reports through a [`StreamSink`]:
//! - `on_token` for every non-empty text delta, in arrival order
//! - exactly one of `on_complete` / `on_error` at the end
//!
//! Non-2xx responses short-circuit before any decoding. Lines that do not
//! parse are skipped. A body that ends without a terminator frame still
//! completes. Nothing is retried here.

use crate::context::ChatMessage;
use crate::error::StreamError;
use crate::provider::{EndpointConfig, Frame, Provider};
use crate::sse::{SseDecoder, SseLine};
use crate::transport::ChatTransport;
use futures::StreamExt;
use river_tree::{ApiKeys, ModelRef};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Receiver of stream events
pub trait StreamSink: Send {
    fn on_token(&mut self, text: &str);
    fn on_complete(&mut self);
    fn on_error(&mut self, error: &StreamError);
}

/// Everything needed for one completion
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: ModelRef,
    pub messages: Vec<ChatMessage>,
    pub api_keys: ApiKeys,
    /// OpenRouter plugins, forwarded verbatim
    pub plugins: Vec<Value>,
}

impl CompletionRequest {
    #[must_use]
    pub fn new(model: ModelRef, messages: Vec<ChatMessage>, api_keys: ApiKeys) -> Self {
        Self {
            model,
            messages,
            api_keys,
            plugins: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_plugins(mut self, plugins: Vec<Value>) -> Self {
        self.plugins = plugins;
        self
    }
}

/// How a stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed { tokens: usize },
    Failed(StreamError),
}

impl StreamOutcome {
    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, StreamOutcome::Completed { .. })
    }
}

/// Guard marking one open response reader
///
/// Released on drop, so every exit path (return, `?`, or the caller
/// dropping the future mid-stream) gives the reader back.
#[derive(Debug)]
pub struct StreamLease {
    active: Arc<AtomicUsize>,
}

impl StreamLease {
    fn acquire(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self {
            active: Arc::clone(active),
        }
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Streaming Aggregator
#[derive(Clone)]
pub struct StreamingAggregator {
    transport: Arc<dyn ChatTransport>,
    endpoints: EndpointConfig,
    active: Arc<AtomicUsize>,
}

impl StreamingAggregator {
    #[must_use]
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            endpoints: EndpointConfig::default(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: EndpointConfig) -> Self {
        self.endpoints = endpoints;
        self
    }

    #[inline]
    #[must_use]
    pub fn endpoints(&self) -> &EndpointConfig {
        &self.endpoints
    }

    /// Readers currently open
    #[inline]
    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Run one completion to the end, reporting through `sink`
    pub async fn run<S>(&self, request: &CompletionRequest, sink: &mut S) -> StreamOutcome
    where
        S: StreamSink + ?Sized,
    {
        let _lease = StreamLease::acquire(&self.active);
        match self.drive(request, sink).await {
            Ok(tokens) => {
                tracing::info!(model = %request.model.id, tokens, "stream completed");
                sink.on_complete();
                StreamOutcome::Completed { tokens }
            }
            Err(err) => {
                tracing::error!(model = %request.model.id, error = %err, "stream failed");
                sink.on_error(&err);
                StreamOutcome::Failed(err)
            }
        }
    }

    async fn drive<S>(&self, request: &CompletionRequest, sink: &mut S) -> Result<usize, StreamError>
    where
        S: StreamSink + ?Sized,
    {
        let provider = Provider::resolve(&request.model, &request.api_keys, &self.endpoints)?;
        let http = provider.build_request(&request.model, &request.messages, &request.plugins);
        let response = self.transport.send(http).await?;

        if !response.is_success() {
            let status = response.status;
            let body = response.collect_body().await.unwrap_or_default();
            return Err(StreamError::provider(
                status,
                provider.describe_failure(status, &body),
            ));
        }

        let mut decoder = SseDecoder::new();
        let mut body = response.body;
        let mut tokens = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for line in decoder.push(&chunk) {
                if apply(&provider, line, sink, &mut tokens)? {
                    return Ok(tokens);
                }
            }
        }
        if let Some(line) = decoder.finish() {
            apply(&provider, line, sink, &mut tokens)?;
        }
        tracing::debug!(tokens, "body ended without terminator");
        Ok(tokens)
    }
}

impl std::fmt::Debug for StreamingAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingAggregator")
            .field("endpoints", &self.endpoints)
            .field("active", &self.active_streams())
            .finish_non_exhaustive()
    }
}

/// Returns `true` once the stream is finished
fn apply<S>(
    provider: &Provider,
    line: SseLine,
    sink: &mut S,
    tokens: &mut usize,
) -> Result<bool, StreamError>
where
    S: StreamSink + ?Sized,
{
    let SseLine::Data(payload) = line else {
        return Ok(false);
    };
    match provider.interpret(&payload) {
        Some(Frame::Token(text)) => {
            *tokens += 1;
            sink.on_token(&text);
            Ok(false)
        }
        Some(Frame::Done) => Ok(true),
        Some(Frame::Error(message)) => Err(StreamError::provider(200, message)),
        Some(Frame::Skip) => Ok(false),
        None => {
            tracing::debug!(len = payload.len(), "skipping unparseable line");
            Ok(false)
        }
    }
}
