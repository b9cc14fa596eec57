//! Streaming chat providers
//!
//! One [`Provider`] variant per upstream API, chosen from the model's
//! [`Backend`]. Each variant knows how to:
//! - build the outgoing request (URL, headers, JSON body)
//! - pull the text delta out of one `data:` payload
//! - recognize its end-of-stream and in-stream error frames

use crate::context::{ChatMessage, Role};
use crate::error::StreamError;
use river_tree::{ApiKeys, Backend, ModelRef};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// OpenAI-compatible end-of-stream sentinel
pub const DONE_SENTINEL: &str = "[DONE]";

/// Upstream endpoints and request limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub openrouter_base: String,
    pub openai_base: String,
    pub anthropic_base: String,
    pub google_base: String,
    pub anthropic_version: String,
    pub max_tokens: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            openrouter_base: "https://openrouter.ai/api/v1".into(),
            openai_base: "https://api.openai.com/v1".into(),
            anthropic_base: "https://api.anthropic.com/v1".into(),
            google_base: "https://generativelanguage.googleapis.com/v1beta".into(),
            anthropic_version: "2023-06-01".into(),
            max_tokens: 4096,
        }
    }
}

/// Fully built HTTP request, ready for a transport
#[derive(Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl HttpRequest {
    /// Header value by case-insensitive name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("HttpRequest")
            .field("url", &self.url)
            .field("headers", &names)
            .finish_non_exhaustive()
    }
}

/// Meaning of one `data:` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Non-empty text delta
    Token(String),
    /// End of stream
    Done,
    /// Vendor reported a failure mid-stream
    Error(String),
    /// Valid JSON carrying nothing for us (role chunks, pings, usage)
    Skip,
}

/// Per-vendor streaming contract
#[derive(Debug, Clone)]
pub enum Provider {
    OpenRouter { base: String, key: String },
    OpenAi { base: String, key: String },
    Anthropic {
        base: String,
        key: String,
        version: String,
        max_tokens: u32,
    },
    Google { base: String, key: String },
}

impl Provider {
    /// Pick the provider for `model` and bind its credential
    ///
    /// # Errors
    /// `MissingCredentials` if no key is configured for the backend
    pub fn resolve(
        model: &ModelRef,
        keys: &ApiKeys,
        endpoints: &EndpointConfig,
    ) -> Result<Self, StreamError> {
        let backend = model.backend;
        let key = keys
            .key_for(backend)
            .ok_or(StreamError::MissingCredentials(backend))?
            .to_string();
        let provider = match backend {
            Backend::OpenRouter => Provider::OpenRouter {
                base: endpoints.openrouter_base.clone(),
                key,
            },
            Backend::OpenAi => Provider::OpenAi {
                base: endpoints.openai_base.clone(),
                key,
            },
            Backend::Anthropic => Provider::Anthropic {
                base: endpoints.anthropic_base.clone(),
                key,
                version: endpoints.anthropic_version.clone(),
                max_tokens: endpoints.max_tokens,
            },
            Backend::Google => Provider::Google {
                base: endpoints.google_base.clone(),
                key,
            },
        };
        Ok(provider)
    }

    #[inline]
    #[must_use]
    pub fn backend(&self) -> Backend {
        match self {
            Provider::OpenRouter { .. } => Backend::OpenRouter,
            Provider::OpenAi { .. } => Backend::OpenAi,
            Provider::Anthropic { .. } => Backend::Anthropic,
            Provider::Google { .. } => Backend::Google,
        }
    }

    /// Build the streaming request
    ///
    /// `plugins` is forwarded only to OpenRouter.
    #[must_use]
    pub fn build_request(
        &self,
        model: &ModelRef,
        messages: &[ChatMessage],
        plugins: &[Value],
    ) -> HttpRequest {
        let content_type = ("Content-Type".to_string(), "application/json".to_string());
        match self {
            Provider::OpenRouter { base, key } => {
                let mut body = json!({
                    "model": model.id,
                    "messages": messages,
                    "stream": true,
                });
                if !plugins.is_empty() {
                    body["plugins"] = Value::Array(plugins.to_vec());
                }
                HttpRequest {
                    url: format!("{base}/chat/completions"),
                    headers: vec![content_type, bearer(key)],
                    body,
                }
            }
            Provider::OpenAi { base, key } => HttpRequest {
                url: format!("{base}/chat/completions"),
                headers: vec![content_type, bearer(key)],
                body: json!({
                    "model": vendor_model_name(model),
                    "messages": messages,
                    "stream": true,
                }),
            },
            Provider::Anthropic {
                base,
                key,
                version,
                max_tokens,
            } => HttpRequest {
                url: format!("{base}/messages"),
                headers: vec![
                    content_type,
                    ("x-api-key".into(), key.clone()),
                    ("anthropic-version".into(), version.clone()),
                ],
                body: json!({
                    "model": vendor_model_name(model),
                    "messages": messages,
                    "max_tokens": max_tokens,
                    "stream": true,
                }),
            },
            Provider::Google { base, key } => {
                let contents: Vec<Value> = messages
                    .iter()
                    .map(|m| {
                        let role = match m.role {
                            Role::User => "user",
                            Role::Assistant => "model",
                        };
                        json!({ "role": role, "parts": [{ "text": m.content }] })
                    })
                    .collect();
                HttpRequest {
                    url: format!(
                        "{base}/models/{}:streamGenerateContent?alt=sse",
                        vendor_model_name(model)
                    ),
                    headers: vec![content_type, ("x-goog-api-key".into(), key.clone())],
                    body: json!({ "contents": contents }),
                }
            }
        }
    }

    /// Interpret one `data:` payload
    ///
    /// Returns `None` for payloads that are not JSON; those are partial or
    /// non-data frames and are dropped by the caller.
    #[must_use]
    pub fn interpret(&self, payload: &str) -> Option<Frame> {
        let payload = payload.trim();
        if payload == DONE_SENTINEL {
            return match self {
                Provider::OpenRouter { .. } | Provider::OpenAi { .. } => Some(Frame::Done),
                _ => None,
            };
        }
        let value: Value = serde_json::from_str(payload).ok()?;

        let frame = match self {
            Provider::OpenRouter { .. } | Provider::OpenAi { .. } => {
                if let Some(message) = error_message(&value) {
                    Frame::Error(message)
                } else {
                    token(value.pointer("/choices/0/delta/content"))
                }
            }
            Provider::Anthropic { .. } => match value.get("type").and_then(Value::as_str) {
                Some("content_block_delta") => token(value.pointer("/delta/text")),
                Some("message_stop") => Frame::Done,
                Some("error") => Frame::Error(
                    error_message(&value).unwrap_or_else(|| "Anthropic stream error".into()),
                ),
                _ => Frame::Skip,
            },
            Provider::Google { .. } => {
                if let Some(message) = error_message(&value) {
                    Frame::Error(message)
                } else {
                    token(value.pointer("/candidates/0/content/parts/0/text"))
                }
            }
        };
        Some(frame)
    }

    /// Message for a non-2xx response body
    #[must_use]
    pub fn describe_failure(&self, status: u16, body: &[u8]) -> String {
        serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| error_message(&v))
            .unwrap_or_else(|| format!("{} API error (HTTP {status})", self.backend()))
    }
}

fn bearer(key: &str) -> (String, String) {
    ("Authorization".into(), format!("Bearer {key}"))
}

/// Direct vendor APIs take the bare model name, not the catalog path
fn vendor_model_name(model: &ModelRef) -> &str {
    model.id.rsplit('/').next().unwrap_or(&model.id)
}

fn token(value: Option<&Value>) -> Frame {
    match value.and_then(Value::as_str) {
        Some(text) if !text.is_empty() => Frame::Token(text.to_string()),
        _ => Frame::Skip,
    }
}

/// `{ "error": { "message": .. } }` or `{ "error": ".." }`
fn error_message(value: &Value) -> Option<String> {
    let error = value.get("error")?;
    error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .map(str::to_string)
}
