//! Error types for streaming
//!
//! Every variant ends up as the `error` message of the node being streamed;
//! none of them propagate past the session.

use river_tree::Backend;

/// Streaming failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Vendor rejected the request or reported an error in-stream
    #[error("{message}")]
    Provider { status: u16, message: String },

    /// Network or decode failure
    #[error("{0}")]
    Transport(String),

    /// No credential configured for the model's backend
    #[error("no API key configured for {0}")]
    MissingCredentials(Backend),
}

impl StreamError {
    /// Create provider error
    pub fn provider(status: u16, message: impl Into<String>) -> Self {
        Self::Provider {
            status,
            message: message.into(),
        }
    }

    /// Create transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// HTTP status when the vendor answered
    #[inline]
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Provider { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if repeating the request might succeed
    ///
    /// Advisory only; nothing in this crate retries.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { status, .. } => *status == 429 || *status >= 500,
            Self::Transport(_) => true,
            Self::MissingCredentials(_) => false,
        }
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
