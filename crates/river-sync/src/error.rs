//! Error types for persistence

/// Persistence failures
///
/// `Remote` is recovered by falling back to the local store; callers of the
/// coordinator only see it from migration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Remote store unreachable or rejected the operation
    #[error("remote store error: {0}")]
    Remote(String),

    /// Local store I/O or encoding failure
    #[error("local store error: {0}")]
    Local(String),

    /// Operation requires a signed-in identity
    #[error("no signed-in identity")]
    NoIdentity,

    /// Stored key material could not be decrypted
    #[error("key decryption failed: {0}")]
    Cipher(String),
}

impl SyncError {
    /// Create remote error
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }

    /// Check if the local fallback applies
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Local(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Local(err.to_string())
    }
}

/// Result type for persistence operations
pub type SyncResult<T> = Result<T, SyncError>;
