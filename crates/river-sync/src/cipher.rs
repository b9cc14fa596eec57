//! Credential encryption seam
//!
//! API keys are stored remotely only in encrypted form, bound to the
//! identity. The actual cipher is supplied by the embedding application.

use crate::error::SyncError;
use river_tree::ApiKeys;
use serde::{Deserialize, Serialize};

/// Encrypt/decrypt capability for stored credentials
pub trait KeyCipher: Send + Sync {
    fn encrypt(&self, plain: &str, uid: &str) -> String;

    /// # Errors
    /// `Cipher` if the text was not produced for this identity
    fn decrypt(&self, cipher: &str, uid: &str) -> Result<String, SyncError>;
}

/// Identity transform; for local development and tests
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCipher;

impl KeyCipher for PassthroughCipher {
    fn encrypt(&self, plain: &str, _uid: &str) -> String {
        plain.to_string()
    }

    fn decrypt(&self, cipher: &str, _uid: &str) -> Result<String, SyncError> {
        Ok(cipher.to_string())
    }
}

/// API keys as stored remotely, one ciphertext per backend
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptedApiKeys {
    pub openrouter: String,
    pub openai: String,
    pub anthropic: String,
    pub google: String,
}

impl EncryptedApiKeys {
    /// Encrypt every non-empty key
    #[must_use]
    pub fn seal(keys: &ApiKeys, cipher: &dyn KeyCipher, uid: &str) -> Self {
        let seal = |plain: &str| {
            if plain.is_empty() {
                String::new()
            } else {
                cipher.encrypt(plain, uid)
            }
        };
        Self {
            openrouter: seal(&keys.openrouter),
            openai: seal(&keys.openai),
            anthropic: seal(&keys.anthropic),
            google: seal(&keys.google),
        }
    }

    /// Decrypt every key; a key that fails to decrypt is treated as unset
    #[must_use]
    pub fn open(&self, cipher: &dyn KeyCipher, uid: &str) -> ApiKeys {
        let open = |sealed: &str, backend: &str| {
            if sealed.is_empty() {
                return String::new();
            }
            cipher.decrypt(sealed, uid).unwrap_or_else(|err| {
                tracing::warn!(backend, error = %err, "dropping undecryptable key");
                String::new()
            })
        };
        ApiKeys {
            openrouter: open(&self.openrouter, "openrouter"),
            openai: open(&self.openai, "openai"),
            anthropic: open(&self.anthropic, "anthropic"),
            google: open(&self.google, "google"),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.openrouter.is_empty()
            && self.openai.is_empty()
            && self.anthropic.is_empty()
            && self.google.is_empty()
    }
}
