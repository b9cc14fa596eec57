//! Identity gate
//!
//! Persistence routes on "who is signed in". The answer may not be known
//! yet at startup, so readers wait on a readiness signal instead of
//! guessing. A resolved `None` means anonymous: everything goes local.

use std::fmt;
use tokio::sync::watch;

/// Signed-in identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub uid: String,
}

impl Identity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uid)
    }
}

/// Source of the current identity
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current identity, waiting until it is known
    async fn current(&self) -> Option<Identity>;
}

/// `watch`-backed identity provider
///
/// Starts unresolved; [`IdentityGate::resolve`] releases every waiter.
#[derive(Debug)]
pub struct IdentityGate {
    state: watch::Sender<Option<Option<Identity>>>,
}

impl IdentityGate {
    /// Unresolved gate
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    /// Gate that is already resolved
    #[must_use]
    pub fn resolved(identity: Option<Identity>) -> Self {
        let (state, _) = watch::channel(Some(identity));
        Self { state }
    }

    /// Publish the identity (sign in, sign out, or first resolution)
    pub fn resolve(&self, identity: Option<Identity>) {
        tracing::info!(
            signed_in = identity.is_some(),
            "identity resolved"
        );
        self.state.send_replace(Some(identity));
    }

    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state.borrow().is_some()
    }
}

impl Default for IdentityGate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl IdentityProvider for IdentityGate {
    async fn current(&self) -> Option<Identity> {
        let mut rx = self.state.subscribe();
        let current = match rx.wait_for(Option::is_some).await {
            Ok(state) => state.clone().flatten(),
            Err(_) => None,
        };
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn resolved_gate_answers_immediately() {
        let gate = IdentityGate::resolved(Some(Identity::new("u1")));
        assert_eq!(gate.current().await, Some(Identity::new("u1")));

        let anonymous = IdentityGate::resolved(None);
        assert_eq!(anonymous.current().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn readers_wait_for_resolution() {
        let gate = Arc::new(IdentityGate::new());
        assert!(!gate.is_resolved());

        let reader = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.current().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reader.is_finished());

        gate.resolve(Some(Identity::new("late")));
        assert_eq!(reader.await.unwrap(), Some(Identity::new("late")));
    }
}
