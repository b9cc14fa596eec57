//! Versioned write queue
//!
//! Coalesces rapid writes per key through a debounce window. Every staged
//! write takes a version from one monotonically increasing counter, and a
//! write is applied only if its version is higher than the last version
//! applied for its key. An immediate write therefore supersedes anything
//! staged before it, including a debounced write whose timer has already
//! fired.
//!
//! Writes for one queue are applied one at a time.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Writer invoked for every applied write
pub type ApplyFn<K, V> = Arc<dyn Fn(K, V) -> BoxFuture<'static, ()> + Send + Sync>;

struct Pending<V> {
    version: u64,
    value: V,
    timer: Option<JoinHandle<()>>,
}

struct Inner<K, V> {
    window: Duration,
    apply: ApplyFn<K, V>,
    next_version: AtomicU64,
    pending: Mutex<HashMap<K, Pending<V>>>,
    applied: tokio::sync::Mutex<HashMap<K, u64>>,
}

/// Debounced, versioned write queue
pub struct WriteQueue<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for WriteQueue<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> WriteQueue<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    #[must_use]
    pub fn new(window: Duration, apply: ApplyFn<K, V>) -> Self {
        Self {
            inner: Arc::new(Inner {
                window,
                apply,
                next_version: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                applied: tokio::sync::Mutex::new(HashMap::new()),
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Stage `value` for `key`, restarting the key's debounce window
    ///
    /// Outside a Tokio runtime no timer is armed; the write waits for
    /// [`WriteQueue::flush`].
    pub fn schedule(&self, key: K, value: V) -> u64 {
        let version = self.inner.next_version();
        let mut pending = self.inner.pending.lock();
        let timer = tokio::runtime::Handle::try_current()
            .ok()
            .map(|handle| handle.spawn(Self::fire(Arc::clone(&self.inner), key.clone(), version)));
        if timer.is_none() {
            tracing::warn!(?key, "no runtime; write held until flush");
        }

        let previous = pending.insert(
            key.clone(),
            Pending {
                version,
                value,
                timer,
            },
        );
        if let Some(timer) = previous.and_then(|p| p.timer) {
            timer.abort();
            tracing::debug!(?key, version, "debounce window restarted");
        }
        version
    }

    /// Apply `value` now, discarding anything staged for `key`
    ///
    /// Returns `false` if a newer write for `key` was applied first.
    pub async fn immediate(&self, key: K, value: V) -> bool {
        let version = self.inner.next_version();
        self.cancel(&key);
        self.inner.commit(key, version, value).await
    }

    /// Drop the staged write for `key`, if any
    pub fn cancel(&self, key: &K) -> bool {
        let removed = self.inner.pending.lock().remove(key);
        match removed {
            Some(pending) => {
                if let Some(timer) = pending.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Apply every staged write now, oldest first
    pub async fn flush(&self) -> usize {
        let mut due: Vec<(K, Pending<V>)> = self.inner.pending.lock().drain().collect();
        due.sort_by_key(|(_, p)| p.version);

        let mut applied = 0;
        for (key, pending) in due {
            if let Some(timer) = pending.timer {
                timer.abort();
            }
            if self.inner.commit(key, pending.version, pending.value).await {
                applied += 1;
            }
        }
        applied
    }

    /// Apply the staged write for `key` now
    ///
    /// Returns `false` if nothing was staged or a newer write won.
    pub async fn flush_key(&self, key: &K) -> bool {
        let due = self.inner.pending.lock().remove(key);
        let Some(pending) = due else {
            return false;
        };
        if let Some(timer) = pending.timer {
            timer.abort();
        }
        self.inner
            .commit(key.clone(), pending.version, pending.value)
            .await
    }

    /// Number of staged writes
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Check if a write is staged for `key`
    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        self.inner.pending.lock().contains_key(key)
    }

    /// Last version applied for `key`
    pub async fn last_applied(&self, key: &K) -> Option<u64> {
        self.inner.applied.lock().await.get(key).copied()
    }

    async fn fire(inner: Arc<Inner<K, V>>, key: K, version: u64) {
        tokio::time::sleep(inner.window).await;
        let due = {
            let mut pending = inner.pending.lock();
            match pending.get(&key) {
                Some(p) if p.version == version => pending.remove(&key),
                _ => None,
            }
        };
        if let Some(p) = due {
            inner.commit(key, p.version, p.value).await;
        }
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    fn next_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn commit(&self, key: K, version: u64, value: V) -> bool {
        let mut applied = self.applied.lock().await;
        if let Some(last) = applied.get(&key).copied() {
            if last >= version {
                tracing::warn!(?key, version, last, "dropping stale write");
                return false;
            }
        }
        (self.apply)(key.clone(), value).await;
        applied.insert(key, version);
        true
    }
}

impl<K, V> Debug for WriteQueue<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteQueue")
            .field("window", &self.inner.window)
            .field("pending", &self.inner.pending.lock().len())
            .finish_non_exhaustive()
    }
}
