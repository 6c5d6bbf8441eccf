//! Bounded async loading cache with single-flight semantics.
//!
//! Shared by the process-wide metadata and array caches and by each buffer's
//! tile cache: concurrent misses on one key coalesce into a single load whose
//! result every waiter receives.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::{Mutex, Notify, RwLock};

/// State of an in-flight load, shared between the leader and its waiters.
struct InFlight<V, E> {
    notify: Notify,
    result: Mutex<Option<Result<V, E>>>,
}

/// A bounded LRU cache whose entries are produced by async loaders.
///
/// `get_with` either returns a cached value, waits on a load already in
/// flight for the key, or runs the supplied loader as the leader. Values and
/// errors must be cheap to clone (`Arc`, `Bytes`, string-backed errors): both
/// are fanned out to every waiter.
pub struct AsyncLruCache<K, V, E> {
    entries: RwLock<LruCache<K, V>>,
    in_flight: Mutex<HashMap<K, Arc<InFlight<V, E>>>>,
}

impl<K, V, E> AsyncLruCache<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    /// Create a cache bounded to `capacity` entries.
    ///
    /// A zero capacity is clamped to one entry.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Get the value for `key`, loading it with `load` on a miss.
    ///
    /// Exactly one loader runs per key at a time; concurrent callers wait for
    /// it and share its result. Failed loads are not cached.
    pub async fn get_with<F, Fut>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        // Fast path: cached.
        {
            let mut entries = self.entries.write().await;
            if let Some(value) = entries.get(&key) {
                return Ok(value.clone());
            }
        }

        let state = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(state) = in_flight.get(&key) {
                state.clone()
            } else {
                // We are the leader for this key.
                let state = Arc::new(InFlight {
                    notify: Notify::new(),
                    result: Mutex::new(None),
                });
                in_flight.insert(key.clone(), state.clone());
                drop(in_flight);

                let result = load().await;

                {
                    let mut slot = state.result.lock().await;
                    *slot = Some(result.clone());
                }
                if let Ok(ref value) = result {
                    let mut entries = self.entries.write().await;
                    entries.put(key.clone(), value.clone());
                }
                {
                    let mut in_flight = self.in_flight.lock().await;
                    in_flight.remove(&key);
                }
                state.notify.notify_waiters();

                return result;
            }
        };

        // Wait for the leader to finish and share its result. Registering
        // interest before checking the slot closes the window where the
        // leader notifies between the check and the await.
        loop {
            let notified = state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let slot = state.result.lock().await;
                if let Some(ref result) = *slot {
                    return result.clone();
                }
            }
            notified.await;
        }
    }

    /// Peek at a cached value without loading or touching LRU order.
    pub async fn get_if_present(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries.peek(key).cloned()
    }

    /// Drop every cached entry. In-flight loads are unaffected.
    pub async fn invalidate_all(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
