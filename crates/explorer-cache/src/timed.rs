use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::key::CacheKey;

/// An item saved in the [`TimedStore`].
#[derive(Clone, Debug)]
struct TimedEntry<V> {
    /// The actual data.
    value: V,
    /// When this item turns stale.
    expires_at: Instant,
}

/// A map from [`CacheKey`] to values with an absolute expiry.
///
/// Expired values are kept around and still handed out, tagged as stale. Removing them is the
/// job of the [`Sweeper`](crate::Sweeper).
pub struct TimedStore<V> {
    entries: RwLock<HashMap<CacheKey, TimedEntry<V>>>,
    clock: Arc<dyn Clock>,
}

impl<V> std::fmt::Debug for TimedStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimedStore")
            .field("entries", &self.len())
            .field("clock", &self.clock)
            .finish()
    }
}

impl<V: Clone> TimedStore<V> {
    /// Inserts `value`, fresh for `ttl` from now.
    ///
    /// Overwrites any previous value and expiry for the same key.
    pub fn insert(&self, key: CacheKey, value: V, ttl: Duration) {
        let expires_at = self.clock.now() + ttl;
        self.entries
            .write()
            .insert(key, TimedEntry { value, expires_at });
    }

    /// Returns the value for `key` along with whether it is still fresh.
    pub fn get(&self, key: &CacheKey) -> Option<(V, bool)> {
        let now = self.clock.now();
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        Some((entry.value.clone(), entry.expires_at > now))
    }

    /// Returns the instant at which the entry for `key` turns stale.
    pub fn expires_at(&self, key: &CacheKey) -> Option<Instant> {
        self.entries.read().get(key).map(|entry| entry.expires_at)
    }

    pub fn remove(&self, key: &CacheKey) -> Option<V> {
        self.entries.write().remove(key).map(|entry| entry.value)
    }

    /// Removes the entry for `key` if `predicate` holds for its expiry.
    ///
    /// The check and the removal happen under the same lock, so a concurrent write that
    /// refreshed the entry in between is never lost.
    pub(crate) fn remove_if(
        &self,
        key: &CacheKey,
        predicate: impl FnOnce(Instant) -> bool,
    ) -> bool {
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(entry) if predicate(entry.expires_at) => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// A snapshot of all keys currently in the store.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.read().keys().cloned().collect()
    }
}

impl<V> TimedStore<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Default::default(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }
}
