use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::ConfigError;
use crate::key::CacheKey;

/// A fixed-capacity map from [`CacheKey`] to values, evicting the least recently used item.
///
/// Both [`get`](Self::get) and [`insert`](Self::insert) count as a use. Items never expire.
pub struct BoundedStore<V> {
    // `LruCache::get` reorders the recency list, so even reads need exclusive access.
    slots: Mutex<LruCache<CacheKey, V>>,
}

impl<V> std::fmt::Debug for BoundedStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.lock();
        f.debug_struct("BoundedStore")
            .field("len", &slots.len())
            .field("capacity", &slots.cap())
            .finish()
    }
}

impl<V: Clone> BoundedStore<V> {
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(ConfigError::ZeroCapacity)?;
        Ok(Self {
            slots: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Inserts `value`, evicting the least recently used item if the store is full.
    ///
    /// Returns the evicted key, if any. Overwriting an existing key never evicts.
    pub fn insert(&self, key: CacheKey, value: V) -> Option<CacheKey> {
        let mut slots = self.slots.lock();
        match slots.push(key.clone(), value) {
            Some((evicted, _)) if evicted != key => Some(evicted),
            _ => None,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        self.slots.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.slots.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().cap().get()
    }
}
