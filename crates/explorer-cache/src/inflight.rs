use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use sentry::{Hub, SentryFutureExt};

use crate::error::{CacheEntry, CacheError};
use crate::key::CacheKey;
use crate::settings::Backend;

/// A computation that any number of callers can await.
pub type ComputationChannel<V> = Shared<BoxFuture<'static, CacheEntry<V>>>;
type ComputationMap<V> = Arc<Mutex<HashMap<CacheKey, ComputationChannel<V>>>>;

/// Deduplicates concurrent computations by [`CacheKey`].
///
/// Every computation is spawned as its own task, and callers only ever hold a shared receiver
/// for its result. Dropping any receiver, including the one of the caller that started the
/// computation, does not cancel it.
pub struct InflightRegistry<V> {
    backend: Backend,
    computations: ComputationMap<V>,
}

impl<V> std::fmt::Debug for InflightRegistry<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let running = self
            .computations
            .try_lock()
            .map(|c| c.len())
            .unwrap_or_default();
        f.debug_struct("InflightRegistry")
            .field("backend", &self.backend)
            .field("running computations", &running)
            .finish()
    }
}

/// Removes a computation from the registry when dropped.
///
/// Living inside the spawned task means the entry goes away whether the computation finishes,
/// panics, or is torn down with the runtime.
struct RemoveOnDrop<V> {
    key: Option<CacheKey>,
    computations: ComputationMap<V>,
}

impl<V> Drop for RemoveOnDrop<V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.computations.lock().remove(&key);
        }
    }
}

impl<V> InflightRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            computations: Default::default(),
        }
    }

    /// Runs the computation created by `make_computation` unless one is already running for `key`.
    ///
    /// If a computation for `key` is in flight, its shared result is returned and
    /// `make_computation` is never called. Otherwise `make_computation` is called on a freshly
    /// spawned task and its result is shared with every caller that joins before it settles.
    ///
    /// NOTE: This function itself is *not* `async`, because it should eagerly spawn the computation
    /// on an executor, even if you don’t explicitly `await` its results.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn run_exclusive<M, F>(&self, key: CacheKey, make_computation: M) -> ComputationChannel<V>
    where
        M: FnOnce() -> F + Send + 'static,
        F: Future<Output = CacheEntry<V>> + Send + 'static,
    {
        let backend = self.backend.as_ref();
        let mut computations = self.computations.lock();

        if let Some(channel) = computations.get(&key) {
            // A concurrent cache lookup was deduplicated.
            metric!(counter("caches.channel.hit") += 1, "backend" => backend);
            tracing::trace!(%key, backend, "Joining in-flight computation");
            return channel.clone();
        }

        metric!(counter("caches.channel.miss") += 1, "backend" => backend);
        tracing::trace!(%key, backend, "Spawning deduplicated computation");

        let (sender, receiver) = oneshot::channel();
        let remove_token = RemoveOnDrop {
            key: Some(key.clone()),
            computations: Arc::clone(&self.computations),
        };

        let channel = receiver
            .map(|result| result.unwrap_or(Err(CacheError::Cancelled)))
            .boxed()
            .shared();
        let evicted = computations.insert(key, channel.clone());
        debug_assert!(evicted.is_none());

        // Spawning can drop the task right away, outside of a runtime or during shutdown. Its
        // removal token then needs the map lock.
        drop(computations);

        let task = async move {
            let result = make_computation().await;
            // Evict from the map before publishing the result. Callers either get a channel
            // that will receive data, or they start a new computation that sees the stored value.
            drop(remove_token);
            sender.send(result).ok();
        }
        .bind_hub(Hub::new_from_top(Hub::current()));
        tokio::spawn(task);

        channel
    }

    /// Whether a computation for `key` is currently running.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.computations.lock().contains_key(key)
    }

    /// The number of computations currently running.
    pub fn len(&self) -> usize {
        self.computations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.computations.lock().is_empty()
    }
}
