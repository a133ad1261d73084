use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::bounded::BoundedStore;
use crate::clock::{Clock, TokioClock};
use crate::config::CacheConfig;
use crate::error::{CacheEntry, CacheError, ConfigError};
use crate::inflight::{ComputationChannel, InflightRegistry};
use crate::key::CacheKey;
use crate::settings::{Backend, CacheLookup, CacheSettings, CacheStatus};
use crate::sweeper::Sweeper;
use crate::timed::TimedStore;

struct CacheInner<V> {
    bounded: Arc<BoundedStore<V>>,
    timed: Arc<TimedStore<V>>,
    bounded_computations: InflightRegistry<V>,
    timed_computations: Arc<InflightRegistry<V>>,
    sweeper: Sweeper<V>,
}

/// An in-memory cache for expensive async computations.
///
/// The cache deduplicates concurrent computations of the same key, and keeps their results in
/// one of two backends, chosen per call through [`CacheSettings`]:
///
/// - [`CacheSettings::Bounded`] keeps values in a fixed-size LRU store.
/// - [`CacheSettings::TimeToLive`] keeps values with an expiry. Stale values are served right
///   away while being refreshed in the background, unless the caller asks for a fresh value.
///
/// Both backends have their own set of in-flight computations, so the same key used with both
/// backends never shares a computation.
///
/// Stale entries of the time-based backend are removed by the [`Sweeper`], which needs to be
/// started explicitly via [`Cache::sweeper`].
///
/// Cloning the cache is cheap and yields a handle to the same underlying storage.
pub struct Cache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("bounded", &self.inner.bounded)
            .field("timed", &self.inner.timed)
            .field("bounded_computations", &self.inner.bounded_computations)
            .field("timed_computations", &self.inner.timed_computations)
            .field("sweeper", &self.inner.sweeper)
            .finish()
    }
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new cache using the tokio clock.
    pub fn new(config: CacheConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    /// Creates a new cache that takes all expiry decisions based on `clock`.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;

        let timed = Arc::new(TimedStore::new(clock));
        let timed_computations = Arc::new(InflightRegistry::new(Backend::TimeToLive));
        let sweeper = Sweeper::new(
            Arc::clone(&timed),
            Arc::clone(&timed_computations),
            config.sweep_interval,
            config.grace_period,
        );

        let inner = CacheInner {
            bounded: Arc::new(BoundedStore::new(config.bounded_capacity)?),
            timed,
            bounded_computations: InflightRegistry::new(Backend::Bounded),
            timed_computations,
            sweeper,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// The background sweeper that evicts expired entries of the time-based backend.
    pub fn sweeper(&self) -> &Sweeper<V> {
        &self.inner.sweeper
    }

    /// Returns the cached value for `key`, stale or not, without computing anything.
    pub fn get(&self, key: &CacheKey, backend: Backend) -> Option<V> {
        self.lookup(key, backend).into_value()
    }

    /// Looks `key` up in the given backend, reporting whether the value is fresh.
    ///
    /// Values of the bounded backend never turn stale.
    pub fn lookup(&self, key: &CacheKey, backend: Backend) -> CacheLookup<V> {
        match backend {
            Backend::Bounded => match self.inner.bounded.get(key) {
                Some(value) => CacheLookup::Hit(value),
                None => CacheLookup::Miss,
            },
            Backend::TimeToLive => match self.inner.timed.get(key) {
                Some((value, true)) => CacheLookup::Hit(value),
                Some((value, false)) => CacheLookup::Expired(value),
                None => CacheLookup::Miss,
            },
        }
    }

    /// Returns the instant at which the time-based entry for `key` turns stale.
    pub fn expires_at(&self, key: &CacheKey) -> Option<Instant> {
        self.inner.timed.expires_at(key)
    }

    /// Writes `value` directly into the backend chosen by `settings`.
    ///
    /// For the time-based backend, the value is fresh for the configured `ttl` from now.
    pub fn insert(&self, key: impl Into<CacheKey>, value: V, settings: &CacheSettings) {
        let key = key.into();
        match *settings {
            CacheSettings::Bounded => {
                self.inner.bounded.insert(key, value);
            }
            CacheSettings::TimeToLive { ttl, .. } => {
                self.inner.timed.insert(key, value, ttl);
            }
        }
    }

    /// Returns the cached value for `key`, computing it with `producer` if needed.
    ///
    /// See [`get_or_compute_with_status`](Self::get_or_compute_with_status) for details.
    pub async fn get_or_compute<P, F>(
        &self,
        key: impl Into<CacheKey>,
        producer: P,
        settings: CacheSettings,
    ) -> CacheEntry<V>
    where
        P: FnOnce() -> F + Send + 'static,
        F: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.get_or_compute_with_status(key, producer, settings)
            .await
            .map(|(value, _status)| value)
    }

    /// Returns the cached value for `key` along with where it came from.
    ///
    /// The `producer` is only invoked if no computation for `key` is already running, otherwise
    /// the caller waits for that computation instead. Its result is written to the backend
    /// before any waiter sees it.
    ///
    /// With [`CacheSettings::TimeToLive`], a stale value is returned immediately with
    /// [`CacheStatus::Expired`] and refreshed in the background, unless `require_fresh` is set.
    /// A failed background refresh is logged and leaves the stale value in place.
    ///
    /// # Errors
    ///
    /// Returns the producer error when the caller had to wait for the computation, either because
    /// there was no value at all or because a fresh one was required.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub async fn get_or_compute_with_status<P, F>(
        &self,
        key: impl Into<CacheKey>,
        producer: P,
        settings: CacheSettings,
    ) -> CacheEntry<(V, CacheStatus)>
    where
        P: FnOnce() -> F + Send + 'static,
        F: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let key = key.into();
        let backend = settings.backend();
        metric!(counter("caches.access") += 1, "backend" => backend.as_ref());

        match settings {
            CacheSettings::Bounded => {
                if let Some(value) = self.inner.bounded.get(&key) {
                    metric!(counter("caches.memory.hit") += 1, "backend" => backend.as_ref());
                    return Ok((value, CacheStatus::Hit));
                }

                let value = self.compute_bounded(key, producer).await?;
                Ok((value, CacheStatus::Miss))
            }
            CacheSettings::TimeToLive { ttl, require_fresh } => {
                match self.inner.timed.get(&key) {
                    Some((value, true)) => {
                        metric!(counter("caches.memory.hit") += 1, "backend" => backend.as_ref());
                        Ok((value, CacheStatus::Hit))
                    }
                    Some((value, false)) if !require_fresh => {
                        metric!(counter("caches.memory.stale") += 1, "backend" => backend.as_ref());
                        // The refresh runs in a deduplicated background task, which we will
                        // not await.
                        let _not_awaiting_future = self.compute_timed(key, producer, ttl, true);
                        Ok((value, CacheStatus::Expired))
                    }
                    _ => {
                        let value = self.compute_timed(key, producer, ttl, false).await?;
                        Ok((value, CacheStatus::Miss))
                    }
                }
            }
        }
    }

    fn compute_bounded<P, F>(&self, key: CacheKey, producer: P) -> ComputationChannel<V>
    where
        P: FnOnce() -> F + Send + 'static,
        F: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let store = Arc::clone(&self.inner.bounded);
        let task_key = key.clone();

        self.inner
            .bounded_computations
            .run_exclusive(key, move || async move {
                metric!(counter("caches.computation") += 1, "backend" => "bounded");
                let value = producer().await.map_err(CacheError::from)?;
                if let Some(evicted) = store.insert(task_key, value.clone()) {
                    tracing::trace!(key = %evicted, "Evicted least recently used cache entry");
                }
                CacheEntry::Ok(value)
            })
    }

    /// Starts or joins the computation of `key` for the time-based backend.
    ///
    /// The `is_refresh` flag marks computations nobody waits for, so their errors get logged.
    fn compute_timed<P, F>(
        &self,
        key: CacheKey,
        producer: P,
        ttl: Duration,
        is_refresh: bool,
    ) -> ComputationChannel<V>
    where
        P: FnOnce() -> F + Send + 'static,
        F: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let store = Arc::clone(&self.inner.timed);
        let task_key = key.clone();

        self.inner
            .timed_computations
            .run_exclusive(key, move || async move {
                metric!(
                    counter("caches.computation") += 1,
                    "backend" => "ttl",
                    "is_refresh" => if is_refresh { "true" } else { "false" },
                );

                let entry: CacheEntry<V> = match producer().await {
                    Ok(value) => {
                        store.insert(task_key, value.clone(), ttl);
                        Ok(value)
                    }
                    Err(err) => {
                        if is_refresh {
                            metric!(counter("caches.refresh.failed") += 1, "backend" => "ttl");
                            let error: &(dyn std::error::Error + 'static) = err.as_ref();
                            tracing::error!(
                                error,
                                key = %task_key,
                                "Failed to refresh stale cache entry"
                            );
                        }
                        Err(CacheError::from(err))
                    }
                };
                entry
            })
    }
}
