//! # Explorer caching infrastructure
//!
//! Every expensive read path of the explorer (latest blocks, shard stats, transaction-rate
//! series) goes through the in-memory [`Cache`] in this crate. It guarantees that:
//!
//! - Concurrent requests for the same key are coalesced into a single upstream computation.
//! - Values either live in a size-bounded LRU store, or in a time-based store where they expire.
//! - Expired values are served immediately while being refreshed in the background, unless the
//!   caller asks for a fresh value.
//! - Expired values are eventually reclaimed by a background [`Sweeper`].
//!
//! ## Using the Cache
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use explorer_cache::{Cache, CacheSettings, config::CacheConfig};
//!
//! # async fn query_latest_blocks(shard: u32) -> anyhow::Result<Vec<u64>> { Ok(vec![]) }
//! # async fn example() -> anyhow::Result<()> {
//! let cache = Cache::new(CacheConfig::default())?;
//! cache.sweeper().start();
//!
//! let blocks = cache
//!     .get_or_compute(
//!         "latest_blocks/shard:1",
//!         || query_latest_blocks(1),
//!         CacheSettings::ttl(Duration::from_secs(5)),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Request coalescing
//!
//! Each backend has an [`InflightRegistry`] that tracks running computations by [`CacheKey`].
//! A computation is spawned as its own task, and every caller, including the one that started
//! it, only awaits a shared handle to its result. That way, a caller going away never cancels
//! the computation for everybody else. The computed value is written to its store *before* the
//! computation is removed from the registry, so the next caller either joins the computation or
//! finds the value in the store.
//!
//! Failures are shared with everyone that joined, but never stored: the next call for the same
//! key starts a fresh computation.
//!
//! ## Expiration
//!
//! Entries of the time-based store turn stale once their `ttl` has passed. The [`Sweeper`]
//! deletes them only after an additional grace period, and never while a computation for their
//! key is running.
//!
//! ### Metrics
//!
//! All metrics are tagged with the `backend` they refer to:
//!
//! - `caches.access`: All accesses through `get_or_compute`.
//! - `caches.memory.hit`: Accesses served with a fresh value.
//! - `caches.memory.stale`: Accesses served with a stale value, triggering a refresh.
//! - `caches.computation`: Computations actually being run.
//! - `caches.channel.hit` / `caches.channel.miss`: Joined and newly started computations.
//! - `caches.refresh.failed`: Background refreshes that failed.
//! - `caches.sweeper.evicted`: Entries removed by the sweeper.

#[macro_use]
pub mod metrics;

pub mod bounded;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod inflight;
pub mod key;
pub mod logging;
pub mod settings;
pub mod sweeper;
pub mod timed;

#[cfg(test)]
mod tests;

pub use bounded::BoundedStore;
pub use cache::Cache;
pub use clock::{Clock, TokioClock};
pub use error::{CacheEntry, CacheError, ConfigError};
pub use inflight::{ComputationChannel, InflightRegistry};
pub use key::CacheKey;
pub use settings::{Backend, CacheLookup, CacheSettings, CacheStatus};
pub use sweeper::Sweeper;
pub use timed::TimedStore;
