//! Background removal of expired entries from the [`TimedStore`].
//!
//! Stale entries are still served by the cache, so nothing removes them on read. The
//! [`Sweeper`] periodically walks a snapshot of the store and deletes entries that expired more
//! than a grace period ago, skipping every key that currently has a computation in flight.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::inflight::InflightRegistry;
use crate::timed::TimedStore;

struct SweeperTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodically evicts long expired entries from the time-based store.
pub struct Sweeper<V> {
    store: Arc<TimedStore<V>>,
    inflight: Arc<InflightRegistry<V>>,
    interval: Duration,
    grace_period: Duration,
    task: Mutex<Option<SweeperTask>>,
}

impl<V> std::fmt::Debug for Sweeper<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("interval", &self.interval)
            .field("grace_period", &self.grace_period)
            .field("running", &self.task.lock().is_some())
            .finish()
    }
}

impl<V> Sweeper<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        store: Arc<TimedStore<V>>,
        inflight: Arc<InflightRegistry<V>>,
        interval: Duration,
        grace_period: Duration,
    ) -> Self {
        Self {
            store,
            inflight,
            interval,
            grace_period,
            task: Mutex::new(None),
        }
    }

    /// Starts the background sweep loop.
    ///
    /// Calling this while the loop is already running does nothing.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_sweeper(
            Arc::clone(&self.store),
            Arc::clone(&self.inflight),
            self.interval,
            self.grace_period,
            cancel.clone(),
        ));

        tracing::info!(
            interval = ?self.interval,
            grace_period = ?self.grace_period,
            "Started cache sweeper"
        );
        *task = Some(SweeperTask { cancel, handle });
    }

    /// Stops the background sweep loop.
    ///
    /// A pass that is already running finishes, but no further pass is started. Does nothing if
    /// the loop is not running.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.cancel.cancel();
            tracing::info!("Stopped cache sweeper");
        }
    }

    /// Whether the background sweep loop is running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished() && !t.cancel.is_cancelled())
    }

    /// Runs a single sweep pass right away, returning the number of evicted entries.
    pub fn sweep_now(&self) -> usize {
        sweep(&self.store, &self.inflight, self.grace_period)
    }
}

impl<V> Drop for Sweeper<V> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

async fn run_sweeper<V>(
    store: Arc<TimedStore<V>>,
    inflight: Arc<InflightRegistry<V>>,
    interval: Duration,
    grace_period: Duration,
    cancel: CancellationToken,
) where
    V: Clone + Send + Sync + 'static,
{
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                sweep(&store, &inflight, grace_period);
            }
        }
    }

    tracing::debug!("Cache sweeper loop exited");
}

/// Removes every entry that expired more than `grace_period` ago and has no computation in flight.
fn sweep<V>(store: &TimedStore<V>, inflight: &InflightRegistry<V>, grace_period: Duration) -> usize
where
    V: Clone + Send + Sync + 'static,
{
    let now = store.now();
    let keys = store.keys();
    let scanned = keys.len();

    let mut evicted = 0;
    for key in keys {
        // The pending check runs under the store lock, so a refresh that is being written right
        // now either finished (and the entry is fresh again) or still holds its registry slot.
        let removed = store.remove_if(&key, |expires_at| {
            expires_at + grace_period < now && !inflight.contains(&key)
        });
        if removed {
            tracing::trace!(%key, "Evicted expired cache entry");
            evicted += 1;
        }
    }

    metric!(counter("caches.sweeper.evicted") += evicted as i64, "backend" => "ttl");
    metric!(gauge("caches.ttl.entries") = store.len() as u64);
    tracing::debug!(scanned, evicted, "Swept expired cache entries");

    evicted
}
