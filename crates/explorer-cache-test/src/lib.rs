//! Helpers for testing the explorer cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Use paused tokio time (`tokio::time::pause`) to control expiry. A [`CountingProducer`]
//!    with a delay will then only settle when the test advances time far enough.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use futures::future::BoxFuture;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `explorer_cache` crate and mutes
///    all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("explorer_cache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A producer that counts how often it was invoked.
///
/// Each invocation yields the number of previous invocations, so the first computation produces
/// `0`, the second `1`, and so on. Cloning shares the counter.
#[derive(Clone, Debug, Default)]
pub struct CountingProducer {
    calls: Arc<AtomicUsize>,
    delay: Duration,
    fail: bool,
}

impl CountingProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every computation take `delay` to settle.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes every computation fail after its delay.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// How often a computation was started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns a producer closure, suitable for `Cache::get_or_compute`.
    ///
    /// The call is only counted once the closure is invoked.
    pub fn producer(&self) -> impl FnOnce() -> BoxFuture<'static, Result<usize>> + Send + use<> {
        let this = self.clone();
        move || -> BoxFuture<'static, Result<usize>> {
            let call = this.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if !this.delay.is_zero() {
                    tokio::time::sleep(this.delay).await;
                }
                if this.fail {
                    anyhow::bail!("computation {call} failed");
                }
                Ok(call)
            })
        }
    }
}

