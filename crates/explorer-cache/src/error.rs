use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// An error that happens while computing a cached value.
///
/// This error is shared between every caller that joined the same computation, which is why
/// the underlying producer error sits behind an [`Arc`].
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The producer supplied by the caller failed.
    ///
    /// The attached error is exactly what the producer returned.
    #[error("computation failed: {0:#}")]
    Computation(Arc<anyhow::Error>),
    /// The computation task went away without producing a result.
    ///
    /// This happens when the producer panics, or when the runtime shuts down while the
    /// computation is still running.
    #[error("computation was cancelled")]
    Cancelled,
}

impl CacheError {
    /// Returns the producer error, if this is a [`Computation`](Self::Computation) failure.
    pub fn computation_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Computation(err) => Some(err),
            Self::Cancelled => None,
        }
    }
}

impl From<anyhow::Error> for CacheError {
    fn from(err: anyhow::Error) -> Self {
        Self::Computation(Arc::new(err))
    }
}

/// The result of a cache computation, either `Ok(T)` or the reason why no value is available.
pub type CacheEntry<T> = Result<T, CacheError>;

/// Invalid cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The bounded backend needs room for at least one item.
    #[error("bounded cache capacity must be greater than zero")]
    ZeroCapacity,
    /// The sweeper would spin without any pause between passes.
    #[error("sweep interval must be greater than zero, got {0:?}")]
    ZeroSweepInterval(Duration),
}
