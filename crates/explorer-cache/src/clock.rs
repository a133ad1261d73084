use std::fmt;

use tokio::time::Instant;

/// Source of the current time for expiry decisions.
///
/// Every expiry in the cache is an absolute [`Instant`] obtained from this clock, so swapping the
/// clock changes both when entries are written and when they turn stale.
pub trait Clock: fmt::Debug + Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// The default clock, reading [`tokio::time::Instant::now`].
///
/// Under `tokio::time::pause` this clock only moves when the test advances it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}
