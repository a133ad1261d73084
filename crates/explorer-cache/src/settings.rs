use std::fmt;
use std::time::Duration;

/// The storage backend a cached value lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// The size-bounded LRU store.
    Bounded,
    /// The time-based store, where values expire after a per-write TTL.
    TimeToLive,
}

impl AsRef<str> for Backend {
    fn as_ref(&self) -> &str {
        match self {
            Self::Bounded => "bounded",
            Self::TimeToLive => "ttl",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// How [`Cache::get_or_compute`](crate::Cache::get_or_compute) stores and refreshes a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSettings {
    /// Keep the value in the bounded store until it is pushed out by newer items.
    Bounded,
    /// Keep the value in the time-based store.
    TimeToLive {
        /// How long a freshly computed value is considered fresh.
        ttl: Duration,
        /// Whether a stale value is good enough.
        ///
        /// When `false`, a stale value is returned immediately while it is being refreshed in the
        /// background. When `true`, the caller waits for the refreshed value.
        require_fresh: bool,
    },
}

impl CacheSettings {
    /// Time-based caching that serves stale values while refreshing them.
    pub fn ttl(ttl: Duration) -> Self {
        Self::TimeToLive {
            ttl,
            require_fresh: false,
        }
    }

    /// Time-based caching that always waits for a fresh value.
    pub fn fresh_ttl(ttl: Duration) -> Self {
        Self::TimeToLive {
            ttl,
            require_fresh: true,
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            Self::Bounded => Backend::Bounded,
            Self::TimeToLive { .. } => Backend::TimeToLive,
        }
    }
}

/// Where a value returned from the cache came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the cache while fresh.
    Hit,
    /// Computed, or joined an in-flight computation.
    ///
    /// This covers both backends, including a time-based lookup that found no value at all.
    /// A value that had to be waited for is never reported as [`Hit`](Self::Hit) or
    /// [`Expired`](Self::Expired).
    Miss,
    /// A stale value, served while a refresh runs in the background.
    Expired,
}

impl AsRef<str> for CacheStatus {
    fn as_ref(&self) -> &str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// The result of a plain cache read that never computes anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup<V> {
    Hit(V),
    /// The time-based store has a value, but it is stale.
    Expired(V),
    Miss,
}

impl<V> CacheLookup<V> {
    pub fn status(&self) -> CacheStatus {
        match self {
            Self::Hit(_) => CacheStatus::Hit,
            Self::Expired(_) => CacheStatus::Expired,
            Self::Miss => CacheStatus::Miss,
        }
    }

    /// Returns the value regardless of its freshness.
    pub fn into_value(self) -> Option<V> {
        match self {
            Self::Hit(value) | Self::Expired(value) => Some(value),
            Self::Miss => None,
        }
    }
}
