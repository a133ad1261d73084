use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// The key under which a value is cached.
///
/// Keys are opaque to the cache. Callers are responsible for making sure that equal keys refer
/// to equivalent computations, for example by encoding the shard and the query parameters:
/// `"latest_blocks/shard:1/limit:50"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.into())
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key.into())
    }
}

impl From<&String> for CacheKey {
    fn from(key: &String) -> Self {
        Self(key.as_str().into())
    }
}
