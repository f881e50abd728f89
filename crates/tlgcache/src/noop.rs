//! Cache that never remembers anything

use std::marker::PhantomData;

use crate::cache::Cache;
use crate::error::CacheError;
use crate::stats::{Stats, StatsSnapshot};

/// Drop-in stand-in for tests and for running without caching.
///
/// `get` is always a miss, `put` is accepted and discarded.
pub struct NoopCache<K, V> {
    stats: Stats,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V> NoopCache<K, V> {
    /// Create a no-op cache
    pub fn new() -> Self {
        Self {
            stats: Stats::new(),
            _marker: PhantomData,
        }
    }
}

impl<K, V> Default for NoopCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Cache<K, V> for NoopCache<K, V> {
    fn get(&self, _key: &K) -> Option<V> {
        self.stats.record_miss();
        None
    }

    fn put(&self, _key: K, _value: V) -> Result<(), CacheError> {
        self.stats.record_store();
        Ok(())
    }

    fn invalidate(&self, _key: &K) -> Result<(), CacheError> {
        Ok(())
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn clear(&self) {
        self.stats.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_never_returns_values() {
        let cache: NoopCache<u64, String> = NoopCache::new();

        cache.put(1, "ignored".to_string()).unwrap();
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&1), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.stores, 1);
    }
}
