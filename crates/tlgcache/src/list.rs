//! Multi-value cache: one key maps to an ordered history of entries

use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::Cache;
use crate::error::CacheError;
use crate::stats::StatsSnapshot;

/// Default number of entries kept per key
pub const DEFAULT_HISTORY_LEN: usize = 16;

/// Ordered, bounded list of values per key over any single-value cache.
///
/// The topology of the wrapped cache (disk, memory, no-op) carries over.
pub struct ListCache<K, V> {
    inner: Arc<dyn Cache<K, Vec<V>>>,
    max_len: usize,
    /// Serializes read-modify-write appends
    append_lock: Mutex<()>,
}

impl<K, V> ListCache<K, V>
where
    K: Clone,
    V: Clone,
{
    /// Wrap a cache of vectors
    pub fn new(inner: Arc<dyn Cache<K, Vec<V>>>, max_len: usize) -> Self {
        Self {
            inner,
            max_len: max_len.max(1),
            append_lock: Mutex::new(()),
        }
    }

    /// Entries recorded for a key, oldest first
    pub fn entries(&self, key: &K) -> Vec<V> {
        self.inner.get(key).unwrap_or_default()
    }

    /// Most recent entry for a key
    pub fn latest(&self, key: &K) -> Option<V> {
        self.inner.get(key).and_then(|mut list| list.pop())
    }

    /// Append an entry, dropping the oldest beyond the history bound
    pub fn append(&self, key: K, value: V) -> Result<(), CacheError> {
        let _guard = self.append_lock.lock();
        let mut list = self.inner.get(&key).unwrap_or_default();
        list.push(value);
        if list.len() > self.max_len {
            let excess = list.len() - self.max_len;
            list.drain(..excess);
        }
        self.inner.put(key, list)
    }

    /// History bound per key
    pub fn max_len(&self) -> usize {
        self.max_len
    }
}

impl<K, V> Cache<K, Vec<V>> for ListCache<K, V>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<Vec<V>> {
        self.inner.get(key)
    }

    fn put(&self, key: K, value: Vec<V>) -> Result<(), CacheError> {
        let _guard = self.append_lock.lock();
        self.inner.put(key, value)
    }

    fn invalidate(&self, key: &K) -> Result<(), CacheError> {
        self.inner.invalidate(key)
    }

    fn stats(&self) -> StatsSnapshot {
        self.inner.stats()
    }

    fn clear(&self) {
        self.inner.clear()
    }
}
