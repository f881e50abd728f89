//! Hybrid cache: LRU memory tier in front of an optional durable tier

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::RandomState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backing::BackingStore;
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::lru::LruCache;
use crate::stats::{Stats, StatsSnapshot};

/// The interface shared by every cache variant.
///
/// Callers never know whether a disk-backed, memory-only or no-op cache
/// sits behind it.
pub trait Cache<K, V>: Send + Sync {
    /// Look a key up, memory tier first, then the durable tier
    fn get(&self, key: &K) -> Option<V>;

    /// Write a value to both tiers.
    ///
    /// A durable-tier failure is returned and nothing is cached.
    fn put(&self, key: K, value: V) -> Result<(), CacheError>;

    /// Drop a key from both tiers
    fn invalidate(&self, key: &K) -> Result<(), CacheError>;

    /// Current counters
    fn stats(&self) -> StatsSnapshot;

    /// Empty the memory tier and reset the counters; the durable tier is kept
    fn clear(&self);
}

/// Tuning for one cache instance
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Prefix separating this cache's keys from others sharing a store
    pub namespace: String,
    /// Memory tier capacity (entries)
    pub capacity: usize,
    /// Entries older than this are treated as absent
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            capacity: 10_000,
            ttl: None,
        }
    }
}

impl CacheConfig {
    /// Config with a namespace and default capacity
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Set the memory tier capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the entry TTL
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }
}

/// A memory-tier entry
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Cached payload
    pub value: V,
    /// When the value was written (carried over from the durable tier)
    pub stored_at: DateTime<Utc>,
    /// Last time a lookup returned this entry
    pub last_access: DateTime<Utc>,
}

#[derive(Serialize)]
struct StoredEntryRef<'a, V> {
    stored_at: DateTime<Utc>,
    value: &'a V,
}

#[derive(Deserialize)]
struct StoredEntry<V> {
    stored_at: DateTime<Utc>,
    value: V,
}

/// Two-tier cache keyed by `K`.
///
/// Lookups consult memory, then the backing store; a backing-store hit is
/// written back to memory only. Writes go to both tiers.
pub struct HybridCache<K, V> {
    memory: Mutex<LruCache<K, CacheEntry<V>>>,
    backing: Option<Arc<dyn BackingStore>>,
    /// Keys whose durable invalidation failed; never read from the backing store
    suppressed: Mutex<HashSet<Vec<u8>, RandomState>>,
    /// Bumped by every put and invalidate while the memory lock is held
    generation: AtomicU64,
    stats: Stats,
    namespace: String,
    ttl: Option<chrono::Duration>,
}

impl<K, V> HybridCache<K, V>
where
    K: CacheKey,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Memory tier over the given durable tier
    pub fn new(backing: Arc<dyn BackingStore>, config: CacheConfig) -> Self {
        Self::build(Some(backing), config)
    }

    /// Memory tier only
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::build(None, config)
    }

    /// Memory tier over an optional durable tier
    pub fn build(backing: Option<Arc<dyn BackingStore>>, config: CacheConfig) -> Self {
        Self {
            memory: Mutex::new(LruCache::new(config.capacity)),
            backing,
            suppressed: Mutex::new(HashSet::default()),
            generation: AtomicU64::new(0),
            stats: Stats::new(),
            namespace: config.namespace,
            ttl: config.ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok()),
        }
    }

    /// Whether a durable tier is attached
    pub fn is_durable(&self) -> bool {
        self.backing.is_some()
    }

    /// Entries currently held in memory
    pub fn memory_len(&self) -> usize {
        self.memory.lock().len()
    }

    fn raw_key(&self, key: &K) -> Vec<u8> {
        let encoded = key.encode_key();
        if self.namespace.is_empty() {
            return encoded;
        }
        let mut raw = Vec::with_capacity(self.namespace.len() + 1 + encoded.len());
        raw.extend_from_slice(self.namespace.as_bytes());
        raw.push(b'/');
        raw.extend_from_slice(&encoded);
        raw
    }

    fn is_expired(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => now - stored_at > ttl,
            None => false,
        }
    }

    fn insert_memory(
        &self,
        memory: &mut LruCache<K, CacheEntry<V>>,
        key: K,
        value: V,
        stored_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let entry = CacheEntry {
            value,
            stored_at,
            last_access: now,
        };
        if memory.put(key, entry).is_some() {
            self.stats.record_eviction();
        }
    }

    /// Write a durable hit back to memory unless a put or invalidate ran
    /// since `seen` was taken
    fn write_back(&self, key: K, value: V, stored_at: DateTime<Utc>, now: DateTime<Utc>, seen: u64) {
        let mut memory = self.memory.lock();
        if self.generation.load(Ordering::Acquire) != seen {
            debug!(namespace = %self.namespace, "key written concurrently, skipping write-back");
            return;
        }
        self.insert_memory(&mut memory, key, value, stored_at, now);
    }

    /// Memory-tier value, plus the generation observed under the lock
    fn lookup_memory(&self, key: &K, now: DateTime<Utc>) -> (Option<V>, u64) {
        let mut memory = self.memory.lock();
        let generation = self.generation.load(Ordering::Acquire);
        let expired = match memory.get_mut(key) {
            Some(entry) if !self.is_expired(entry.stored_at, now) => {
                entry.last_access = now;
                return (Some(entry.value.clone()), generation);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            memory.remove(key);
        }
        (None, generation)
    }

    fn lookup_backing(&self, raw: &[u8], now: DateTime<Utc>) -> Option<(V, DateTime<Utc>)> {
        let backing = self.backing.as_ref()?;
        if self.suppressed.lock().contains(raw) {
            return None;
        }

        let bytes = match backing.get(raw) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(
                    namespace = %self.namespace,
                    error = %e,
                    "backing store read failed, treating as miss"
                );
                return None;
            }
        };

        match serde_json::from_slice::<StoredEntry<V>>(&bytes) {
            Ok(stored) if self.is_expired(stored.stored_at, now) => {
                debug!(namespace = %self.namespace, "durable entry expired");
                None
            }
            Ok(stored) => Some((stored.value, stored.stored_at)),
            Err(e) => {
                warn!(
                    namespace = %self.namespace,
                    error = %e,
                    "undecodable durable entry, treating as miss"
                );
                None
            }
        }
    }
}

impl<K, V> Cache<K, V> for HybridCache<K, V>
where
    K: CacheKey,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        let now = Utc::now();

        let (found, seen) = self.lookup_memory(key, now);
        if let Some(value) = found {
            self.stats.record_hit();
            return Some(value);
        }

        let raw = self.raw_key(key);
        match self.lookup_backing(&raw, now) {
            Some((value, stored_at)) => {
                self.write_back(key.clone(), value.clone(), stored_at, now, seen);
                self.stats.record_hit();
                Some(value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    fn put(&self, key: K, value: V) -> Result<(), CacheError> {
        let now = Utc::now();

        if let Some(backing) = &self.backing {
            let raw = self.raw_key(&key);
            let bytes = serde_json::to_vec(&StoredEntryRef {
                stored_at: now,
                value: &value,
            })?;
            backing.put(&raw, &bytes)?;
            self.suppressed.lock().remove(&raw);
        }

        let mut memory = self.memory.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.insert_memory(&mut memory, key, value, now, now);
        drop(memory);
        self.stats.record_store();
        Ok(())
    }

    fn invalidate(&self, key: &K) -> Result<(), CacheError> {
        // durable tier first; a lookup racing with us then either reads
        // nothing or sees the generation move before it writes back
        let result = match &self.backing {
            Some(backing) => {
                let raw = self.raw_key(key);
                backing.invalidate(&raw).map_err(|e| {
                    warn!(
                        namespace = %self.namespace,
                        error = %e,
                        "backing store invalidate failed, suppressing key"
                    );
                    self.suppressed.lock().insert(raw);
                    CacheError::from(e)
                })
            }
            None => Ok(()),
        };

        let mut memory = self.memory.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        memory.remove(key);
        result
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn clear(&self) {
        self.memory.lock().clear();
        self.stats.reset();
    }
}
