//! Builds caches of one topology over a shared durable tier

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::backing::{open_backing, BackendKind, BackingStore};
use crate::cache::{Cache, CacheConfig, HybridCache};
use crate::key::CacheKey;
use crate::list::ListCache;
use crate::noop::NoopCache;

/// Hands out caches that all share the same backend.
///
/// One durable store is opened per factory; caches separate their keys
/// by namespace.
#[derive(Clone)]
pub struct CacheFactory {
    kind: BackendKind,
    store: Option<Arc<dyn BackingStore>>,
}

impl CacheFactory {
    /// Open the backend for `kind`, rooted at `dir` when it is durable
    pub fn open<P: AsRef<Path>>(kind: BackendKind, dir: P) -> tlgstore::Result<Self> {
        let store = open_backing(kind, dir.as_ref())?;
        info!(backend = ?kind, dir = %dir.as_ref().display(), "cache backend ready");
        Ok(Self { kind, store })
    }

    /// Factory over an already-open durable tier
    pub fn with_store(store: Arc<dyn BackingStore>) -> Self {
        Self {
            kind: BackendKind::Disk,
            store: Some(store),
        }
    }

    /// Memory-only caches
    pub fn memory() -> Self {
        Self {
            kind: BackendKind::Memory,
            store: None,
        }
    }

    /// Caches that never store anything
    pub fn noop() -> Self {
        Self {
            kind: BackendKind::Noop,
            store: None,
        }
    }

    /// Backend this factory builds
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Build a single-value cache
    pub fn build<K, V>(&self, config: CacheConfig) -> Arc<dyn Cache<K, V>>
    where
        K: CacheKey,
        V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        match self.kind {
            BackendKind::Noop => Arc::new(NoopCache::new()),
            BackendKind::Memory => Arc::new(HybridCache::<K, V>::in_memory(config)),
            BackendKind::Disk => Arc::new(HybridCache::<K, V>::build(self.store.clone(), config)),
        }
    }

    /// Build a multi-value cache keeping at most `max_len` entries per key
    pub fn build_list<K, V>(&self, config: CacheConfig, max_len: usize) -> ListCache<K, V>
    where
        K: CacheKey,
        V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        ListCache::new(self.build::<K, Vec<V>>(config), max_len)
    }
}

impl std::fmt::Debug for CacheFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheFactory")
            .field("kind", &self.kind)
            .field("durable", &self.store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_every_kind_honours_the_contract() {
        let dir = TempDir::new().unwrap();
        for kind in [BackendKind::Disk, BackendKind::Memory, BackendKind::Noop] {
            let factory = CacheFactory::open(kind, dir.path()).unwrap();
            let cache = factory.build::<u64, String>(CacheConfig::new(format!("{:?}", kind)));

            cache.put(1, "one".to_string()).unwrap();
            let got = cache.get(&1);
            match kind {
                BackendKind::Noop => assert_eq!(got, None),
                _ => assert_eq!(got.as_deref(), Some("one")),
            }
            assert_eq!(cache.stats().lookups(), 1);
            assert_eq!(cache.stats().stores, 1);
        }
    }

    #[test]
    fn test_disk_factory_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        {
            let factory = CacheFactory::open(BackendKind::Disk, dir.path()).unwrap();
            let cache = factory.build::<String, u32>(CacheConfig::new("sizes"));
            cache.put("Foo".to_string(), 1234).unwrap();
        }

        let factory = CacheFactory::open(BackendKind::Disk, dir.path()).unwrap();
        let cache = factory.build::<String, u32>(CacheConfig::new("sizes"));
        assert_eq!(cache.get(&"Foo".to_string()), Some(1234));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_build_list_uses_factory_backend() {
        let factory = CacheFactory::memory();
        let list = factory.build_list::<u64, String>(CacheConfig::new("hist"), 2);

        list.append(5, "a".to_string()).unwrap();
        list.append(5, "b".to_string()).unwrap();
        list.append(5, "c".to_string()).unwrap();
        assert_eq!(list.entries(&5), vec!["b".to_string(), "c".to_string()]);
    }
}
