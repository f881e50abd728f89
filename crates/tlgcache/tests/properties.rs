use std::sync::Arc;

use proptest::prelude::*;
use tempfile::TempDir;
use tlgcache::{BackendKind, Cache, CacheConfig, CacheFactory};

fn factory(kind: BackendKind, dir: &TempDir) -> CacheFactory {
    CacheFactory::open(kind, dir.path()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn put_then_get_returns_value(
        key in any::<u64>(),
        value in "[a-zA-Z0-9 ]{0,64}",
        durable in any::<bool>(),
    ) {
        let dir = TempDir::new().unwrap();
        let kind = if durable { BackendKind::Disk } else { BackendKind::Memory };
        let cache: Arc<dyn Cache<u64, String>> =
            factory(kind, &dir).build(CacheConfig::new("prop"));

        cache.put(key, value.clone()).unwrap();
        prop_assert_eq!(cache.get(&key), Some(value));
    }

    #[test]
    fn every_lookup_is_counted_once(
        writes in prop::collection::vec(0u64..50, 0..40),
        reads in prop::collection::vec(0u64..50, 0..80),
        kind_idx in 0usize..3,
    ) {
        let dir = TempDir::new().unwrap();
        let kind = [BackendKind::Disk, BackendKind::Memory, BackendKind::Noop][kind_idx];
        let cache: Arc<dyn Cache<u64, u64>> =
            factory(kind, &dir).build(CacheConfig::new("count").with_capacity(8));

        for key in &writes {
            cache.put(*key, key * 2).unwrap();
        }
        for key in &reads {
            cache.get(key);
        }

        let stats = cache.stats();
        prop_assert_eq!(stats.hits + stats.misses, reads.len() as u64);
        prop_assert_eq!(stats.stores, writes.len() as u64);
    }

    #[test]
    fn disk_cache_never_misses_written_keys(
        writes in prop::collection::vec(0u64..200, 1..60),
    ) {
        let dir = TempDir::new().unwrap();
        let cache: Arc<dyn Cache<u64, u64>> = factory(BackendKind::Disk, &dir)
            .build(CacheConfig::new("evict").with_capacity(4));

        for key in &writes {
            cache.put(*key, *key).unwrap();
        }
        for key in &writes {
            prop_assert_eq!(cache.get(key), Some(*key));
        }
        prop_assert_eq!(cache.stats().misses, 0);
    }
}
