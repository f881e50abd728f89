//! # tlgcache
//!
//! Caching layer for the task list generator.
//!
//! ## Architecture
//! - **Memory tier**: LRU map with AHash lookups, O(1) eviction
//! - **Durable tier**: optional [`tlgstore::DiskStore`] record log, shared
//!   between caches by namespace
//! - **Variants**: hybrid (disk + memory), memory only, no-op, and a
//!   multi-value list cache layered over any of them
//!
//! Every variant implements [`Cache`] and keeps its own hit/miss/store
//! counters.

#![warn(missing_docs)]

mod backing;
mod cache;
mod error;
mod factory;
mod key;
mod list;
mod lru;
mod noop;
mod stats;

pub use backing::{open_backing, BackendKind, BackingStore};
pub use cache::{Cache, CacheConfig, CacheEntry, HybridCache};
pub use error::CacheError;
pub use factory::CacheFactory;
pub use key::CacheKey;
pub use list::{ListCache, DEFAULT_HISTORY_LEN};
pub use noop::NoopCache;
pub use stats::{Stats, StatsSnapshot};
