//! Page metadata source and its cache front

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tlgcache::Cache;
use tracing::warn;

use crate::page::{PageId, PageMeta};

/// Metadata source failure; the affected page is skipped with an error
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetaError {
    /// Source could not answer
    #[error("page metadata unavailable: {0}")]
    Unavailable(String),
}

/// Where page facts come from (the wiki database, a dump, a fixture)
pub trait PageMetaSource: Send + Sync {
    /// Metadata for a page; `None` if the source does not know it
    fn fetch(&self, id: PageId) -> Result<Option<PageMeta>, MetaError>;
}

/// Metadata held in memory, loaded from a JSON array of [`PageMeta`]
#[derive(Debug, Default)]
pub struct StaticMetaSource {
    pages: HashMap<PageId, PageMeta>,
}

impl StaticMetaSource {
    /// Source over the given records
    pub fn new(records: impl IntoIterator<Item = PageMeta>) -> Self {
        Self {
            pages: records.into_iter().map(|m| (m.page.id(), m)).collect(),
        }
    }

    /// Parse a JSON array
    pub fn from_json(json: &str) -> Result<Self, MetaError> {
        let records: Vec<PageMeta> =
            serde_json::from_str(json).map_err(|e| MetaError::Unavailable(e.to_string()))?;
        Ok(Self::new(records))
    }

    /// Load a JSON array from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MetaError> {
        let json = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MetaError::Unavailable(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json(&json)
    }

    /// Number of pages known
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Check if the source is empty
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl PageMetaSource for StaticMetaSource {
    fn fetch(&self, id: PageId) -> Result<Option<PageMeta>, MetaError> {
        Ok(self.pages.get(&id).cloned())
    }
}

/// Cache-fronted metadata lookup shared by all workers.
///
/// A cache hit never touches the source. Misses are fetched and written
/// back; a failed write is logged and the value is still returned.
#[derive(Clone)]
pub struct MetaLookup {
    cache: Arc<dyn Cache<PageId, PageMeta>>,
    source: Arc<dyn PageMetaSource>,
}

impl MetaLookup {
    /// Front `source` with `cache`
    pub fn new(cache: Arc<dyn Cache<PageId, PageMeta>>, source: Arc<dyn PageMetaSource>) -> Self {
        Self { cache, source }
    }

    /// Metadata for a page
    pub fn get(&self, id: PageId) -> Result<Option<PageMeta>, MetaError> {
        if let Some(meta) = self.cache.get(&id) {
            return Ok(Some(meta));
        }

        let Some(meta) = self.source.fetch(id)? else {
            return Ok(None);
        };
        if let Err(e) = self.cache.put(id, meta.clone()) {
            warn!(page = %id, error = %e, "could not cache page metadata");
        }
        Ok(Some(meta))
    }

    /// The cache in front of the source
    pub fn cache(&self) -> &Arc<dyn Cache<PageId, PageMeta>> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageRef;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tlgcache::{CacheConfig, CacheFactory};

    struct CountingSource {
        inner: StaticMetaSource,
        calls: AtomicUsize,
    }

    impl PageMetaSource for CountingSource {
        fn fetch(&self, id: PageId) -> Result<Option<PageMeta>, MetaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(id)
        }
    }

    fn meta(id: u64, length: u64) -> PageMeta {
        PageMeta {
            page: PageRef::article(id, format!("Page {}", id)),
            length,
            is_redirect: false,
            image_count: 1,
            templates: Vec::new(),
            touched: Utc::now(),
            latest_revision: id * 10,
        }
    }

    #[test]
    fn test_miss_fetches_once_then_hits() {
        let source = Arc::new(CountingSource {
            inner: StaticMetaSource::new(vec![meta(1, 100)]),
            calls: AtomicUsize::new(0),
        });
        let cache = CacheFactory::memory().build(CacheConfig::new("meta"));
        let lookup = MetaLookup::new(cache, source.clone());

        assert_eq!(lookup.get(PageId(1)).unwrap().unwrap().length, 100);
        assert_eq!(lookup.get(PageId(1)).unwrap().unwrap().length, 100);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let stats = lookup.cache().stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_unknown_page_is_none() {
        let cache = CacheFactory::noop().build(CacheConfig::new("meta"));
        let lookup = MetaLookup::new(cache, Arc::new(StaticMetaSource::default()));
        assert_eq!(lookup.get(PageId(42)).unwrap(), None);
    }

    #[test]
    fn test_from_json() {
        let json = r#"[{"page": {"id": 1, "title": "Foo"}, "length": 12,
                        "touched": "2024-01-01T00:00:00Z", "latest_revision": 3}]"#;
        let source = StaticMetaSource::from_json(json).unwrap();
        let got = source.fetch(PageId(1)).unwrap().unwrap();
        assert_eq!(got.length, 12);
        assert!(got.templates.is_empty());
        assert!(StaticMetaSource::from_json("[{}]").is_err());
    }
}
