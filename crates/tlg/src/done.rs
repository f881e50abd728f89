//! Flaws marked as done
//!
//! A mark records that one filter's flaw was dealt with in one revision of
//! a page. Marks are keyed by filter name and revision, so the next edit
//! of the page brings the flaw back.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tlgcache::{Cache, CacheConfig, CacheError, CacheFactory, CacheKey};
use tracing::info;

use crate::page::PageRef;

/// Namespace of the done-mark cache
pub const DONE_NAMESPACE: &str = "done";

/// Bad `Filter@Revision` spec
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("expected FILTER@REVISION, got '{0}'")]
pub struct DoneKeyError(pub String);

/// A flaw in one revision
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DoneKey {
    /// Filter short name
    pub filter: String,
    /// Page revision the flaw was found in
    pub revision: u64,
}

impl DoneKey {
    /// Key for a filter and revision
    pub fn new(filter: impl Into<String>, revision: u64) -> Self {
        Self {
            filter: filter.into(),
            revision,
        }
    }
}

impl CacheKey for DoneKey {
    fn encode_key(&self) -> Vec<u8> {
        format!("rev:{}:{}", self.revision, self.filter).into_bytes()
    }
}

impl fmt::Display for DoneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.filter, self.revision)
    }
}

impl FromStr for DoneKey {
    type Err = DoneKeyError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let (filter, revision) = spec
            .rsplit_once('@')
            .ok_or_else(|| DoneKeyError(spec.to_string()))?;
        let filter = filter.trim();
        let revision = revision
            .trim()
            .parse()
            .map_err(|_| DoneKeyError(spec.to_string()))?;
        if filter.is_empty() {
            return Err(DoneKeyError(spec.to_string()));
        }
        Ok(Self::new(filter, revision))
    }
}

/// What is stored for a mark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneMark {
    /// Page the mark was made on, when known
    #[serde(default)]
    pub page: Option<PageRef>,
    /// When it was marked
    pub marked_at: DateTime<Utc>,
}

/// Done marks, shared by every run of a generator
#[derive(Clone)]
pub struct DoneMarks {
    cache: Arc<dyn Cache<DoneKey, DoneMark>>,
}

impl DoneMarks {
    /// Marks kept in `cache`
    pub fn new(cache: Arc<dyn Cache<DoneKey, DoneMark>>) -> Self {
        Self { cache }
    }

    /// Marks in the factory's backend, default namespace
    pub fn from_factory(factory: &CacheFactory) -> Self {
        Self::with_config(factory, CacheConfig::new(DONE_NAMESPACE))
    }

    /// Marks in the factory's backend
    pub fn with_config(factory: &CacheFactory, config: CacheConfig) -> Self {
        Self::new(factory.build(config))
    }

    /// Record a flaw as dealt with
    pub fn mark(&self, key: DoneKey, page: Option<PageRef>) -> Result<(), CacheError> {
        info!(mark = %key, "marking flaw as done");
        self.cache.put(
            key,
            DoneMark {
                page,
                marked_at: Utc::now(),
            },
        )
    }

    /// Take a mark back
    pub fn unmark(&self, key: &DoneKey) -> Result<(), CacheError> {
        info!(mark = %key, "unmarking flaw");
        self.cache.invalidate(key)
    }

    /// Whether `filter`'s flaw in `revision` was marked done
    pub fn is_done(&self, filter: &str, revision: u64) -> bool {
        self.cache.get(&DoneKey::new(filter, revision)).is_some()
    }

    /// The mark for a key, if any
    pub fn get(&self, key: &DoneKey) -> Option<DoneMark> {
        self.cache.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tlgcache::BackendKind;

    #[test]
    fn test_parse_key() {
        assert_eq!("Small@1207".parse(), Ok(DoneKey::new("Small", 1207)));
        assert_eq!("Template:a@b@9".parse(), Ok(DoneKey::new("Template:a@b", 9)));
        assert!("Small".parse::<DoneKey>().is_err());
        assert!("@12".parse::<DoneKey>().is_err());
        assert!("Small@latest".parse::<DoneKey>().is_err());
        assert_eq!(DoneKey::new("NoImages", 3).to_string(), "NoImages@3");
    }

    #[test]
    fn test_mark_is_per_revision_and_filter() {
        let marks = DoneMarks::from_factory(&CacheFactory::memory());
        marks.mark(DoneKey::new("Small", 10), None).unwrap();

        assert!(marks.is_done("Small", 10));
        assert!(!marks.is_done("Small", 11));
        assert!(!marks.is_done("NoImages", 10));

        marks.unmark(&DoneKey::new("Small", 10)).unwrap();
        assert!(!marks.is_done("Small", 10));
    }

    #[test]
    fn test_marks_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let factory = CacheFactory::open(BackendKind::Disk, dir.path()).unwrap();
            let marks = DoneMarks::from_factory(&factory);
            marks
                .mark(DoneKey::new("Large", 42), Some(PageRef::article(7, "Muon")))
                .unwrap();
            marks.mark(DoneKey::new("Small", 42), None).unwrap();
            marks.unmark(&DoneKey::new("Small", 42)).unwrap();
        }

        let factory = CacheFactory::open(BackendKind::Disk, dir.path()).unwrap();
        let marks = DoneMarks::from_factory(&factory);
        let mark = marks.get(&DoneKey::new("Large", 42)).unwrap();
        assert_eq!(mark.page.unwrap().title(), "Muon");
        assert!(!marks.is_done("Small", 42));
    }
}
