//! Change detection against a per-title baseline

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tlgcache::ListCache;
use tracing::warn;

use super::{require_meta, FlawAction, FlawFilter, PageContext};

/// Cache namespace the baseline history lives under
pub const DEFAULT_BASELINE_NAMESPACE: &str = "baseline";

/// State of a page as last seen by the change detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    /// Latest revision id
    pub revision: u64,
    /// Touch timestamp
    pub touched: DateTime<Utc>,
}

/// Flags pages whose revision differs from the last recorded snapshot.
///
/// The baseline is keyed by title and keeps a short history per page.
/// A page never seen before counts as changed. Unchanged pages are
/// suppressed.
pub struct ChangeDetectorFilter {
    baseline: Arc<ListCache<String, PageSnapshot>>,
}

impl ChangeDetectorFilter {
    /// Detector over a baseline history
    pub fn new(baseline: Arc<ListCache<String, PageSnapshot>>) -> Self {
        Self { baseline }
    }
}

impl FlawFilter for ChangeDetectorFilter {
    fn name(&self) -> &str {
        "ChangeDetector"
    }

    fn evaluate(&self, ctx: &PageContext<'_>) -> FlawAction {
        let meta = require_meta!(ctx);
        let key = ctx.page().title().to_string();
        let current = PageSnapshot {
            revision: meta.latest_revision,
            touched: meta.touched,
        };

        let info = match self.baseline.latest(&key) {
            Some(previous) if previous.revision == current.revision => {
                return FlawAction::NotFlawed;
            }
            Some(previous) => format!("changed since r{}", previous.revision),
            None => "first seen".to_string(),
        };

        if let Err(e) = self.baseline.append(key, current) {
            warn!(page = %ctx.page(), error = %e, "could not record baseline snapshot");
        }
        FlawAction::flawed(self.name(), info, -current.touched.timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flaws::fixtures;
    use tlgcache::{CacheConfig, CacheFactory};

    fn detector() -> (ChangeDetectorFilter, Arc<ListCache<String, PageSnapshot>>) {
        let baseline = Arc::new(
            CacheFactory::memory().build_list(CacheConfig::new(DEFAULT_BASELINE_NAMESPACE), 4),
        );
        (ChangeDetectorFilter::new(baseline.clone()), baseline)
    }

    fn note(action: FlawAction) -> String {
        match action {
            FlawAction::Flawed(evidence) => evidence.notes[0].info.clone(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_first_seen_then_unchanged_then_changed() {
        let (filter, baseline) = detector();
        let meta = fixtures::meta(1, 100);
        let page = meta.page.clone();

        let lookup = fixtures::lookup(vec![meta.clone()]);
        let ctx = PageContext::new(&page, &lookup);
        assert_eq!(note(filter.evaluate(&ctx)), "first seen");

        let ctx = PageContext::new(&page, &lookup);
        assert_eq!(filter.evaluate(&ctx), FlawAction::NotFlawed);

        let mut edited = meta;
        edited.latest_revision += 1;
        let lookup = fixtures::lookup(vec![edited]);
        let ctx = PageContext::new(&page, &lookup);
        assert_eq!(note(filter.evaluate(&ctx)), "changed since r100");

        let history = baseline.entries(&page.title().to_string());
        let revisions: Vec<u64> = history.iter().map(|s| s.revision).collect();
        assert_eq!(revisions, vec![100, 101]);
    }
}
