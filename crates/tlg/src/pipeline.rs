//! Filter pipeline: ordered filters combined with logical AND

use std::sync::Arc;

use crate::flaws::{Evidence, FilterConfig, FilterResources, FlawAction, FlawFilter, PageContext};

/// Ordered, non-empty list of filters.
///
/// A page is flawed only if every filter says so. Evaluation stops at
/// the first outcome that is not `Flawed` and that outcome becomes the
/// page's result.
#[derive(Clone)]
pub struct FlawFilters {
    filters: Vec<Arc<dyn FlawFilter>>,
}

impl FlawFilters {
    /// Pipeline over the given filters; `None` if the list is empty
    pub fn new(filters: Vec<Arc<dyn FlawFilter>>) -> Option<Self> {
        if filters.is_empty() {
            None
        } else {
            Some(Self { filters })
        }
    }

    /// Build every configured filter
    pub fn from_configs(configs: &[FilterConfig], resources: &FilterResources) -> Option<Self> {
        Self::new(configs.iter().map(|c| c.build(resources)).collect())
    }

    /// Filter names in pipeline order
    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Number of filters
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Check if the pipeline has no filters
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Evaluate one page through every filter
    pub fn evaluate(&self, ctx: &PageContext<'_>) -> FlawAction {
        let mut evidence = Evidence::default();
        for filter in &self.filters {
            match filter.evaluate(ctx) {
                FlawAction::Flawed(found) => evidence.merge(found),
                other => return other,
            }
        }
        FlawAction::Flawed(evidence)
    }
}

impl std::fmt::Debug for FlawFilters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
