//! Flaw filters
//!
//! A filter is a predicate over one page. Filters never share mutable
//! state between pages except through caches they hold explicitly
//! (the change detector's baseline).

use std::cell::OnceCell;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::meta::{MetaError, MetaLookup};
use crate::page::{PageMeta, PageRef};

mod changedetector;
mod config;
mod content;
mod recent;
mod size;
mod testing;

pub use changedetector::{ChangeDetectorFilter, PageSnapshot, DEFAULT_BASELINE_NAMESPACE};
pub use config::{catalogue, catalogue_json, FilterConfig, FilterInfo, FilterResources, FilterSpecError};
pub use content::{NoImagesFilter, TemplateFilter, TemplateMode, MISSING_SOURCES_TEMPLATES};
pub use recent::RecentlyChangedFilter;
pub use size::{SizeDirection, SizeFilter};
pub use testing::{AllFilter, NopFilter, UnluckyFilter, UnluckyMode};

/// One filter's finding about a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlawNote {
    /// Short name of the filter that found it
    pub filter: String,
    /// Human-readable detail
    pub info: String,
    /// Secondary sort key within equal flaw sets
    pub sort_key: i64,
    /// Marked as done for the evaluated revision
    pub done: bool,
}

/// Everything the filters found about a flawed page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Evidence {
    /// Notes in pipeline order
    pub notes: Vec<FlawNote>,
}

impl Evidence {
    /// Evidence carrying a single note
    pub fn single(filter: &str, info: impl Into<String>, sort_key: i64) -> Self {
        Self {
            notes: vec![FlawNote {
                filter: filter.to_string(),
                info: info.into(),
                sort_key,
                done: false,
            }],
        }
    }

    /// Add another filter's notes
    pub fn merge(&mut self, other: Evidence) {
        self.notes.extend(other.notes);
    }

    /// Filter names, sorted
    pub fn filter_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.notes.iter().map(|n| n.filter.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Outcome of evaluating a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum FlawAction {
    /// The page has the flaw
    Flawed(Evidence),
    /// The page does not have the flaw
    NotFlawed,
    /// Cannot decide yet (e.g. metadata not available)
    Deferred(String),
    /// Evaluation failed
    Error(String),
}

impl FlawAction {
    /// Flawed with a single note
    pub fn flawed(filter: &str, info: impl Into<String>, sort_key: i64) -> Self {
        FlawAction::Flawed(Evidence::single(filter, info, sort_key))
    }

    /// Whether this is a `Flawed` outcome
    pub fn is_flawed(&self) -> bool {
        matches!(self, FlawAction::Flawed(_))
    }
}

/// Per-page evaluation context.
///
/// Page metadata is fetched at most once, on first use, so a pipeline of
/// several filters costs one lookup per page.
pub struct PageContext<'a> {
    page: &'a PageRef,
    lookup: &'a MetaLookup,
    meta: OnceCell<Result<Option<PageMeta>, MetaError>>,
    now: DateTime<Utc>,
}

impl<'a> PageContext<'a> {
    /// Context for one page
    pub fn new(page: &'a PageRef, lookup: &'a MetaLookup) -> Self {
        Self {
            page,
            lookup,
            meta: OnceCell::new(),
            now: Utc::now(),
        }
    }

    /// Pin the evaluation clock
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// The page being evaluated
    pub fn page(&self) -> &PageRef {
        self.page
    }

    /// Evaluation time
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Page metadata, or the outcome a filter should return without it:
    /// unknown page → `Deferred`, lookup failure → `Error`.
    pub fn meta(&self) -> Result<&PageMeta, FlawAction> {
        match self.meta.get_or_init(|| self.lookup.get(self.page.id())) {
            Ok(Some(meta)) => Ok(meta),
            Ok(None) => Err(FlawAction::Deferred(format!(
                "no metadata for page {}",
                self.page.id()
            ))),
            Err(e) => Err(FlawAction::Error(e.to_string())),
        }
    }
}

/// A predicate over one page
pub trait FlawFilter: Send + Sync {
    /// Short name, as used in filter specs and results
    fn name(&self) -> &str;

    /// Evaluate the page
    fn evaluate(&self, ctx: &PageContext<'_>) -> FlawAction;
}

/// Unwrap page metadata or return the context's fallback outcome
macro_rules! require_meta {
    ($ctx:expr) => {
        match $ctx.meta() {
            Ok(meta) => meta,
            Err(action) => return action,
        }
    };
}
pub(crate) use require_meta;
