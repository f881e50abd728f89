//! # tlg
//!
//! Task list generator: finds pages in a category tree that carry a given
//! set of flaws.
//!
//! ## Run
//! - The category query is resolved lazily against a [`CategoryGraph`]
//! - Pages stream through a bounded [`queue`] into a pool of blocking
//!   workers, each running the [`FlawFilters`] pipeline
//! - Page metadata comes through a cache-fronted [`MetaLookup`]
//! - Flawed pages collect into a bounded [`TlgResult`]; the run ends
//!   `Completed`, `Truncated` or `Aborted`
//! - Flaws marked as done for a page revision ([`DoneMarks`]) are left out
//!
//! Progress can be streamed as NDJSON while the run is still collecting
//! (see [`stream`]).

#![warn(missing_docs)]

pub mod catgraph;
pub mod config;
pub mod done;
pub mod flaws;
pub mod generator;
pub mod meta;
pub mod page;
pub mod pipeline;
pub mod queue;
pub mod result;
pub mod stream;

pub use catgraph::{
    CategoryGraph, GraphError, GraphResolver, PageStream, Query, QueryError, StaticGraph,
    TermTarget,
};
pub use config::{Config, ConfigError, META_NAMESPACE};
pub use done::{DoneKey, DoneMark, DoneMarks, DONE_NAMESPACE};
pub use flaws::{
    catalogue, FilterConfig, FilterResources, FilterSpecError, FlawAction, FlawFilter, PageContext,
};
pub use generator::{
    GeneratorSettings, RunError, RunEvent, RunOutcome, RunRequest, RunState, RunStatus,
    TaskListGenerator, TruncationReason,
};
pub use meta::{MetaError, MetaLookup, PageMetaSource, StaticMetaSource};
pub use page::{Namespace, PageId, PageMeta, PageRef};
pub use pipeline::FlawFilters;
pub use queue::{QueueFault, TaskQueue, WorkerPool};
pub use result::{FlawedPage, ResultBuilder, RunMetadata, TlgResult};
pub use stream::{pump, NdjsonWriter};
