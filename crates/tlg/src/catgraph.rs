//! Category graph interface
//!
//! The graph service is an oracle answering "which pages sit under this
//! category, down to depth N". [`StaticGraph`] serves a JSON dump of the
//! category tree in-process. Query strings combine several categories
//! (or single pages, `title#Page`) with set operators.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::page::{normalize_title, Namespace, PageId, PageRef};

/// Lazy, finite sequence of member pages
pub type PageStream = BoxStream<'static, Result<PageRef, GraphError>>;

/// Graph service failure; fatal to the run that hit it
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Service could not be reached or refused the request
    #[error("graph service unavailable: {0}")]
    Unavailable(String),

    /// No answer within the configured time
    #[error("graph service timed out after {0:?}")]
    Timeout(Duration),

    /// Category does not exist
    #[error("unknown category '{0}'")]
    UnknownCategory(String),

    /// No main-namespace page has this title
    #[error("page not found in mainspace: {0}")]
    UnknownPage(String),

    /// Malformed answer
    #[error("graph protocol error: {0}")]
    Protocol(String),
}

/// The external category graph.
///
/// Every call re-queries; order is stable within one call only.
#[async_trait]
pub trait CategoryGraph: Send + Sync {
    /// Pages under `category`, following subcategories up to `max_depth`
    /// levels and yielding at most `max_members` pages
    async fn members(
        &self,
        category: &str,
        max_depth: u32,
        max_members: usize,
    ) -> Result<PageStream, GraphError>;

    /// The main-namespace page titled `title`, if any
    async fn page_by_title(&self, title: &str) -> Result<Option<PageRef>, GraphError> {
        Err(GraphError::Unavailable(format!(
            "page lookup not supported (looking for '{}')",
            title
        )))
    }
}

#[derive(Debug, Default, Deserialize)]
struct CategoryNode {
    #[serde(default)]
    pages: Vec<PageRef>,
    #[serde(default)]
    subcategories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GraphDump {
    categories: HashMap<String, CategoryNode>,
}

/// Category graph held in memory.
///
/// Dump format:
/// `{"categories": {"Physics": {"pages": [{"id": 1, "title": "Foo"}], "subcategories": ["Optics"]}}}`
#[derive(Debug, Default)]
pub struct StaticGraph {
    categories: HashMap<String, CategoryNode>,
}

impl StaticGraph {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON dump
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let dump: GraphDump =
            serde_json::from_str(json).map_err(|e| GraphError::Protocol(e.to_string()))?;
        let categories = dump
            .categories
            .into_iter()
            .map(|(name, node)| (normalize_title(&name), node))
            .collect();
        Ok(Self { categories })
    }

    /// Load a JSON dump from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GraphError> {
        let json = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GraphError::Unavailable(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Add or replace a category
    pub fn with_category<S: Into<String>>(
        mut self,
        name: &str,
        pages: Vec<PageRef>,
        subcategories: Vec<S>,
    ) -> Self {
        let node = CategoryNode {
            pages,
            subcategories: subcategories.into_iter().map(Into::into).collect(),
        };
        self.categories.insert(normalize_title(name), node);
        self
    }

    /// Number of categories known
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// Check if the graph has no categories
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Breadth-first traversal, pages deduplicated by id
    fn collect(&self, category: &str, max_depth: u32, max_members: usize) -> Result<Vec<PageRef>, GraphError> {
        let root = normalize_title(category);
        if !self.categories.contains_key(&root) {
            return Err(GraphError::UnknownCategory(category.to_string()));
        }

        let mut pages = Vec::new();
        let mut seen_pages: HashSet<PageId> = HashSet::new();
        let mut seen_cats: HashSet<String> = HashSet::new();
        let mut queue = VecDeque::new();
        seen_cats.insert(root.clone());
        queue.push_back((root, 0u32));

        while let Some((name, depth)) = queue.pop_front() {
            let Some(node) = self.categories.get(&name) else {
                continue;
            };
            for page in &node.pages {
                if pages.len() >= max_members {
                    return Ok(pages);
                }
                if seen_pages.insert(page.id()) {
                    pages.push(page.clone());
                }
            }
            if depth < max_depth {
                for sub in &node.subcategories {
                    let sub = normalize_title(sub);
                    if seen_cats.insert(sub.clone()) {
                        queue.push_back((sub, depth + 1));
                    }
                }
            }
        }
        Ok(pages)
    }

    fn find_title(&self, title: &str) -> Option<PageRef> {
        let wanted = normalize_title(title);
        self.categories
            .values()
            .flat_map(|node| node.pages.iter())
            .find(|page| page.namespace() == Namespace::MAIN && page.title() == wanted)
            .cloned()
    }
}

#[async_trait]
impl CategoryGraph for StaticGraph {
    async fn members(
        &self,
        category: &str,
        max_depth: u32,
        max_members: usize,
    ) -> Result<PageStream, GraphError> {
        let pages = self.collect(category, max_depth, max_members)?;
        debug!(category, max_depth, pages = pages.len(), "static graph lookup");
        Ok(stream::iter(pages.into_iter().map(Ok)).boxed())
    }

    async fn page_by_title(&self, title: &str) -> Result<Option<PageRef>, GraphError> {
        Ok(self.find_title(title))
    }
}

/// Malformed query string
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// Nothing to search for
    #[error("empty category search string")]
    Empty,

    /// A `;`-separated term had no category name
    #[error("empty category name at position {0}")]
    EmptyTerm(usize),

    /// `kind#name` with a kind other than `title`
    #[error("invalid query type '{0}'")]
    UnknownKind(String),
}

/// Separator between a term's kind and its name, as in `title#Foo`
pub const KIND_SEPARATOR: char = '#';

/// How a query term combines with the terms before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    /// Plain term: add its pages
    Union,
    /// `+term`: keep only pages also in this category
    Intersect,
    /// `-term`: drop pages in this category
    Subtract,
}

/// What a term names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermTarget {
    /// Every page under a category
    Category(String),
    /// One page, `title#Page title`
    Page(String),
}

impl TermTarget {
    fn parse(raw: &str) -> Result<Self, QueryError> {
        match raw.split_once(KIND_SEPARATOR) {
            None => Ok(TermTarget::Category(raw.to_string())),
            Some((kind, name)) if kind.trim() == "title" => {
                Ok(TermTarget::Page(name.trim().to_string()))
            }
            Some((kind, _)) => Err(QueryError::UnknownKind(kind.trim().to_string())),
        }
    }

    /// Category or page title
    pub fn name(&self) -> &str {
        match self {
            TermTarget::Category(name) | TermTarget::Page(name) => name,
        }
    }
}

/// One `;`-separated term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTerm {
    /// Operator
    pub op: QueryOp,
    /// Category or page
    pub target: TermTarget,
}

/// Parsed query string, e.g. `"Physics; +Stubs; -Biographies"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    terms: Vec<QueryTerm>,
}

impl Query {
    /// Parse a query string.
    ///
    /// `+` on the first term acts as a union, `-` on the first term is
    /// ignored.
    pub fn parse(input: &str) -> Result<Self, QueryError> {
        if input.trim().is_empty() {
            return Err(QueryError::Empty);
        }

        let mut terms = Vec::new();
        for (idx, raw) in input.split(';').enumerate() {
            let raw = raw.trim();
            let (op, name) = match raw.chars().next() {
                Some('+') => (QueryOp::Intersect, raw[1..].trim()),
                Some('-') => (QueryOp::Subtract, raw[1..].trim()),
                _ => (QueryOp::Union, raw),
            };
            let target = TermTarget::parse(name)?;
            if target.name().is_empty() {
                return Err(QueryError::EmptyTerm(idx));
            }
            terms.push(QueryTerm { op, target });
        }
        Ok(Self { terms })
    }

    /// Terms in input order
    pub fn terms(&self) -> &[QueryTerm] {
        &self.terms
    }

    /// Single category that can be streamed without materializing
    pub fn single(&self) -> Option<&str> {
        match self.terms.as_slice() {
            [QueryTerm {
                op,
                target: TermTarget::Category(name),
            }] if *op != QueryOp::Subtract => Some(name),
            _ => None,
        }
    }
}

/// Runs queries against a graph with a time limit on every call.
#[derive(Clone)]
pub struct GraphResolver {
    graph: Arc<dyn CategoryGraph>,
    timeout: Duration,
    max_members: usize,
}

impl GraphResolver {
    /// Wrap a graph
    pub fn new(graph: Arc<dyn CategoryGraph>, timeout: Duration, max_members: usize) -> Self {
        Self {
            graph,
            timeout,
            max_members,
        }
    }

    /// Pages matching the query.
    ///
    /// A single-category query streams straight from the graph. Compound
    /// queries are materialized, keeping the order of first appearance.
    pub async fn resolve(&self, query: &Query, depth: u32) -> Result<PageStream, GraphError> {
        if let Some(category) = query.single() {
            let stream = self.members(category, depth).await?;
            return Ok(with_item_timeout(stream, self.timeout));
        }

        let mut order: Vec<PageRef> = Vec::new();
        let mut ids: HashSet<PageId> = HashSet::new();
        for (idx, term) in query.terms().iter().enumerate() {
            let op = match (idx, term.op) {
                (0, QueryOp::Subtract) => continue,
                (0, _) => QueryOp::Union,
                (_, op) => op,
            };
            let pages = match &term.target {
                TermTarget::Category(name) => self.collect(name, depth).await?,
                TermTarget::Page(title) => vec![self.page(title).await?],
            };
            match op {
                QueryOp::Union => {
                    for page in pages {
                        if ids.insert(page.id()) {
                            order.push(page);
                        }
                    }
                }
                QueryOp::Intersect => {
                    let keep: HashSet<PageId> = pages.iter().map(|p| p.id()).collect();
                    order.retain(|p| keep.contains(&p.id()));
                    ids.retain(|id| keep.contains(id));
                }
                QueryOp::Subtract => {
                    let drop: HashSet<PageId> = pages.iter().map(|p| p.id()).collect();
                    order.retain(|p| !drop.contains(&p.id()));
                    ids.retain(|id| !drop.contains(id));
                }
            }
            debug!(term = %term.target.name(), ?op, pages = order.len(), "query term applied");
        }

        order.truncate(self.max_members);
        Ok(stream::iter(order.into_iter().map(Ok)).boxed())
    }

    async fn members(&self, category: &str, depth: u32) -> Result<PageStream, GraphError> {
        tokio::time::timeout(
            self.timeout,
            self.graph.members(category, depth, self.max_members),
        )
        .await
        .map_err(|_| GraphError::Timeout(self.timeout))?
    }

    async fn page(&self, title: &str) -> Result<PageRef, GraphError> {
        tokio::time::timeout(self.timeout, self.graph.page_by_title(title))
            .await
            .map_err(|_| GraphError::Timeout(self.timeout))??
            .ok_or_else(|| GraphError::UnknownPage(title.to_string()))
    }

    async fn collect(&self, category: &str, depth: u32) -> Result<Vec<PageRef>, GraphError> {
        let mut stream = with_item_timeout(self.members(category, depth).await?, self.timeout);
        let mut pages = Vec::new();
        while let Some(page) = stream.next().await {
            pages.push(page?);
        }
        Ok(pages)
    }
}

/// Fail the stream with [`GraphError::Timeout`] if an item takes too long
fn with_item_timeout(stream: PageStream, limit: Duration) -> PageStream {
    stream::unfold(Some(stream), move |state| async move {
        let mut stream = state?;
        match tokio::time::timeout(limit, stream.next()).await {
            Ok(Some(item)) => Some((item, Some(stream))),
            Ok(None) => None,
            Err(_) => Some((Err(GraphError::Timeout(limit)), None)),
        }
    })
    .boxed()
}
