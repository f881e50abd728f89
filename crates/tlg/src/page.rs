//! Page identity and metadata

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tlgcache::CacheKey;

/// Numeric page id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub u64);

impl PageId {
    /// Raw id
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PageId {
    fn from(id: u64) -> Self {
        PageId(id)
    }
}

impl CacheKey for PageId {
    fn encode_key(&self) -> Vec<u8> {
        self.0.encode_key()
    }
}

/// Wiki namespace number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(pub i32);

impl Namespace {
    /// Articles
    pub const MAIN: Namespace = Namespace(0);
    /// Media description pages
    pub const FILE: Namespace = Namespace(6);
    /// Category pages
    pub const CATEGORY: Namespace = Namespace(14);
}

impl Default for Namespace {
    fn default() -> Self {
        Namespace::MAIN
    }
}

/// Immutable page identity: id, canonical title and namespace.
///
/// Ordered by id first, so sorting a result by `PageRef` gives a stable
/// order independent of collection order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawPageRef")]
pub struct PageRef {
    id: PageId,
    title: String,
    namespace: Namespace,
}

#[derive(Deserialize)]
struct RawPageRef {
    id: PageId,
    title: String,
    #[serde(default)]
    namespace: Namespace,
}

impl From<RawPageRef> for PageRef {
    fn from(raw: RawPageRef) -> Self {
        PageRef::new(raw.id, raw.title, raw.namespace)
    }
}

impl PageRef {
    /// Create a page reference; underscores in the title become spaces
    pub fn new(id: impl Into<PageId>, title: impl Into<String>, namespace: Namespace) -> Self {
        Self {
            id: id.into(),
            title: title.into().replace('_', " "),
            namespace,
        }
    }

    /// Page in the main namespace
    pub fn article(id: u64, title: impl Into<String>) -> Self {
        Self::new(id, title, Namespace::MAIN)
    }

    /// Page id
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Canonical title
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Namespace
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }
}

impl Ord for PageRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| self.namespace.cmp(&other.namespace))
            .then_with(|| self.title.cmp(&other.title))
    }
}

impl PartialOrd for PageRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.title, self.id)
    }
}

/// Page facts the flaw filters work from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
    /// The page described
    pub page: PageRef,
    /// Wikitext length in bytes
    pub length: u64,
    /// Whether the page is a redirect
    #[serde(default)]
    pub is_redirect: bool,
    /// Number of images/files linked from the page
    #[serde(default)]
    pub image_count: u32,
    /// Templates transcluded, without namespace prefix
    #[serde(default)]
    pub templates: Vec<String>,
    /// Last time the page was touched
    pub touched: DateTime<Utc>,
    /// Id of the latest revision
    pub latest_revision: u64,
}

impl PageMeta {
    /// Whether the page is a non-redirect article
    pub fn is_article(&self) -> bool {
        self.page.namespace() == Namespace::MAIN && !self.is_redirect
    }

    /// Whether a template is transcluded (case-insensitive first letter,
    /// spaces and underscores equivalent)
    pub fn has_template(&self, name: &str) -> bool {
        let wanted = normalize_title(name);
        self.templates.iter().any(|t| normalize_title(t) == wanted)
    }
}

/// Canonical form of a title for comparisons
pub fn normalize_title(title: &str) -> String {
    let trimmed = title.trim().replace('_', " ");
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
