//! Run results

use serde::Serialize;

use crate::flaws::Evidence;
use crate::page::PageRef;

/// A page that every filter flagged
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlawedPage {
    /// The page
    pub page: PageRef,
    /// What the filters found
    pub evidence: Evidence,
    /// Revision the page was evaluated at, when its metadata was loaded
    pub revision: Option<u64>,
}

impl FlawedPage {
    fn presentation_key(&self) -> (std::cmp::Reverse<usize>, Vec<&str>, Vec<i64>, &str) {
        let mut sort_keys: Vec<i64> = self.evidence.notes.iter().map(|n| n.sort_key).collect();
        sort_keys.sort_unstable();
        (
            std::cmp::Reverse(self.evidence.notes.len()),
            self.evidence.filter_names(),
            sort_keys,
            self.page.title(),
        )
    }
}

/// Counters describing a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunMetadata {
    /// Distinct pages from the category query sent for evaluation
    pub pages_scanned: usize,
    /// Entries in the result
    pub flawed: usize,
    /// Pages skipped because a filter failed
    pub skipped_errors: usize,
    /// Pages still deferred after the last retry
    pub skipped_deferred: usize,
    /// Flawed pages left out because every flaw was marked done
    pub skipped_done: usize,
    /// Tasks sent to workers, retries included
    pub tasks_dispatched: usize,
    /// Workers that died during the run
    pub workers_lost: usize,
    /// The result stopped short of the full answer
    pub truncated: bool,
    /// The run ran out of time
    pub timed_out: bool,
    /// Page metadata cache hit ratio over this run
    pub cache_hit_ratio: f64,
    /// Wall-clock duration
    pub elapsed_ms: u64,
}

/// Append-only result under construction
#[derive(Debug)]
pub struct ResultBuilder {
    entries: Vec<FlawedPage>,
    max_results: usize,
}

impl ResultBuilder {
    /// Builder accepting at most `max_results` entries
    pub fn new(max_results: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_results,
        }
    }

    /// Append an entry; hands it back once the bound is reached
    pub fn push(&mut self, entry: FlawedPage) -> Result<(), FlawedPage> {
        if self.is_full() {
            return Err(entry);
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Whether the bound has been reached
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_results
    }

    /// Entries so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing has been appended
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries so far, in collection order
    pub fn entries(&self) -> &[FlawedPage] {
        &self.entries
    }

    /// Drop everything collected
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Freeze the result
    pub fn seal(self, mut meta: RunMetadata) -> TlgResult {
        meta.flawed = self.entries.len();
        TlgResult {
            entries: self.entries,
            meta,
        }
    }
}

/// Sealed outcome of a run, in collection order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TlgResult {
    entries: Vec<FlawedPage>,
    meta: RunMetadata,
}

impl TlgResult {
    /// Entries in collection order
    pub fn entries(&self) -> &[FlawedPage] {
        &self.entries
    }

    /// Run counters
    pub fn meta(&self) -> &RunMetadata {
        &self.meta
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no page was flagged
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Presentation order: most flaws first, then flaw names, then
    /// filter sort keys, then title
    pub fn sorted(&self) -> Vec<&FlawedPage> {
        let mut entries: Vec<&FlawedPage> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.presentation_key().cmp(&b.presentation_key()));
        entries
    }

    /// Stable order by page
    pub fn sorted_by_page(&self) -> Vec<&FlawedPage> {
        let mut entries: Vec<&FlawedPage> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.page.cmp(&b.page));
        entries
    }

    /// Consume into entries and counters
    pub fn into_parts(self) -> (Vec<FlawedPage>, RunMetadata) {
        (self.entries, self.meta)
    }
}
