//! Task list generator: one run from query to sealed result
//!
//! `Idle → Resolving → Dispatching ⇄ Collecting → Completed | Truncated | Aborted`
//!
//! The coordinator streams pages from the category graph into the bounded
//! task queue while draining worker results, so neither the page list nor
//! the pending results are ever fully materialized.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashSet;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::catgraph::{CategoryGraph, GraphError, GraphResolver, PageStream, Query};
use crate::flaws::{FilterConfig, FilterResources, FlawAction};
use crate::meta::MetaLookup;
use crate::page::PageId;
use crate::pipeline::FlawFilters;
use crate::queue::{QueueFault, Task, TaskQueue, WorkerEvent, WorkerPool};
use crate::result::{FlawedPage, ResultBuilder, RunMetadata, TlgResult};

fn default_depth() -> u32 {
    3
}

fn default_max_results() -> usize {
    1_000
}

/// What to generate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Category query string, e.g. `"Physics; -Biographies"`
    pub query: String,
    /// Subcategory depth
    #[serde(default = "default_depth")]
    pub depth: u32,
    /// Filters, all of which must flag a page
    pub filters: Vec<FilterConfig>,
    /// Result-set bound
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Wall-clock budget for the whole run
    #[serde(default)]
    pub time_budget: Option<Duration>,
    /// How often a deferred page is dispatched again
    #[serde(default)]
    pub deferred_retries: u32,
    /// Keep flaws marked as done (flagged `done`) instead of dropping them
    #[serde(default)]
    pub include_done: bool,
}

impl RunRequest {
    /// Request with default depth and bound
    pub fn new(query: impl Into<String>, filters: Vec<FilterConfig>) -> Self {
        Self {
            query: query.into(),
            depth: default_depth(),
            filters,
            max_results: default_max_results(),
            time_budget: None,
            deferred_retries: 0,
            include_done: false,
        }
    }

    /// Set the subcategory depth
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Set the result-set bound
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Set the time budget
    pub fn with_time_budget(mut self, budget: Option<Duration>) -> Self {
        self.time_budget = budget;
        self
    }

    /// Set the deferred retry count
    pub fn with_deferred_retries(mut self, retries: u32) -> Self {
        self.deferred_retries = retries;
        self
    }

    /// Keep or drop flaws marked as done
    pub fn with_include_done(mut self, include: bool) -> Self {
        self.include_done = include;
        self
    }
}

/// Generator tuning
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorSettings {
    /// Worker threads per run
    pub workers: usize,
    /// Pending tasks before the producer waits
    pub queue_capacity: usize,
    /// Upper bound on pages taken from the graph
    pub max_members: usize,
    /// How long the collector waits for results before re-checking
    pub poll_interval: Duration,
    /// Limit on each graph call
    pub graph_timeout: Duration,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 256,
            max_members: 100_000,
            poll_interval: Duration::from_millis(250),
            graph_timeout: Duration::from_secs(30),
        }
    }
}

/// Run lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Not started
    Idle,
    /// Querying the category graph
    Resolving,
    /// Feeding the queue
    Dispatching,
    /// Only draining results
    Collecting,
    /// Every page evaluated
    Completed,
    /// Stopped at the result bound or the time budget
    Truncated,
    /// Could not run
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Resolving => "resolving",
            RunState::Dispatching => "dispatching",
            RunState::Collecting => "collecting",
            RunState::Completed => "completed",
            RunState::Truncated => "truncated",
            RunState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Why a run stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationReason {
    /// The result-set bound was reached
    ResultLimit,
    /// The time budget ran out
    TimedOut,
}

/// Fatal run failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunError {
    /// Request rejected before anything ran
    #[error("input validation failed: {0}")]
    InvalidRequest(String),

    /// Category graph failed
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Worker pool failed
    #[error(transparent)]
    Queue(#[from] QueueFault),
}

/// Terminal status of a run
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Every page evaluated within the bound
    Completed,
    /// Stopped early; the result is partial
    Truncated(TruncationReason),
    /// Could not run or could not finish
    Aborted(RunError),
}

impl RunStatus {
    /// Terminal state this status corresponds to
    pub fn state(&self) -> RunState {
        match self {
            RunStatus::Completed => RunState::Completed,
            RunStatus::Truncated(_) => RunState::Truncated,
            RunStatus::Aborted(_) => RunState::Aborted,
        }
    }

    /// Whether the run aborted
    pub fn is_aborted(&self) -> bool {
        matches!(self, RunStatus::Aborted(_))
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => f.write_str("completed"),
            RunStatus::Truncated(TruncationReason::ResultLimit) => f.write_str("truncated"),
            RunStatus::Truncated(TruncationReason::TimedOut) => f.write_str("timed out"),
            RunStatus::Aborted(e) => write!(f, "aborted: {}", e),
        }
    }
}

/// Status plus the sealed, possibly partial, result
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// How the run ended
    pub status: RunStatus,
    /// What it found
    pub result: TlgResult,
}

/// Progress notifications for streaming consumers
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Human-readable status line
    Status(String),
    /// Tasks finished out of tasks dispatched so far
    Progress {
        /// Finished tasks
        done: usize,
        /// Dispatched tasks
        total: usize,
    },
    /// A page was appended to the result
    Entry(FlawedPage),
    /// The run ended
    Finished {
        /// Terminal status
        status: RunStatus,
        /// Final counters
        meta: RunMetadata,
    },
}

/// Runs category queries through the flaw filters.
///
/// One generator serves any number of runs; each run gets its own queue
/// and worker pool. The metadata cache and the filter resources are
/// shared across runs.
pub struct TaskListGenerator {
    graph: Arc<dyn CategoryGraph>,
    lookup: MetaLookup,
    resources: FilterResources,
    settings: GeneratorSettings,
}

impl TaskListGenerator {
    /// Generator over a graph and a metadata lookup
    pub fn new(
        graph: Arc<dyn CategoryGraph>,
        lookup: MetaLookup,
        resources: FilterResources,
        settings: GeneratorSettings,
    ) -> Self {
        Self {
            graph,
            lookup,
            resources,
            settings,
        }
    }

    /// Settings in use
    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    /// The metadata lookup (and its cache)
    pub fn lookup(&self) -> &MetaLookup {
        &self.lookup
    }

    /// Run to completion
    pub async fn run(&self, request: &RunRequest) -> RunOutcome {
        self.run_with_events(request, None).await
    }

    /// Run to completion, reporting progress on `events`
    pub async fn run_with_events(
        &self,
        request: &RunRequest,
        events: Option<mpsc::UnboundedSender<RunEvent>>,
    ) -> RunOutcome {
        let mut run = Run::new(self, request, events);
        let status = run.execute().await;
        run.finish(status)
    }
}

/// State of one run
struct Run<'a> {
    generator: &'a TaskListGenerator,
    request: &'a RunRequest,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
    state: RunState,
    started: Instant,
    deadline: Option<Instant>,
    stats_before: tlgcache::StatsSnapshot,
    builder: ResultBuilder,
    meta: RunMetadata,
    completed: usize,
    reported: usize,
    overflow: bool,
}

impl<'a> Run<'a> {
    fn new(
        generator: &'a TaskListGenerator,
        request: &'a RunRequest,
        events: Option<mpsc::UnboundedSender<RunEvent>>,
    ) -> Self {
        let started = Instant::now();
        Self {
            generator,
            request,
            events,
            state: RunState::Idle,
            started,
            deadline: request.time_budget.map(|budget| started + budget),
            stats_before: generator.lookup.cache().stats(),
            builder: ResultBuilder::new(request.max_results),
            meta: RunMetadata::default(),
            completed: 0,
            reported: 0,
            overflow: false,
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn status(&self, message: String) {
        self.emit(RunEvent::Status(message));
    }

    fn transition(&mut self, next: RunState) {
        if self.state != next {
            info!(from = %self.state, to = %next, query = %self.request.query, "run state");
            self.state = next;
        }
    }

    fn validate(&self) -> Result<(Query, Arc<FlawFilters>), RunError> {
        let settings = &self.generator.settings;
        if settings.workers == 0 {
            return Err(RunError::InvalidRequest("worker count must be positive".into()));
        }
        if self.request.max_results == 0 {
            return Err(RunError::InvalidRequest("max results must be positive".into()));
        }
        let query =
            Query::parse(&self.request.query).map_err(|e| RunError::InvalidRequest(e.to_string()))?;
        let pipeline = FlawFilters::from_configs(&self.request.filters, &self.generator.resources)
            .ok_or_else(|| RunError::InvalidRequest("no flaw filters given".into()))?;
        Ok((query, Arc::new(pipeline)))
    }

    async fn execute(&mut self) -> RunStatus {
        let (query, pipeline) = match self.validate() {
            Ok(parts) => parts,
            Err(e) => return RunStatus::Aborted(e),
        };

        self.transition(RunState::Resolving);
        self.status(format!(
            "evaluating query string '{}' with depth {}",
            self.request.query, self.request.depth
        ));
        let settings = &self.generator.settings;
        let resolver = GraphResolver::new(
            self.generator.graph.clone(),
            settings.graph_timeout,
            settings.max_members,
        );
        let resolved = match self.deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline, resolver.resolve(&query, self.request.depth))
                    .await
                {
                    Ok(resolved) => resolved,
                    Err(_) => return RunStatus::Truncated(TruncationReason::TimedOut),
                }
            }
            None => resolver.resolve(&query, self.request.depth).await,
        };
        let pages = match resolved {
            Ok(pages) => pages,
            Err(e) => return RunStatus::Aborted(e.into()),
        };

        self.transition(RunState::Dispatching);
        self.pump(pages, pipeline).await
    }

    /// Interleaved dispatch and collection
    async fn pump(&mut self, mut pages: PageStream, pipeline: Arc<FlawFilters>) -> RunStatus {
        let settings = self.generator.settings.clone();
        let (tasks, receiver) = TaskQueue::bounded(settings.queue_capacity);
        let (results_tx, mut results) = mpsc::unbounded_channel();
        let pool = WorkerPool::spawn(
            settings.workers,
            receiver,
            self.generator.lookup.clone(),
            results_tx,
        );

        let mut seen: AHashSet<PageId> = AHashSet::new();
        let mut retries: VecDeque<Task> = VecDeque::new();
        let mut staged: Option<Task> = None;
        let mut graph_done = false;
        let mut outstanding = 0usize;

        let status = loop {
            if self.overflow {
                break RunStatus::Truncated(TruncationReason::ResultLimit);
            }
            let full = self.builder.is_full();
            let pending = staged.is_some() || !retries.is_empty();
            if outstanding == 0 {
                if !pending && graph_done {
                    break RunStatus::Completed;
                }
                if full && pending {
                    debug!(retries = retries.len(), "result bound reached with pages left");
                    break RunStatus::Truncated(TruncationReason::ResultLimit);
                }
            }
            if pool.live_workers() == 0 && (outstanding > 0 || !full) {
                // results posted before the last worker died still count
                if self.drain(&mut results, &mut outstanding, &mut retries) > 0 {
                    continue;
                }
                break RunStatus::Aborted(self.workers_lost().into());
            }
            if full || (graph_done && !pending) {
                self.transition(RunState::Collecting);
            }
            if staged.is_none() {
                staged = retries.pop_front();
            }

            let has_task = staged.is_some();
            let deadline = self.deadline.unwrap_or(self.started);
            tokio::select! {
                biased;

                _ = tokio::time::sleep_until(deadline), if self.deadline.is_some() => {
                    break RunStatus::Truncated(TruncationReason::TimedOut);
                }

                event = results.recv() => match event {
                    Some(event) => {
                        if let Some(retry) = self.on_event(event, &mut outstanding) {
                            retries.push_back(retry);
                        }
                    }
                    // every sender is gone, so any loss reports were already received
                    None if self.meta.workers_lost > 0 || pool.live_workers() == 0 => {
                        break RunStatus::Aborted(self.workers_lost().into())
                    }
                    None => break RunStatus::Aborted(QueueFault::ResultChannelClosed.into()),
                },

                // nothing new is dispatched once the bound is reached
                permit = tasks.reserve(), if has_task && !full => match (permit, staged.take()) {
                    (Ok(permit), Some(task)) => {
                        if task.attempt == 0 {
                            self.meta.pages_scanned += 1;
                        }
                        permit.send(task);
                        outstanding += 1;
                        self.meta.tasks_dispatched += 1;
                    }
                    (Ok(_), None) => {}
                    (Err(_), _) => {
                        self.drain(&mut results, &mut outstanding, &mut retries);
                        break RunStatus::Aborted(self.workers_lost().into());
                    }
                },

                // at most one page is read ahead of the dispatcher
                next = pages.next(), if !has_task && !graph_done => match next {
                    Some(Ok(page)) => {
                        if seen.insert(page.id()) {
                            staged = Some(Task::new(page, pipeline.clone()));
                        } else {
                            debug!(page = %page, "duplicate page skipped");
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "category graph failed mid-stream");
                        break RunStatus::Aborted(e.into());
                    }
                    None => {
                        graph_done = true;
                        self.status(format!("query found {} results", seen.len()));
                    }
                },

                _ = tokio::time::sleep(settings.poll_interval) => {
                    self.report_progress();
                }
            }
        };

        self.report_progress();
        match &status {
            RunStatus::Completed => tasks.close(),
            _ => tasks.close_and_discard(),
        }
        drop(results);

        if status == RunStatus::Truncated(TruncationReason::TimedOut) {
            // in-flight evaluations finish on their own
            debug!(in_flight = outstanding, "not waiting for workers after timeout");
        } else {
            let panicked = pool.join().await;
            if panicked > 0 {
                debug!(panicked, "workers panicked during the run");
            }
        }
        status
    }

    /// Take every event already posted; returns how many there were
    fn drain(
        &mut self,
        results: &mut mpsc::UnboundedReceiver<WorkerEvent>,
        outstanding: &mut usize,
        retries: &mut VecDeque<Task>,
    ) -> usize {
        let mut drained = 0;
        while let Ok(event) = results.try_recv() {
            drained += 1;
            if let Some(retry) = self.on_event(event, outstanding) {
                retries.push_back(retry);
            }
        }
        drained
    }

    fn workers_lost(&self) -> QueueFault {
        QueueFault::AllWorkersLost {
            lost: self.meta.workers_lost,
        }
    }

    /// Account for one worker event; returns a task to retry
    fn on_event(&mut self, event: WorkerEvent, outstanding: &mut usize) -> Option<Task> {
        match event {
            WorkerEvent::Completed(done) => {
                *outstanding = outstanding.saturating_sub(1);
                self.completed += 1;
                self.collect(done.task, done.action, done.revision)
            }
            WorkerEvent::Lost { worker, page } => {
                self.meta.workers_lost += 1;
                if let Some(page) = page {
                    warn!(worker, page = %page, "page lost with its worker");
                    *outstanding = outstanding.saturating_sub(1);
                    self.completed += 1;
                    self.meta.skipped_errors += 1;
                }
                None
            }
        }
    }

    /// Fold one outcome into the result; returns a task to retry
    fn collect(&mut self, task: Task, action: FlawAction, revision: Option<u64>) -> Option<Task> {
        match action {
            FlawAction::Flawed(mut evidence) => {
                if let Some(revision) = revision {
                    let marks = &self.generator.resources.done;
                    for note in &mut evidence.notes {
                        note.done = marks.is_done(&note.filter, revision);
                    }
                    if !self.request.include_done {
                        evidence.notes.retain(|note| !note.done);
                    }
                    if evidence.notes.is_empty() {
                        debug!(page = %task.page, revision, "every flaw marked done");
                        self.meta.skipped_done += 1;
                        return None;
                    }
                }
                let entry = FlawedPage {
                    page: task.page,
                    evidence,
                    revision,
                };
                match self.builder.push(entry.clone()) {
                    Ok(()) => self.emit(RunEvent::Entry(entry)),
                    Err(rejected) => {
                        debug!(page = %rejected.page, "result bound exceeded");
                        self.overflow = true;
                    }
                }
                None
            }
            FlawAction::NotFlawed => None,
            FlawAction::Deferred(reason) => {
                if task.attempt < self.request.deferred_retries {
                    debug!(page = %task.page, attempt = task.attempt, reason = %reason, "retrying deferred page");
                    Some(task.retry())
                } else {
                    debug!(page = %task.page, reason = %reason, "page deferred, giving up");
                    self.meta.skipped_deferred += 1;
                    None
                }
            }
            FlawAction::Error(cause) => {
                debug!(page = %task.page, cause = %cause, "filter error, page skipped");
                self.meta.skipped_errors += 1;
                None
            }
        }
    }

    fn report_progress(&mut self) {
        if self.completed != self.reported {
            self.reported = self.completed;
            self.emit(RunEvent::Progress {
                done: self.completed,
                total: self.meta.tasks_dispatched,
            });
        }
    }

    fn finish(mut self, status: RunStatus) -> RunOutcome {
        self.transition(status.state());

        if matches!(status, RunStatus::Aborted(RunError::Graph(_))) {
            // a graph failure never leaves partial entries
            self.builder.clear();
        }

        let mut meta = std::mem::take(&mut self.meta);
        meta.truncated = matches!(status, RunStatus::Truncated(_));
        meta.timed_out = status == RunStatus::Truncated(TruncationReason::TimedOut);
        meta.cache_hit_ratio = self
            .generator
            .lookup
            .cache()
            .stats()
            .since(&self.stats_before)
            .hit_ratio();
        meta.elapsed_ms = self.started.elapsed().as_millis() as u64;

        match &status {
            RunStatus::Aborted(e) => error!(error = %e, "run aborted"),
            _ => info!(
                status = %status,
                pages = meta.pages_scanned,
                flawed = self.builder.len(),
                errors = meta.skipped_errors,
                done = meta.skipped_done,
                elapsed_ms = meta.elapsed_ms,
                "run finished"
            ),
        }

        let builder = std::mem::replace(&mut self.builder, ResultBuilder::new(0));
        let result = builder.seal(meta);
        self.emit(RunEvent::Finished {
            status: status.clone(),
            meta: result.meta().clone(),
        });
        RunOutcome { status, result }
    }
}
