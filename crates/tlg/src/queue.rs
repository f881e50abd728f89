//! Worker-thread task queue
//!
//! A bounded channel of [`Task`]s feeds a fixed pool of blocking worker
//! threads. Each worker evaluates its task's pipeline against one page and
//! posts the outcome to an unbounded result sink. Closing the queue is
//! the only way to stop the workers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::flaws::{FlawAction, PageContext};
use crate::meta::MetaLookup;
use crate::page::PageRef;
use crate::pipeline::FlawFilters;

/// The pool can no longer make progress
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueFault {
    /// Every worker died while work was outstanding
    #[error("all {lost} workers were lost")]
    AllWorkersLost {
        /// Workers that died
        lost: usize,
    },

    /// Result sink closed while results were still expected
    #[error("result channel closed")]
    ResultChannelClosed,
}

/// One page to evaluate; consumed exactly once by one worker
#[derive(Clone)]
pub struct Task {
    /// Page to evaluate
    pub page: PageRef,
    /// Filters to run
    pub pipeline: Arc<FlawFilters>,
    /// Zero for the first dispatch, incremented on each retry
    pub attempt: u32,
}

impl Task {
    /// First attempt at a page
    pub fn new(page: PageRef, pipeline: Arc<FlawFilters>) -> Self {
        Self {
            page,
            pipeline,
            attempt: 0,
        }
    }

    /// The same page, dispatched again
    pub fn retry(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("page", &self.page)
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// A finished evaluation
#[derive(Debug)]
pub struct Completion {
    /// Worker that ran it
    pub worker: usize,
    /// The task, handed back for retries
    pub task: Task,
    /// Pipeline outcome
    pub action: FlawAction,
    /// Revision evaluated, for flawed pages whose metadata is known
    pub revision: Option<u64>,
}

/// Message on the result sink
#[derive(Debug)]
pub enum WorkerEvent {
    /// A task was evaluated
    Completed(Completion),
    /// A worker died; `page` is what it was evaluating
    Lost {
        /// Worker index
        worker: usize,
        /// Page in flight, if any
        page: Option<PageRef>,
    },
}

/// Error returned when enqueueing on a closed queue
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("task queue closed")]
pub struct QueueClosed;

/// Bounded task queue
pub struct TaskQueue;

impl TaskQueue {
    /// Queue holding at most `capacity` pending tasks
    pub fn bounded(capacity: usize) -> (TaskSender, TaskReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let discard = Arc::new(AtomicBool::new(false));
        (
            TaskSender {
                inner: tx,
                discard: discard.clone(),
            },
            TaskReceiver {
                inner: Arc::new(Mutex::new(rx)),
                discard,
            },
        )
    }
}

/// Producer side of the queue
pub struct TaskSender {
    inner: mpsc::Sender<Task>,
    discard: Arc<AtomicBool>,
}

impl TaskSender {
    /// Enqueue, waiting while the queue is full
    pub async fn send(&self, task: Task) -> Result<(), QueueClosed> {
        self.inner.send(task).await.map_err(|_| QueueClosed)
    }

    /// Wait for a free slot
    pub async fn reserve(&self) -> Result<mpsc::Permit<'_, Task>, QueueClosed> {
        self.inner.reserve().await.map_err(|_| QueueClosed)
    }

    /// Tasks waiting in the queue
    pub fn queued(&self) -> usize {
        self.inner.max_capacity() - self.inner.capacity()
    }

    /// Close the queue; workers finish everything queued, then exit
    pub fn close(self) {
        drop(self);
    }

    /// Close the queue; tasks still queued are dropped unevaluated.
    /// Evaluations already running finish normally.
    pub fn close_and_discard(self) {
        self.discard.store(true, Ordering::SeqCst);
        drop(self);
    }
}

/// Consumer side of the queue, shared by all workers
#[derive(Clone)]
pub struct TaskReceiver {
    inner: Arc<Mutex<mpsc::Receiver<Task>>>,
    discard: Arc<AtomicBool>,
}

impl TaskReceiver {
    /// Block until a task arrives; `None` once closed and drained
    fn next_blocking(&self) -> Option<Task> {
        self.inner.lock().blocking_recv()
    }

    fn discarding(&self) -> bool {
        self.discard.load(Ordering::SeqCst)
    }
}

/// Decrements the live count on exit and reports a dying worker
struct WorkerGuard {
    worker: usize,
    current: Option<PageRef>,
    live: Arc<AtomicUsize>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        // the loss is posted before the live count drops
        if std::thread::panicking() {
            error!(worker = self.worker, page = ?self.current, "worker panicked");
            let _ = self.events.send(WorkerEvent::Lost {
                worker: self.worker,
                page: self.current.take(),
            });
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

fn worker_loop(
    worker: usize,
    tasks: TaskReceiver,
    lookup: MetaLookup,
    events: mpsc::UnboundedSender<WorkerEvent>,
    live: Arc<AtomicUsize>,
) {
    let mut guard = WorkerGuard {
        worker,
        current: None,
        live,
        events: events.clone(),
    };

    while let Some(task) = tasks.next_blocking() {
        if tasks.discarding() {
            debug!(worker, page = %task.page, "discarding queued task");
            continue;
        }

        guard.current = Some(task.page.clone());
        let (action, revision) = {
            let ctx = PageContext::new(&task.page, &lookup);
            let action = task.pipeline.evaluate(&ctx);
            let revision = if action.is_flawed() {
                ctx.meta().ok().map(|meta| meta.latest_revision)
            } else {
                None
            };
            (action, revision)
        };
        guard.current = None;
        debug!(worker, page = %task.page, attempt = task.attempt, flawed = action.is_flawed(), "task done");

        let done = Completion {
            worker,
            task,
            action,
            revision,
        };
        if events.send(WorkerEvent::Completed(done)).is_err() {
            // nobody collects results anymore
            break;
        }
    }
    debug!(worker, "worker exiting");
}

/// Fixed-size pool of blocking workers
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    live: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Start `size` workers pulling from `tasks` and posting to `events`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        size: usize,
        tasks: TaskReceiver,
        lookup: MetaLookup,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        let live = Arc::new(AtomicUsize::new(size));
        let handles = (0..size)
            .map(|worker| {
                let tasks = tasks.clone();
                let lookup = lookup.clone();
                let events = events.clone();
                let live = live.clone();
                tokio::task::spawn_blocking(move || worker_loop(worker, tasks, lookup, events, live))
            })
            .collect();
        Self { handles, live }
    }

    /// Workers still running
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Workers started
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit; returns how many panicked
    pub async fn join(self) -> usize {
        let mut panicked = 0;
        for handle in self.handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    panicked += 1;
                } else {
                    warn!(error = %e, "worker join failed");
                }
            }
        }
        panicked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flaws::{fixtures, AllFilter, FlawFilter};

    struct Panicky;

    impl FlawFilter for Panicky {
        fn name(&self) -> &str {
            "Panicky"
        }

        fn evaluate(&self, _ctx: &PageContext<'_>) -> FlawAction {
            panic!("filter exploded");
        }
    }

    fn pipeline(filter: Arc<dyn FlawFilter>) -> Arc<FlawFilters> {
        Arc::new(FlawFilters::new(vec![filter]).unwrap())
    }

    fn lookup() -> MetaLookup {
        fixtures::lookup((1..=20).map(|id| fixtures::meta(id, 100)).collect())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_every_task_completes_once() {
        let (tx, rx) = TaskQueue::bounded(4);
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let pool = WorkerPool::spawn(3, rx, lookup(), events_tx);
        let all = pipeline(Arc::new(AllFilter));

        for id in 1..=20 {
            tx.send(Task::new(PageRef::article(id, format!("Page {}", id)), all.clone()))
                .await
                .unwrap();
        }
        tx.close();

        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                WorkerEvent::Completed(done) => {
                    assert!(done.action.is_flawed());
                    seen.push(done.task.page.id().get());
                }
                WorkerEvent::Lost { .. } => panic!("no worker should die"),
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=20).collect::<Vec<_>>());
        assert_eq!(pool.join().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_discard_drops_queued_tasks() {
        let (tx, rx) = TaskQueue::bounded(16);
        let all = pipeline(Arc::new(AllFilter));
        for id in 1..=10 {
            tx.send(Task::new(PageRef::article(id, "P"), all.clone()))
                .await
                .unwrap();
        }
        assert_eq!(tx.queued(), 10);
        tx.close_and_discard();

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let pool = WorkerPool::spawn(2, rx, lookup(), events_tx);
        assert!(events.recv().await.is_none());
        assert_eq!(pool.join().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_filter_reports_lost_workers() {
        let (tx, rx) = TaskQueue::bounded(8);
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let pool = WorkerPool::spawn(2, rx, lookup(), events_tx);
        let boom = pipeline(Arc::new(Panicky));

        for id in 1..=2 {
            tx.send(Task::new(PageRef::article(id, "P"), boom.clone()))
                .await
                .unwrap();
        }

        let mut lost = 0;
        while lost < 2 {
            match events.recv().await {
                Some(WorkerEvent::Lost { page, .. }) => {
                    assert!(page.is_some());
                    lost += 1;
                }
                Some(WorkerEvent::Completed(_)) => panic!("panicking filter cannot complete"),
                None => break,
            }
        }
        assert_eq!(lost, 2);
        assert_eq!(pool.join().await, 2);
        assert!(tx.send(Task::new(PageRef::article(3, "P"), boom)).await.is_err());
    }
}
