//! Task list generator command line

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tlg::flaws::{catalogue_json, DEFAULT_BASELINE_NAMESPACE};
use tlg::{
    pump, Config, DoneKey, DoneMarks, FilterConfig, FilterResources, MetaLookup, NdjsonWriter,
    StaticGraph, StaticMetaSource, TaskListGenerator, DONE_NAMESPACE, META_NAMESPACE,
};
use tlgcache::{BackendKind, CacheFactory};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Category query, e.g. "Physics; -Biographies"
    #[arg(long)]
    category: Option<String>,

    /// Subcategory depth
    #[arg(short, long)]
    depth: Option<u32>,

    /// Flaw filters, e.g. "SizeBelow:500 NoImages"
    #[arg(short, long)]
    flaws: Option<String>,

    /// Maximum number of results
    #[arg(short, long)]
    max_results: Option<usize>,

    /// Time budget in seconds
    #[arg(long)]
    time_budget: Option<u64>,

    /// Worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Task queue capacity
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Cache backend (disk, memory, noop)
    #[arg(long)]
    cache: Option<BackendKind>,

    /// Cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Category graph dump (JSON)
    #[arg(long)]
    graph: Option<PathBuf>,

    /// Page metadata dump (JSON)
    #[arg(long)]
    pages: Option<PathBuf>,

    /// Report flaws marked as done instead of dropping them
    #[arg(long)]
    include_done: bool,

    /// Mark a flaw as done, e.g. "SizeBelow@1207" (repeatable, then exit)
    #[arg(long, value_name = "FILTER@REV")]
    mark_done: Vec<DoneKey>,

    /// Take back a done mark (repeatable, then exit)
    #[arg(long, value_name = "FILTER@REV")]
    unmark_done: Vec<DoneKey>,

    /// Print the available flaw filters and exit
    #[arg(long)]
    list_flaws: bool,
}

impl Args {
    /// Command line values win over the file
    fn apply(self, config: &mut Config) {
        if let Some(category) = self.category {
            config.run.category = category;
        }
        if let Some(depth) = self.depth {
            config.run.depth = depth;
        }
        if let Some(flaws) = self.flaws {
            config.run.flaws = flaws;
        }
        if let Some(max_results) = self.max_results {
            config.run.max_results = max_results;
        }
        if let Some(secs) = self.time_budget {
            config.run.time_budget_secs = Some(secs);
        }
        if let Some(workers) = self.workers {
            config.run.workers = workers;
        }
        if let Some(capacity) = self.queue_capacity {
            config.run.queue_capacity = capacity;
        }
        if let Some(backend) = self.cache {
            config.cache.backend = backend;
        }
        if let Some(dir) = self.cache_dir {
            config.cache.dir = dir;
        }
        if let Some(graph) = self.graph {
            config.graph.path = Some(graph);
        }
        if let Some(pages) = self.pages {
            config.pages.path = Some(pages);
        }
        if self.include_done {
            config.run.include_done = true;
        }
    }
}

fn open_factory(config: &Config) -> Result<CacheFactory> {
    if config.cache.backend == BackendKind::Disk {
        std::fs::create_dir_all(&config.cache.dir)
            .with_context(|| format!("creating cache dir {}", config.cache.dir.display()))?;
    }
    CacheFactory::open(config.cache.backend, &config.cache.dir)
        .with_context(|| format!("opening cache in {}", config.cache.dir.display()))
}

fn edit_marks(marks: &DoneMarks, mark: &[DoneKey], unmark: &[DoneKey]) -> Result<()> {
    for key in mark {
        marks
            .mark(key.clone(), None)
            .with_context(|| format!("marking {key} as done"))?;
    }
    for key in unmark {
        marks
            .unmark(key)
            .with_context(|| format!("unmarking {key}"))?;
    }
    info!("{} marked, {} unmarked", mark.len(), unmark.len());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the result stream
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut args = Args::parse();

    if args.list_flaws {
        println!("{}", catalogue_json()?);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    let mark = std::mem::take(&mut args.mark_done);
    let unmark = std::mem::take(&mut args.unmark_done);
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    if !mark.is_empty() || !unmark.is_empty() {
        let factory = open_factory(&config)?;
        let marks = DoneMarks::with_config(&factory, config.cache_config(DONE_NAMESPACE));
        return edit_marks(&marks, &mark, &unmark);
    }

    if config.run.category.trim().is_empty() {
        bail!("no category given (use --category or [run] category)");
    }
    let filters: Vec<FilterConfig> = config.filters()?;
    if filters.is_empty() {
        bail!("no flaw filters given (use --flaws or [run] flaws, see --list-flaws)");
    }

    info!("Starting tlg v{}", env!("CARGO_PKG_VERSION"));
    info!("Query: {}", config.run.category);
    info!("Cache backend: {:?}", config.cache.backend);

    let factory = open_factory(&config)?;

    let graph_path = config
        .graph
        .path
        .clone()
        .context("no category graph given (use --graph or [graph] path)")?;
    let graph = StaticGraph::load(&graph_path)
        .with_context(|| format!("loading category graph {}", graph_path.display()))?;

    let pages_path = config
        .pages
        .path
        .clone()
        .context("no page metadata given (use --pages or [pages] path)")?;
    let pages = StaticMetaSource::load(&pages_path)
        .with_context(|| format!("loading page metadata {}", pages_path.display()))?;
    info!("Loaded {} category nodes, {} pages", graph.len(), pages.len());

    let lookup = MetaLookup::new(
        factory.build(config.cache_config(META_NAMESPACE)),
        Arc::new(pages),
    );
    let resources = FilterResources {
        baseline: Arc::new(factory.build_list(
            config.cache_config(DEFAULT_BASELINE_NAMESPACE),
            config.cache.history_len,
        )),
        done: DoneMarks::with_config(&factory, config.cache_config(DONE_NAMESPACE)),
    };
    let generator = TaskListGenerator::new(Arc::new(graph), lookup, resources, config.settings());
    let request = config.run_request()?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(async move {
        let mut writer = NdjsonWriter::new(io::stdout());
        pump(events_rx, &mut writer).await
    });

    let outcome = generator.run_with_events(&request, Some(events_tx)).await;
    writer.await.context("output task failed")??;

    let meta = outcome.result.meta();
    info!(
        "Run {}: {} pages, {} flawed, cache hit ratio {:.2}, {:?}",
        outcome.status,
        meta.pages_scanned,
        meta.flawed,
        meta.cache_hit_ratio,
        Duration::from_millis(meta.elapsed_ms)
    );

    if outcome.status.is_aborted() {
        std::process::exit(2);
    }
    Ok(())
}
