#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tlg::{
    CategoryGraph, FilterConfig, FilterResources, GeneratorSettings, MetaLookup, PageMeta,
    PageMetaSource, PageRef, RunRequest, StaticGraph, StaticMetaSource, TaskListGenerator,
    META_NAMESPACE,
};
use tlgcache::{CacheConfig, CacheFactory};

pub const PHYSICS: &str = "Physics-stub-articles";

/// Lengths of the ten stub articles; four are below 500 bytes
pub const PHYSICS_LENGTHS: [u64; 10] = [120, 800, 450, 3_000, 499, 500, 1_200, 90, 640, 2_048];

pub fn meta(id: u64, title: &str, length: u64) -> PageMeta {
    PageMeta {
        page: PageRef::article(id, title),
        length,
        is_redirect: false,
        image_count: 1,
        templates: Vec::new(),
        touched: DateTime::parse_from_rfc3339("2024-03-10T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc),
        latest_revision: 1_000 + id,
    }
}

pub fn physics_pages() -> Vec<PageMeta> {
    PHYSICS_LENGTHS
        .iter()
        .enumerate()
        .map(|(i, len)| {
            let id = i as u64 + 1;
            meta(id, &format!("Stub {}", id), *len)
        })
        .collect()
}

pub fn physics_graph() -> StaticGraph {
    let pages: Vec<PageRef> = physics_pages().into_iter().map(|m| m.page).collect();
    StaticGraph::new().with_category(PHYSICS, pages, Vec::<String>::new())
}

/// `count` pages with lengths spread over 0..1000
pub fn spread_pages(count: u64) -> Vec<PageMeta> {
    (1..=count)
        .map(|id| meta(id, &format!("Page {}", id), (id * 379) % 1_000))
        .collect()
}

pub fn graph_of(category: &str, pages: &[PageMeta]) -> StaticGraph {
    StaticGraph::new().with_category(
        category,
        pages.iter().map(|m| m.page.clone()).collect(),
        Vec::<String>::new(),
    )
}

pub fn settings(workers: usize, queue_capacity: usize) -> GeneratorSettings {
    GeneratorSettings {
        workers,
        queue_capacity,
        poll_interval: Duration::from_millis(20),
        ..GeneratorSettings::default()
    }
}

pub fn memory_lookup(records: Vec<PageMeta>) -> MetaLookup {
    MetaLookup::new(
        CacheFactory::memory().build(CacheConfig::new(META_NAMESPACE)),
        Arc::new(StaticMetaSource::new(records)),
    )
}

pub fn lookup_over(factory: &CacheFactory, source: Arc<dyn PageMetaSource>) -> MetaLookup {
    MetaLookup::new(factory.build(CacheConfig::new(META_NAMESPACE)), source)
}

pub fn generator(
    graph: impl CategoryGraph + 'static,
    lookup: MetaLookup,
    settings: GeneratorSettings,
) -> TaskListGenerator {
    TaskListGenerator::new(Arc::new(graph), lookup, FilterResources::in_memory(), settings)
}

pub fn request(query: &str, flaws: &str) -> RunRequest {
    RunRequest::new(query, FilterConfig::parse_list(flaws).unwrap())
}
