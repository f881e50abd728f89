use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tlg::{
    pump, Config, FilterResources, MetaLookup, NdjsonWriter, RunStatus, StaticGraph,
    StaticMetaSource, TaskListGenerator, META_NAMESPACE,
};
use tlgcache::CacheFactory;

fn crate_dir() -> &'static Path {
    Path::new(env!("CARGO_MANIFEST_DIR"))
}

fn fixture(name: &str) -> PathBuf {
    crate_dir().join("fixtures").join(name)
}

fn generator_from(config: &Config) -> TaskListGenerator {
    let graph = StaticGraph::load(crate_dir().join(config.graph.path.as_ref().unwrap())).unwrap();
    let pages = StaticMetaSource::load(crate_dir().join(config.pages.path.as_ref().unwrap())).unwrap();
    let factory = CacheFactory::memory();
    let lookup = MetaLookup::new(
        factory.build(config.cache_config(META_NAMESPACE)),
        Arc::new(pages),
    );
    TaskListGenerator::new(
        Arc::new(graph),
        lookup,
        FilterResources::from_factory(&factory),
        config.settings(),
    )
}

fn titles(outcome: &tlg::RunOutcome) -> Vec<String> {
    outcome
        .result
        .sorted_by_page()
        .iter()
        .map(|e| e.page.title().to_string())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sample_config_run() {
    let config = Config::load(fixture("tlg.toml")).unwrap();
    let generator = generator_from(&config);

    let outcome = generator.run(&config.run_request().unwrap()).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(titles(&outcome), vec!["Muon", "Axion", "Qubit"]);
    // Muon sits in both categories
    assert_eq!(outcome.result.meta().pages_scanned, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_depth_and_filters_from_dump() {
    let mut config = Config::load(fixture("tlg.toml")).unwrap();
    config.run.depth = 0;
    let generator = generator_from(&config);
    let outcome = generator.run(&config.run_request().unwrap()).await;
    assert_eq!(titles(&outcome), vec!["Muon", "Axion"]);

    config.run.depth = 1;
    config.run.flaws = "MissingSources".into();
    let outcome = generator.run(&config.run_request().unwrap()).await;
    assert_eq!(titles(&outcome), vec!["Axion", "Qubit"]);

    config.run.flaws = "Large:2000".into();
    let outcome = generator.run(&config.run_request().unwrap()).await;
    assert_eq!(titles(&outcome), vec!["Laser cooling"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ndjson_stream_of_a_run() {
    let config = Config::load(fixture("tlg.toml")).unwrap();
    let generator = generator_from(&config);
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    let writer = tokio::spawn(async move {
        let mut writer = NdjsonWriter::new(Vec::new());
        let status = pump(rx, &mut writer).await.unwrap();
        (status, writer.into_inner())
    });
    let outcome = generator
        .run_with_events(&config.run_request().unwrap(), Some(tx))
        .await;
    let (status, bytes) = writer.await.unwrap();

    assert_eq!(status, Some(outcome.status.clone()));
    let lines: Vec<Value> = String::from_utf8(bytes)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert!(lines[0]["status"].is_string());
    let pages: Vec<&Value> = lines.iter().filter(|l| l.get("page").is_some()).collect();
    assert_eq!(pages.len(), 3);
    for page in pages {
        let names: Vec<&str> = page["flaws"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Small", "NoImages"]);
    }

    let last = lines.last().unwrap();
    assert_eq!(last["finished"]["status"], "completed");
    assert_eq!(last["finished"]["meta"]["flawed"], 3);
}
