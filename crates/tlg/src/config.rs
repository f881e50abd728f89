//! Configuration file
//!
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! [run]
//! category = "Physics-stub-articles"
//! flaws = "SizeBelow:500 NoImages"
//! max_results = 500
//!
//! [cache]
//! backend = "disk"
//! dir = "/var/cache/tlg"
//! ttl_secs = 86400
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tlgcache::{BackendKind, CacheConfig, DEFAULT_HISTORY_LEN};

use crate::flaws::FilterConfig;
use crate::generator::{GeneratorSettings, RunRequest};

/// Namespace of the page metadata cache
pub const META_NAMESPACE: &str = "meta";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File that was read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Run parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSection {
    /// Category query string
    pub category: String,
    /// Subcategory depth
    pub depth: u32,
    /// Filter specs, space or comma separated
    pub flaws: String,
    /// Result-set bound
    pub max_results: usize,
    /// Time budget in seconds
    pub time_budget_secs: Option<u64>,
    /// Re-dispatches of a deferred page
    pub deferred_retries: u32,
    /// Report flaws marked as done instead of dropping them
    pub include_done: bool,
    /// Worker threads
    pub workers: usize,
    /// Task queue capacity
    pub queue_capacity: usize,
    /// Upper bound on pages taken from the graph
    pub max_members: usize,
    /// Collector wake-up interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for RunSection {
    fn default() -> Self {
        let settings = GeneratorSettings::default();
        Self {
            category: String::new(),
            depth: 3,
            flaws: String::new(),
            max_results: 1_000,
            time_budget_secs: None,
            deferred_retries: 1,
            include_done: false,
            workers: settings.workers,
            queue_capacity: settings.queue_capacity,
            max_members: settings.max_members,
            poll_interval_ms: settings.poll_interval.as_millis() as u64,
        }
    }
}

/// Cache backend
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSection {
    /// disk, memory or noop
    pub backend: BackendKind,
    /// Directory of the durable tier
    pub dir: PathBuf,
    /// Memory tier entries per cache
    pub capacity: usize,
    /// Entry lifetime in seconds
    pub ttl_secs: Option<u64>,
    /// Baseline snapshots kept per title
    pub history_len: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::Disk,
            dir: PathBuf::from("tlg-cache"),
            capacity: 10_000,
            ttl_secs: None,
            history_len: DEFAULT_HISTORY_LEN,
        }
    }
}

/// Category graph source
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphSection {
    /// JSON dump of the category tree
    pub path: Option<PathBuf>,
    /// Limit on every graph call, in seconds
    pub timeout_secs: u64,
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            path: None,
            timeout_secs: GeneratorSettings::default().graph_timeout.as_secs(),
        }
    }
}

/// Page metadata source
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PagesSection {
    /// JSON array of page records
    pub path: Option<PathBuf>,
}

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// `[run]`
    pub run: RunSection,
    /// `[cache]`
    pub cache: CacheSection,
    /// `[graph]`
    pub graph: GraphSection,
    /// `[pages]`
    pub pages: PagesSection,
}

impl Config {
    /// Read and validate a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Reject values no run can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.run.workers, "run.workers"),
            (self.run.queue_capacity, "run.queue_capacity"),
            (self.run.max_results, "run.max_results"),
            (self.run.max_members, "run.max_members"),
            (self.cache.capacity, "cache.capacity"),
        ];
        for (value, field) in checks {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be > 0", field)));
            }
        }
        if self.graph.timeout_secs == 0 {
            return Err(ConfigError::Invalid("graph.timeout_secs must be > 0".into()));
        }
        if !self.run.flaws.trim().is_empty() {
            self.filters()?;
        }
        Ok(())
    }

    /// Parsed `run.flaws`
    pub fn filters(&self) -> Result<Vec<FilterConfig>, ConfigError> {
        FilterConfig::parse_list(&self.run.flaws).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// The run described by `[run]`
    pub fn run_request(&self) -> Result<RunRequest, ConfigError> {
        Ok(RunRequest::new(self.run.category.clone(), self.filters()?)
            .with_depth(self.run.depth)
            .with_max_results(self.run.max_results)
            .with_time_budget(self.run.time_budget_secs.map(Duration::from_secs))
            .with_deferred_retries(self.run.deferred_retries)
            .with_include_done(self.run.include_done))
    }

    /// Generator tuning from `[run]` and `[graph]`
    pub fn settings(&self) -> GeneratorSettings {
        GeneratorSettings {
            workers: self.run.workers,
            queue_capacity: self.run.queue_capacity,
            max_members: self.run.max_members,
            poll_interval: Duration::from_millis(self.run.poll_interval_ms.max(1)),
            graph_timeout: Duration::from_secs(self.graph.timeout_secs),
        }
    }

    /// Cache settings for one namespace
    pub fn cache_config(&self, namespace: &str) -> CacheConfig {
        CacheConfig::new(namespace)
            .with_capacity(self.cache.capacity)
            .with_ttl(self.cache.ttl_secs.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_is_default() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.settings(), GeneratorSettings::default());
    }

    #[test]
    fn test_full_file() {
        let config = Config::parse(
            r#"
            [run]
            category = "Physics; -Biographies"
            depth = 2
            flaws = "SizeBelow:500, NoImages"
            max_results = 50
            time_budget_secs = 120
            include_done = true
            workers = 4

            [cache]
            backend = "memory"
            capacity = 64
            ttl_secs = 3600

            [graph]
            path = "graph.json"
            timeout_secs = 5

            [pages]
            path = "pages.json"
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        let request = config.run_request().unwrap();
        assert_eq!(request.query, "Physics; -Biographies");
        assert_eq!(request.depth, 2);
        assert_eq!(request.filters.len(), 2);
        assert_eq!(request.max_results, 50);
        assert_eq!(request.time_budget, Some(Duration::from_secs(120)));
        assert!(request.include_done);

        assert_eq!(config.cache.backend, BackendKind::Memory);
        assert_eq!(config.settings().workers, 4);
        assert_eq!(config.settings().graph_timeout, Duration::from_secs(5));
        assert_eq!(config.pages.path, Some(PathBuf::from("pages.json")));
    }

    #[test]
    fn test_zero_values_rejected() {
        for toml in [
            "[run]\nworkers = 0",
            "[run]\nqueue_capacity = 0",
            "[run]\nmax_results = 0",
            "[cache]\ncapacity = 0",
        ] {
            let config = Config::parse(toml).unwrap();
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "{} should be rejected",
                toml
            );
        }
    }

    #[test]
    fn test_bad_filter_spec_rejected() {
        let config = Config::parse("[run]\nflaws = \"Bogus\"").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            Config::parse("[run]\nthreads = 4"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[run]\ncategory = \"Physics\"\nflaws = \"Large\"").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.run.category, "Physics");

        let missing = Config::load("/nonexistent/tlg.toml");
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
