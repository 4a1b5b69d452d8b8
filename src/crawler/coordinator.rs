//! Job coordinator - wires configuration, clients, and checkpoints together
//!
//! This module contains the entry points used by the binary:
//! - Opening the checkpoint store and building the shared HTTP client
//! - Loading checkpoints (fresh starts, corruption handling, config drift)
//! - Running the scan, expand, and walk jobs
//! - Describing a job without running it (`--dry-run`, `--stats`)

use crate::checkpoint::{
    open_store, Checkpoint, CheckpointStore, CheckpointStoreExt, CheckpointSummary, Keyed,
    StoreError,
};
use crate::client::{build_http_client, GitHubClient, HackerNewsClient, Item, RepoRef};
use crate::config::Config;
use crate::crawler::backoff::{Backoff, RetryPolicy};
use crate::crawler::metrics::{
    plan_units, run_walk, MetricKind, MetricRow, MetricsHarvester, WalkReport,
};
use crate::crawler::predicate::{KeywordPredicate, ScanFilter};
use crate::crawler::scanner::{run_scan, IdScanner, ScanRange, ScanReport};
use crate::crawler::tree::{run_expand, ExpandReport, ExpandedSubject, TreeFetcher, TreeLimits};
use crate::crawler::walker::CursorWalker;
use crate::progress::CrawlProgress;
use crate::{ConfigError, HarvestError};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::fmt;

/// The jobs a harvester can run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Scan an id range for matching items
    Scan,
    /// Expand scanned items into reply trees
    Expand,
    /// Walk historical repository metrics
    Walk,
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Expand => "expand",
            Self::Walk => "walk",
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operator switches for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Move the job's checkpoint aside before starting
    pub fresh: bool,
    /// Replace a corrupt checkpoint with a fresh one instead of aborting
    pub discard_corrupt: bool,
    /// Hide progress bars
    pub quiet: bool,
}

/// Outcome of a completed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobReport {
    Scan(ScanReport),
    Expand(ExpandReport),
    Walk(WalkReport),
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scan(r) => write!(
                f,
                "scan: {} ids examined, {} new matches, {} excluded, {} failed, cursor {}",
                r.examined, r.matched, r.excluded, r.failed, r.cursor
            ),
            Self::Expand(r) => write!(
                f,
                "expand: {} subjects expanded ({} replies), {} already present",
                r.expanded, r.replies, r.skipped
            ),
            Self::Walk(r) => write!(
                f,
                "walk: {} repository-months harvested, {} already present, {} unknown metrics",
                r.harvested, r.skipped, r.unknown
            ),
        }
    }
}

/// Main coordinator structure
pub struct Harvester {
    config: Config,
    config_hash: String,
    options: RunOptions,
    store: Box<dyn CheckpointStore>,
    http: Client,
    backoff: Backoff,
}

impl Harvester {
    /// Creates a harvester using the configured checkpoint backend
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    /// * `config_hash` - Hash of the configuration file, stamped into checkpoints
    /// * `options` - Operator switches
    pub fn new(config: Config, config_hash: String, options: RunOptions) -> Result<Self, HarvestError> {
        let store = open_store(&config.checkpoint).map_err(HarvestError::from_store)?;
        Self::with_store(config, config_hash, options, store)
    }

    /// Creates a harvester over an already opened store
    pub fn with_store(
        config: Config,
        config_hash: String,
        options: RunOptions,
        store: Box<dyn CheckpointStore>,
    ) -> Result<Self, HarvestError> {
        let http = build_http_client(&config.client)?;
        let backoff = Backoff::new(RetryPolicy::from(&config.rate));

        Ok(Self {
            config,
            config_hash,
            options,
            store,
            http,
            backoff,
        })
    }

    pub fn store(&self) -> &dyn CheckpointStore {
        self.store.as_ref()
    }

    /// Checkpoint key of `job`
    pub fn job_key(&self, job: Job) -> Result<&str, HarvestError> {
        let key = match job {
            Job::Scan => self.config.scan.as_ref().map(|s| s.key.as_str()),
            Job::Expand => self.config.expand.as_ref().map(|e| e.key.as_str()),
            Job::Walk => self.config.walk.as_ref().map(|w| w.key.as_str()),
        };
        key.ok_or(HarvestError::JobNotConfigured(job.name()))
    }

    /// Runs `job` to completion
    pub async fn run(&mut self, job: Job) -> Result<JobReport, HarvestError> {
        tracing::info!("Starting {} job", job);
        let report = match job {
            Job::Scan => JobReport::Scan(self.run_scan_job().await?),
            Job::Expand => JobReport::Expand(self.run_expand_job().await?),
            Job::Walk => JobReport::Walk(self.run_walk_job().await?),
        };
        tracing::info!("{}", report);
        Ok(report)
    }

    /// Summary of the stored checkpoint for `job`
    pub fn stats(&self, job: Job) -> Result<Option<CheckpointSummary>, HarvestError> {
        let key = self.job_key(job)?;
        self.store.describe(key).map_err(HarvestError::from_store)
    }

    /// Describes what `job` would do, without any remote calls
    pub fn plan(&self, job: Job) -> Result<String, HarvestError> {
        let key = self.job_key(job)?;
        let resume = match self.store.describe(key) {
            Ok(Some(summary)) => format!("resumes at cursor {} with {} results", summary.cursor, summary.results),
            Ok(None) => "starts fresh".to_string(),
            Err(StoreError::Corrupt { .. }) => "checkpoint is corrupt".to_string(),
            Err(e) => return Err(HarvestError::from_store(e)),
        };

        let plan = match job {
            Job::Scan => {
                let scan = self.config.scan.as_ref().ok_or(HarvestError::JobNotConfigured("scan"))?;
                let range = ScanRange::new(scan.start_id, scan.end_id, scan.stride);
                format!(
                    "scan '{}': ids {}..{} every {} ({} ids), min score {}, {} keywords; {}",
                    key,
                    range.start,
                    range.end,
                    range.stride,
                    range.len(),
                    scan.min_score,
                    scan.keywords.len(),
                    resume
                )
            }
            Job::Expand => {
                let expand = self.config.expand.as_ref().ok_or(HarvestError::JobNotConfigured("expand"))?;
                let subjects = self
                    .store
                    .describe(&expand.source_key)
                    .map_err(HarvestError::from_store)?
                    .map_or(0, |s| s.results);
                format!(
                    "expand '{}': {} subjects from '{}', depth {}, {} children per parent, {} concurrent; {}",
                    key,
                    subjects,
                    expand.source_key,
                    expand.max_depth,
                    expand.max_children,
                    expand.concurrency,
                    resume
                )
            }
            Job::Walk => {
                let walk = self.config.walk.as_ref().ok_or(HarvestError::JobNotConfigured("walk"))?;
                let repos = parse_repositories(&walk.repositories)?;
                let (from, until) = walk.month_range()?;
                let units = plan_units(&repos, from, until);
                let metrics: Vec<&str> = walk.metrics.iter().map(MetricKind::name).collect();
                format!(
                    "walk '{}': {} repositories, {} to {} ({} units), metrics {}; {}",
                    key,
                    repos.len(),
                    walk.from,
                    walk.until,
                    units.len(),
                    metrics.join(", "),
                    resume
                )
            }
        };

        Ok(plan)
    }

    /// Loads a job checkpoint, honouring `--fresh` and `--discard-corrupt`
    fn load_checkpoint<R>(&mut self, key: &str, start: u64) -> Result<Checkpoint<R>, HarvestError>
    where
        R: Keyed + DeserializeOwned,
    {
        if self.options.fresh && self.store.discard(key).map_err(HarvestError::from_store)? {
            tracing::info!("Starting '{}' fresh; previous checkpoint moved aside", key);
        }

        let mut checkpoint = match self.store.load::<R>(key, start) {
            Ok(checkpoint) => checkpoint,
            Err(StoreError::Corrupt { reason, .. }) if self.options.discard_corrupt => {
                tracing::warn!("Discarding corrupt checkpoint '{}': {}", key, reason);
                self.store.discard(key).map_err(HarvestError::from_store)?;
                Checkpoint::new(start)
            }
            Err(e) => {
                let err = HarvestError::from_store(e);
                tracing::error!("{}", err);
                return Err(err);
            }
        };

        if let Some(previous) = checkpoint.config_hash() {
            if previous != self.config_hash {
                tracing::warn!(
                    "Configuration changed since checkpoint '{}' was written; resuming at cursor {}",
                    key,
                    checkpoint.cursor()
                );
            }
        }
        checkpoint.set_config_hash(self.config_hash.clone());

        Ok(checkpoint)
    }

    fn hn_client(&self) -> Result<HackerNewsClient, HarvestError> {
        HackerNewsClient::new(self.http.clone(), &self.config.client.hn_base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid hn_base_url: {}", e)).into())
    }

    async fn run_scan_job(&mut self) -> Result<ScanReport, HarvestError> {
        let scan = self.config.scan.clone().ok_or(HarvestError::JobNotConfigured("scan"))?;
        let range = ScanRange::new(scan.start_id, scan.end_id, scan.stride);
        let filter = ScanFilter::new(scan.min_score, KeywordPredicate::new(&scan.keywords)?);
        let client = self.hn_client()?;

        let mut checkpoint: Checkpoint<Item> = self.load_checkpoint(&scan.key, scan.start_id)?;
        let progress = CrawlProgress::new(
            format!("scan {}", scan.key),
            range.end.saturating_sub(range.start),
            self.options.quiet,
        );

        let mut scanner = IdScanner::new(&client, &self.backoff, range, filter, checkpoint.cursor());
        let report = run_scan(
            self.store.as_mut(),
            &scan.key,
            &mut checkpoint,
            &mut scanner,
            self.config.checkpoint.save_interval,
            &progress,
        )
        .await?;

        progress.finish(format!("scan {}: {} matches", scan.key, checkpoint.len()));
        Ok(report)
    }

    async fn run_expand_job(&mut self) -> Result<ExpandReport, HarvestError> {
        let expand = self.config.expand.clone().ok_or(HarvestError::JobNotConfigured("expand"))?;
        let client = self.hn_client()?;

        let subjects: Vec<Item> = self
            .store
            .load::<Item>(&expand.source_key, 0)
            .map_err(HarvestError::from_store)?
            .into_accumulated();
        if subjects.is_empty() {
            tracing::warn!(
                "Checkpoint '{}' holds no subjects; run the scan job first",
                expand.source_key
            );
        }

        let mut checkpoint: Checkpoint<ExpandedSubject> = self.load_checkpoint(&expand.key, 0)?;
        let progress = CrawlProgress::new(
            format!("expand {}", expand.key),
            subjects.len() as u64,
            self.options.quiet,
        );

        let fetcher = TreeFetcher::new(&client, &self.backoff, expand.concurrency);
        let limits = TreeLimits {
            max_depth: expand.max_depth,
            max_children: expand.max_children,
        };
        let report = run_expand(
            self.store.as_mut(),
            &expand.key,
            &mut checkpoint,
            &fetcher,
            &subjects,
            limits,
            &progress,
        )
        .await?;

        progress.finish(format!("expand {}: {} subjects", expand.key, checkpoint.len()));
        Ok(report)
    }

    async fn run_walk_job(&mut self) -> Result<WalkReport, HarvestError> {
        let walk = self.config.walk.clone().ok_or(HarvestError::JobNotConfigured("walk"))?;
        let repos = parse_repositories(&walk.repositories)?;
        let (from, until) = walk.month_range()?;
        let units = plan_units(&repos, from, until);

        let token = self.config.client.github_token()?;
        let client = GitHubClient::new(self.http.clone(), &self.config.client.github_endpoint, Some(token))
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid github_endpoint: {}", e)))?;

        let mut checkpoint: Checkpoint<MetricRow> = self.load_checkpoint(&walk.key, 0)?;
        let progress = CrawlProgress::new(
            format!("walk {}", walk.key),
            units.len() as u64,
            self.options.quiet,
        );

        let mut harvester = MetricsHarvester::new(
            CursorWalker::new(&client, &self.backoff),
            walk.metrics.clone(),
            walk.page_size,
        );
        let report = run_walk(
            self.store.as_mut(),
            &walk.key,
            &mut checkpoint,
            &mut harvester,
            &units,
            &progress,
        )
        .await?;

        progress.finish(format!("walk {}: {} rows", walk.key, checkpoint.len()));
        Ok(report)
    }
}

fn parse_repositories(repositories: &[String]) -> Result<Vec<RepoRef>, HarvestError> {
    repositories
        .iter()
        .map(|r| RepoRef::parse(r).map_err(HarvestError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryStore;

    fn create_test_config() -> Config {
        toml::from_str(
            r#"
[client]
crawler-name = "TestCrawler"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"
hn-base-url = "http://127.0.0.1:9/v0"

[scan]
start-id = 1
end-id = 101
stride = 10
keywords = ["rust"]

[expand]
max-depth = 2

[walk]
repositories = ["octo/hello", "https://github.com/octo/world"]
from = "2023-01"
until = "2023-03"
metrics = ["stars", "commits"]
"#,
        )
        .unwrap()
    }

    fn harvester_with(store: MemoryStore, options: RunOptions) -> Harvester {
        Harvester::with_store(create_test_config(), "hash-1".to_string(), options, Box::new(store))
            .unwrap()
    }

    #[test]
    fn test_load_missing_checkpoint_stamps_hash() {
        let mut harvester = harvester_with(MemoryStore::new(), RunOptions::default());
        let checkpoint: Checkpoint<Item> = harvester.load_checkpoint("scan", 1).unwrap();
        assert_eq!(checkpoint.cursor(), 1);
        assert_eq!(checkpoint.config_hash(), Some("hash-1"));
    }

    #[test]
    fn test_corrupt_checkpoint_aborts() {
        let mut store = MemoryStore::new();
        store.insert_raw("scan", "{ not json");
        let mut harvester = harvester_with(store, RunOptions::default());

        let err = harvester.load_checkpoint::<Item>("scan", 1).unwrap_err();
        assert!(matches!(err, HarvestError::CheckpointCorruption { ref key, .. } if key == "scan"));
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_aborts_run_before_fetching() {
        let mut store = MemoryStore::new();
        store.insert_raw("scan", "[]");
        let mut harvester = harvester_with(store, RunOptions { quiet: true, ..RunOptions::default() });

        let err = harvester.run(Job::Scan).await.unwrap_err();
        assert!(matches!(err, HarvestError::CheckpointCorruption { .. }));
    }

    #[test]
    fn test_discard_corrupt_restarts() {
        let mut store = MemoryStore::new();
        store.insert_raw("scan", "{ not json");
        let options = RunOptions {
            discard_corrupt: true,
            ..RunOptions::default()
        };
        let mut harvester = harvester_with(store, options);

        let checkpoint: Checkpoint<Item> = harvester.load_checkpoint("scan", 1).unwrap();
        assert_eq!(checkpoint.cursor(), 1);
        assert!(checkpoint.is_empty());
    }

    #[test]
    fn test_fresh_discards_existing_progress() {
        let mut store = MemoryStore::new();
        store.insert_raw("scan", r#"{ "cursor": 51, "accumulated": [] }"#);
        let options = RunOptions {
            fresh: true,
            ..RunOptions::default()
        };
        let mut harvester = harvester_with(store, options);

        let checkpoint: Checkpoint<Item> = harvester.load_checkpoint("scan", 1).unwrap();
        assert_eq!(checkpoint.cursor(), 1);
    }

    #[test]
    fn test_config_drift_keeps_progress() {
        let mut store = MemoryStore::new();
        store.insert_raw(
            "scan",
            r#"{ "cursor": 51, "accumulated": [], "config_hash": "old" }"#,
        );
        let mut harvester = harvester_with(store, RunOptions::default());

        let checkpoint: Checkpoint<Item> = harvester.load_checkpoint("scan", 1).unwrap();
        assert_eq!(checkpoint.cursor(), 51);
        assert_eq!(checkpoint.config_hash(), Some("hash-1"));
    }

    #[test]
    fn test_plan_describes_jobs() {
        let mut store = MemoryStore::new();
        store.insert_raw("scan", r#"{ "cursor": 51, "accumulated": [] }"#);
        let harvester = harvester_with(store, RunOptions::default());

        let scan = harvester.plan(Job::Scan).unwrap();
        assert!(scan.contains("10 ids"), "{}", scan);
        assert!(scan.contains("resumes at cursor 51"), "{}", scan);

        let walk = harvester.plan(Job::Walk).unwrap();
        assert!(walk.contains("6 units"), "{}", walk);

        let expand = harvester.plan(Job::Expand).unwrap();
        assert!(expand.contains("0 subjects from 'scan'"), "{}", expand);
    }

    #[test]
    fn test_stats() {
        let mut store = MemoryStore::new();
        store.insert_raw("walk", r#"{ "cursor": 2, "accumulated": [{}, {}] }"#);
        let harvester = harvester_with(store, RunOptions::default());

        let summary = harvester.stats(Job::Walk).unwrap().unwrap();
        assert_eq!(summary.cursor, 2);
        assert_eq!(summary.results, 2);
        assert!(harvester.stats(Job::Scan).unwrap().is_none());
    }

    #[test]
    fn test_unconfigured_job() {
        let mut config = create_test_config();
        config.walk = None;
        let harvester = Harvester::with_store(
            config,
            "hash".to_string(),
            RunOptions::default(),
            Box::new(MemoryStore::new()),
        )
        .unwrap();
        assert!(matches!(
            harvester.plan(Job::Walk),
            Err(HarvestError::JobNotConfigured("walk"))
        ));
    }
}
