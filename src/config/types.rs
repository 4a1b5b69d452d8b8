use crate::crawler::MetricKind;
use crate::ConfigError;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure for Tidepool
///
/// Job sections are optional; a job whose section is absent cannot be run.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub client: ClientConfig,

    #[serde(default)]
    pub rate: RateConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub scan: Option<ScanConfig>,

    #[serde(default)]
    pub expand: Option<ExpandConfig>,

    #[serde(default)]
    pub walk: Option<WalkConfig>,
}

/// Remote client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,

    /// Per-request timeout in seconds
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Root of the item API
    #[serde(rename = "hn-base-url", default = "default_hn_base_url")]
    pub hn_base_url: String,

    /// GraphQL endpoint
    #[serde(rename = "github-endpoint", default = "default_github_endpoint")]
    pub github_endpoint: String,

    /// Name of the environment variable holding the GraphQL token
    #[serde(rename = "github-token-env", default = "default_github_token_env")]
    pub github_token_env: String,
}

impl ClientConfig {
    /// Reads the GraphQL token from the configured environment variable
    pub fn github_token(&self) -> Result<String, ConfigError> {
        match std::env::var(&self.github_token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(ConfigError::MissingEnv(self.github_token_env.clone())),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            crawler_name: "Tidepool".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: "https://example.com/tidepool".to_string(),
            contact_email: "admin@example.com".to_string(),
            timeout_secs: default_timeout_secs(),
            hn_base_url: default_hn_base_url(),
            github_endpoint: default_github_endpoint(),
            github_token_env: default_github_token_env(),
        }
    }
}

/// Retry and rate-limit policy
#[derive(Debug, Clone, Deserialize)]
pub struct RateConfig {
    /// Total attempts per remote call, including the first
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the second attempt (milliseconds); doubles per attempt
    #[serde(rename = "backoff-base-ms", default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on a single backoff delay (milliseconds)
    #[serde(rename = "max-backoff-ms", default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Adds up to 50% random jitter to each delay
    #[serde(default = "default_jitter")]
    pub jitter: bool,

    /// Pause before a call once remaining quota drops to this value
    #[serde(rename = "safety-buffer", default = "default_safety_buffer")]
    pub safety_buffer: u64,

    /// Extra wait after the reported quota reset (seconds)
    #[serde(rename = "reset-buffer-secs", default = "default_reset_buffer_secs")]
    pub reset_buffer_secs: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: default_jitter(),
            safety_buffer: default_safety_buffer(),
            reset_buffer_secs: default_reset_buffer_secs(),
        }
    }
}

/// Checkpoint backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One JSON document per key in a directory
    Json,
    /// One row per key in a SQLite database file
    Sqlite,
}

/// Checkpoint persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Directory (json) or database file (sqlite)
    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,

    /// Cursor advances between saves during a scan
    #[serde(rename = "save-interval", default = "default_save_interval")]
    pub save_interval: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_checkpoint_path(),
            save_interval: default_save_interval(),
        }
    }
}

/// Id-range scan job
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// First id examined (inclusive)
    #[serde(rename = "start-id")]
    pub start_id: u64,

    /// Upper bound (exclusive)
    #[serde(rename = "end-id")]
    pub end_id: u64,

    /// Distance between examined ids; values above 1 sample the range
    #[serde(default = "default_stride")]
    pub stride: u64,

    /// Items scoring below this are excluded
    #[serde(rename = "min-score", default = "default_min_score")]
    pub min_score: i64,

    /// Whole-word, case-insensitive title keywords
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Extra keywords, one per line; `#` starts a comment
    #[serde(rename = "keywords-file", default)]
    pub keywords_file: Option<PathBuf>,

    /// Checkpoint key
    #[serde(default = "default_scan_key")]
    pub key: String,
}

/// Reply-tree expansion job
#[derive(Debug, Clone, Deserialize)]
pub struct ExpandConfig {
    /// Levels of replies below each subject
    #[serde(rename = "max-depth", default = "default_max_depth")]
    pub max_depth: u32,

    /// Children fetched per parent
    #[serde(rename = "max-children", default = "default_max_children")]
    pub max_children: usize,

    /// Requests in flight within one wave
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Checkpoint key whose accumulated items are expanded
    #[serde(rename = "source-key", default = "default_scan_key")]
    pub source_key: String,

    /// Checkpoint key
    #[serde(default = "default_expand_key")]
    pub key: String,
}

/// Historical-metrics walk job
#[derive(Debug, Clone, Deserialize)]
pub struct WalkConfig {
    /// Repository URLs or `owner/name` references
    pub repositories: Vec<String>,

    /// First month, `YYYY-MM`
    pub from: String,

    /// Last month (inclusive), `YYYY-MM`
    pub until: String,

    #[serde(default = "default_metrics")]
    pub metrics: Vec<MetricKind>,

    /// Connection page size
    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: u32,

    /// Checkpoint key
    #[serde(default = "default_walk_key")]
    pub key: String,
}

impl WalkConfig {
    /// Returns the first day of the `from` and `until` months
    pub fn month_range(&self) -> Result<(NaiveDate, NaiveDate), ConfigError> {
        Ok((parse_month(&self.from)?, parse_month(&self.until)?))
    }
}

/// Parses `YYYY-MM` into the first day of that month
pub fn parse_month(value: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(&format!("{}-01", value.trim()), "%Y-%m-%d").map_err(|_| {
        ConfigError::Validation(format!("Expected a YYYY-MM month, got '{}'", value))
    })
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_hn_base_url() -> String {
    "https://hacker-news.firebaseio.com/v0".to_string()
}

fn default_github_endpoint() -> String {
    "https://api.github.com/graphql".to_string()
}

fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_jitter() -> bool {
    true
}

fn default_safety_buffer() -> u64 {
    5
}

fn default_reset_buffer_secs() -> u64 {
    10
}

fn default_backend() -> BackendKind {
    BackendKind::Json
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("./checkpoints")
}

fn default_save_interval() -> u64 {
    100
}

fn default_stride() -> u64 {
    1
}

fn default_min_score() -> i64 {
    20
}

fn default_scan_key() -> String {
    "scan".to_string()
}

fn default_max_depth() -> u32 {
    3
}

fn default_max_children() -> usize {
    100
}

fn default_concurrency() -> usize {
    10
}

fn default_expand_key() -> String {
    "expand".to_string()
}

fn default_metrics() -> Vec<MetricKind> {
    MetricKind::ALL.to_vec()
}

fn default_page_size() -> u32 {
    100
}

fn default_walk_key() -> String {
    "walk".to_string()
}
