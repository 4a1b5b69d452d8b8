//! Tidepool: a resumable, rate-limited research-data harvester
//!
//! This crate scans ID-addressed item APIs (Hacker News) and paginated
//! cursor APIs (GitHub GraphQL), expands reply trees breadth-first, and
//! checkpoints progress so an interrupted crawl resumes without refetching
//! or duplicating results.

pub mod checkpoint;
pub mod client;
pub mod config;
pub mod crawler;
pub mod progress;

use thiserror::Error;

/// Main error type for Tidepool operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Remote call failed: {0}")]
    Fetch(#[from] client::FetchError),

    #[error("Checkpoint '{key}' is corrupt: {reason} (re-run with --discard-corrupt to start over)")]
    CheckpointCorruption { key: String, reason: String },

    #[error("Checkpoint store error: {0}")]
    Store(#[from] checkpoint::StoreError),

    #[error("Checkpoint invariant violated: {0}")]
    Checkpoint(#[from] checkpoint::CheckpointError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job '{0}' is not configured")]
    JobNotConfigured(&'static str),
}

impl HarvestError {
    /// Lifts a store error, promoting corrupt records to
    /// [`HarvestError::CheckpointCorruption`]
    pub fn from_store(err: checkpoint::StoreError) -> Self {
        match err {
            checkpoint::StoreError::Corrupt { key, reason } => {
                Self::CheckpointCorruption { key, reason }
            }
            other => Self::Store(other),
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid keyword pattern: {0}")]
    InvalidKeyword(String),

    #[error("Missing environment variable: {0}")]
    MissingEnv(String),
}

/// Result type alias for Tidepool operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use checkpoint::{Checkpoint, CheckpointStore, Keyed};
pub use client::{FetchError, Item, ItemKind};
pub use config::Config;
pub use crawler::{CommentTree, Metric};
