//! Checkpoint module for resumable jobs
//!
//! This module handles:
//! - The in-memory [`Checkpoint`] owned by each job driver
//! - Durable stores: JSON files, SQLite, and an in-memory map for tests
//! - Corruption detection on load
//!
//! A checkpoint pairs a cursor with the results gathered before it. Drivers
//! mutate both through [`Checkpoint::record_and_advance`], so a persisted
//! checkpoint never holds a result without the cursor that covers it.

mod json;
mod memory;
mod schema;
mod sqlite;
mod traits;

pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{CheckpointStore, CheckpointStoreExt, StoreError, StoreResult, StoredCheckpoint};

use crate::client::Item;
use crate::config::{BackendKind, CheckpointConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Violations of checkpoint invariants
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("Cursor cannot move backwards from {current} to {requested}")]
    CursorRegression { current: u64, requested: u64 },
}

/// Identifies the subject a result belongs to
///
/// Two results with the same key are the same subject; a checkpoint holds
/// at most one of them.
pub trait Keyed {
    fn key(&self) -> String;
}

impl Keyed for Item {
    fn key(&self) -> String {
        self.id.to_string()
    }
}

/// Progress of one job: a cursor plus every result gathered before it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint<R> {
    cursor: u64,

    accumulated: Vec<R>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    config_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,

    #[serde(skip)]
    seen: HashSet<String>,
}

impl<R> Checkpoint<R> {
    /// Creates an empty checkpoint positioned at `cursor`
    pub fn new(cursor: u64) -> Self {
        Self {
            cursor,
            accumulated: Vec::new(),
            config_hash: None,
            updated_at: None,
            seen: HashSet::new(),
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn accumulated(&self) -> &[R] {
        &self.accumulated
    }

    pub fn into_accumulated(self) -> Vec<R> {
        self.accumulated
    }

    pub fn len(&self) -> usize {
        self.accumulated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulated.is_empty()
    }

    /// Returns true if a result for `key` is already recorded
    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn config_hash(&self) -> Option<&str> {
        self.config_hash.as_deref()
    }

    /// Stamps the hash of the configuration that produced this checkpoint
    pub fn set_config_hash(&mut self, hash: impl Into<String>) {
        let hash = hash.into();
        if self.config_hash.as_deref() != Some(hash.as_str()) {
            self.config_hash = Some(hash);
            self.touch();
        }
    }

    /// When the checkpoint was last mutated
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Moves the cursor forward; moving it backwards is an error
    pub fn advance_to(&mut self, next: u64) -> Result<(), CheckpointError> {
        if next < self.cursor {
            return Err(CheckpointError::CursorRegression {
                current: self.cursor,
                requested: next,
            });
        }
        if next > self.cursor {
            self.cursor = next;
            self.touch();
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

impl<R: Keyed> Checkpoint<R> {
    /// Records an optional result and advances the cursor in one step
    ///
    /// Returns true if `result` was new. A result whose key is already
    /// present is dropped, so reprocessing a unit never duplicates it. The
    /// cursor is checked first, so a rejected call leaves the checkpoint
    /// untouched.
    pub fn record_and_advance(
        &mut self,
        result: Option<R>,
        next: u64,
    ) -> Result<bool, CheckpointError> {
        if next < self.cursor {
            return Err(CheckpointError::CursorRegression {
                current: self.cursor,
                requested: next,
            });
        }

        let mut inserted = false;
        if let Some(result) = result {
            let key = result.key();
            if self.seen.insert(key) {
                self.accumulated.push(result);
                inserted = true;
                self.touch();
            }
        }

        self.advance_to(next)?;
        Ok(inserted)
    }

    /// Rebuilds the dedupe index after decoding; returns the first duplicate key
    pub(crate) fn rebuild_index(&mut self) -> Result<(), String> {
        self.seen.clear();
        for result in &self.accumulated {
            let key = result.key();
            if !self.seen.insert(key.clone()) {
                return Err(key);
            }
        }
        Ok(())
    }
}

impl<R: PartialEq> PartialEq for Checkpoint<R> {
    fn eq(&self, other: &Self) -> bool {
        self.cursor == other.cursor
            && self.accumulated == other.accumulated
            && self.config_hash == other.config_hash
            && self.updated_at == other.updated_at
    }
}

/// Stored checkpoint metadata, as printed by `--stats`
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointSummary {
    pub key: String,
    pub cursor: u64,
    pub results: usize,
    pub config_hash: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl fmt::Display for CheckpointSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: cursor {}, {} results",
            self.key, self.cursor, self.results
        )?;
        if let Some(at) = self.updated_at {
            write!(f, ", updated {}", at.to_rfc3339())?;
        }
        Ok(())
    }
}

/// Opens the configured checkpoint backend
pub fn open_store(config: &CheckpointConfig) -> StoreResult<Box<dyn CheckpointStore>> {
    match config.backend {
        BackendKind::Json => Ok(Box::new(JsonFileStore::new(&config.path)?)),
        BackendKind::Sqlite => {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Ok(Box::new(SqliteStore::new(&config.path)?))
        }
    }
}
