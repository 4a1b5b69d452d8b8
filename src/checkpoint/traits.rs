//! Checkpoint store traits and error types
//!
//! Backends implement the object-safe [`CheckpointStore`], which only moves
//! serialized documents around. Typed loading and saving live on
//! [`CheckpointStoreExt`], implemented for every store (including trait
//! objects), so drivers can work with `&mut dyn CheckpointStore`.

use crate::checkpoint::{Checkpoint, CheckpointSummary, Keyed};
use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during checkpoint persistence
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record exists but cannot be decoded
    #[error("Checkpoint '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    /// The backend cannot represent this cursor
    #[error("Cursor {cursor} for checkpoint '{key}' is out of range for this backend")]
    CursorOutOfRange { key: String, cursor: u64 },

    #[error("Invalid checkpoint key: '{0}'")]
    InvalidKey(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A serialized checkpoint plus the metadata backends index on
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCheckpoint {
    pub cursor: u64,
    pub config_hash: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,

    /// Full JSON document
    pub document: String,
}

/// Persistence backend for checkpoints
///
/// `write` must replace the previous record atomically: after a crash the
/// key holds either the old or the new document, never a mix.
pub trait CheckpointStore: Send {
    /// Returns the stored document, or `None` if the key was never saved
    fn read(&self, key: &str) -> StoreResult<Option<String>>;

    /// Atomically replaces the record for `key`
    fn write(&mut self, key: &str, record: &StoredCheckpoint) -> StoreResult<()>;

    /// Moves the record for `key` out of the way; returns false if there was none
    fn discard(&mut self, key: &str) -> StoreResult<bool>;
}

/// Typed checkpoint operations available on every store
pub trait CheckpointStoreExt: CheckpointStore {
    /// Loads the checkpoint for `key`
    ///
    /// A missing record yields an empty checkpoint at `start_cursor`. A record
    /// that cannot be decoded, or that holds the same subject twice, is
    /// reported as [`StoreError::Corrupt`] rather than silently restarted.
    fn load<R>(&self, key: &str, start_cursor: u64) -> StoreResult<Checkpoint<R>>
    where
        R: Keyed + DeserializeOwned,
    {
        let Some(document) = self.read(key)? else {
            tracing::debug!("No checkpoint for '{}', starting at {}", key, start_cursor);
            return Ok(Checkpoint::new(start_cursor));
        };

        let mut checkpoint: Checkpoint<R> =
            serde_json::from_str(&document).map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        checkpoint
            .rebuild_index()
            .map_err(|duplicate| StoreError::Corrupt {
                key: key.to_string(),
                reason: format!("subject '{}' is recorded more than once", duplicate),
            })?;

        tracing::debug!(
            "Loaded checkpoint '{}' at cursor {} with {} results",
            key,
            checkpoint.cursor(),
            checkpoint.len()
        );

        Ok(checkpoint)
    }

    /// Persists `checkpoint` under `key`
    fn save<R>(&mut self, key: &str, checkpoint: &Checkpoint<R>) -> StoreResult<()>
    where
        R: Serialize,
    {
        let record = StoredCheckpoint {
            cursor: checkpoint.cursor(),
            config_hash: checkpoint.config_hash().map(str::to_string),
            updated_at: checkpoint.updated_at(),
            document: serde_json::to_string_pretty(checkpoint)?,
        };
        self.write(key, &record)
    }

    /// Summarizes the stored record without decoding its results
    fn describe(&self, key: &str) -> StoreResult<Option<CheckpointSummary>> {
        #[derive(Deserialize)]
        struct Header {
            cursor: u64,
            accumulated: Vec<IgnoredAny>,
            #[serde(default)]
            config_hash: Option<String>,
            #[serde(default)]
            updated_at: Option<DateTime<Utc>>,
        }

        let Some(document) = self.read(key)? else {
            return Ok(None);
        };

        let header: Header = serde_json::from_str(&document).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Some(CheckpointSummary {
            key: key.to_string(),
            cursor: header.cursor,
            results: header.accumulated.len(),
            config_hash: header.config_hash,
            updated_at: header.updated_at,
        }))
    }
}

impl<S: CheckpointStore + ?Sized> CheckpointStoreExt for S {}
