//! SQLite checkpoint backend
//!
//! Every key is one row of the `checkpoints` table. Saves are a single
//! upsert inside a transaction, so a row always holds a complete document.

use crate::checkpoint::schema::initialize_schema;
use crate::checkpoint::traits::{CheckpointStore, StoreError, StoreResult, StoredCheckpoint};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite checkpoint store
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

impl CheckpointStore for SqliteStore {
    fn read(&self, key: &str) -> StoreResult<Option<String>> {
        let payload = self
            .conn
            .query_row(
                "SELECT payload FROM checkpoints WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    fn write(&mut self, key: &str, record: &StoredCheckpoint) -> StoreResult<()> {
        let cursor =
            i64::try_from(record.cursor).map_err(|_| StoreError::CursorOutOfRange {
                key: key.to_string(),
                cursor: record.cursor,
            })?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO checkpoints (key, cursor, payload, config_hash, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                cursor = excluded.cursor,
                payload = excluded.payload,
                config_hash = excluded.config_hash,
                updated_at = excluded.updated_at",
            params![
                key,
                cursor,
                record.document,
                record.config_hash,
                record.updated_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        tx.commit()?;

        tracing::trace!("Saved checkpoint '{}' at cursor {}", key, record.cursor);
        Ok(())
    }

    fn discard(&mut self, key: &str) -> StoreResult<bool> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO discarded_checkpoints (key, payload, discarded_at)
             SELECT key, payload, ?2 FROM checkpoints WHERE key = ?1",
            params![key, Utc::now().to_rfc3339()],
        )?;
        let removed = tx.execute("DELETE FROM checkpoints WHERE key = ?1", params![key])?;
        tx.commit()?;

        if removed > 0 {
            tracing::warn!("Discarded checkpoint '{}'", key);
        }
        Ok(removed > 0)
    }
}
