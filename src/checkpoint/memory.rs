//! In-memory checkpoint backend for driver tests

use crate::checkpoint::traits::{CheckpointStore, StoreResult, StoredCheckpoint};
use std::collections::HashMap;

/// Keeps checkpoint documents in a map and counts writes
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: HashMap<String, String>,
    writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Stores a raw document, bypassing serialization
    pub fn insert_raw(&mut self, key: &str, document: &str) {
        self.records.insert(key.to_string(), document.to_string());
    }
}

impl CheckpointStore for MemoryStore {
    fn read(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.records.get(key).cloned())
    }

    fn write(&mut self, key: &str, record: &StoredCheckpoint) -> StoreResult<()> {
        self.records.insert(key.to_string(), record.document.clone());
        self.writes += 1;
        Ok(())
    }

    fn discard(&mut self, key: &str) -> StoreResult<bool> {
        Ok(self.records.remove(key).is_some())
    }
}
