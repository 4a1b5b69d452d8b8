//! JSON file checkpoint backend
//!
//! One pretty-printed document per key: `<dir>/<key>.json`. Writes go to a
//! temporary sibling that is fsynced and then renamed over the target, so a
//! crash mid-save leaves the previous checkpoint intact.

use crate::checkpoint::traits::{CheckpointStore, StoreError, StoreResult, StoredCheckpoint};
use chrono::Utc;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Directory of JSON checkpoint documents
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Opens (and creates if needed) the checkpoint directory
    pub fn new(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Path of the document for `key`
    pub fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        if key.is_empty()
            || key.starts_with('.')
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl CheckpointStore for JsonFileStore {
    fn read(&self, key: &str) -> StoreResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(document) => Ok(Some(document)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == ErrorKind::InvalidData => Err(StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, key: &str, record: &StoredCheckpoint) -> StoreResult<()> {
        let target = self.path_for(key)?;
        let tmp = target.with_extension("json.tmp");

        {
            let mut file = File::create(&tmp)?;
            file.write_all(record.document.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &target)?;

        tracing::trace!("Saved checkpoint '{}' at cursor {}", key, record.cursor);
        Ok(())
    }

    fn discard(&mut self, key: &str) -> StoreResult<bool> {
        let target = self.path_for(key)?;
        if !target.exists() {
            return Ok(false);
        }

        let aside = target.with_extension(format!(
            "json.corrupt-{}",
            Utc::now().format("%Y%m%dT%H%M%S")
        ));
        fs::rename(&target, &aside)?;
        tracing::warn!("Moved checkpoint '{}' aside to {}", key, aside.display());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{Checkpoint, CheckpointStoreExt};
    use crate::client::{Item, ItemKind};
    use tempfile::TempDir;

    fn story(id: u64) -> Item {
        Item {
            id,
            kind: ItemKind::Story,
            by: Some("pg".to_string()),
            time: Some(1_175_714_200),
            score: Some(42),
            title: Some(format!("Story {}", id)),
            text: None,
            url: None,
            kids: vec![],
            parent: None,
            descendants: None,
        }
    }

    #[test]
    fn test_missing_key_yields_default() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();
        let checkpoint: Checkpoint<Item> = store.load("scan", 100).unwrap();
        assert_eq!(checkpoint.cursor(), 100);
        assert!(checkpoint.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut store = JsonFileStore::new(dir.path()).unwrap();

        let mut checkpoint = Checkpoint::new(0);
        checkpoint.record_and_advance(Some(story(3)), 4).unwrap();
        checkpoint.set_config_hash("deadbeef");
        store.save("scan", &checkpoint).unwrap();

        let loaded: Checkpoint<Item> = store.load("scan", 0).unwrap();
        assert_eq!(loaded, checkpoint);
        assert!(loaded.contains("3"));
        assert!(!dir.path().join("scan.json.tmp").exists());
    }

    #[test]
    fn test_saving_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut store = JsonFileStore::new(dir.path()).unwrap();

        let mut checkpoint = Checkpoint::new(0);
        checkpoint.record_and_advance(Some(story(1)), 2).unwrap();

        store.save("scan", &checkpoint).unwrap();
        let first = std::fs::read(dir.path().join("scan.json")).unwrap();
        store.save("scan", &checkpoint).unwrap();
        let second = std::fs::read(dir.path().join("scan.json")).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_corrupt_document_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("scan.json"), "{ \"cursor\": 12, \"accum").unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();

        let err = store.load::<Item>("scan", 0).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref key, .. } if key == "scan"));
    }

    #[test]
    fn test_discard_moves_record_aside() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("scan.json"), "garbage").unwrap();
        let mut store = JsonFileStore::new(dir.path()).unwrap();

        assert!(store.discard("scan").unwrap());
        assert!(!store.discard("scan").unwrap());

        let moved: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("scan.json.corrupt-"))
            .collect();
        assert_eq!(moved.len(), 1);

        let fresh: Checkpoint<Item> = store.load("scan", 5).unwrap();
        assert_eq!(fresh.cursor(), 5);
    }

    #[test]
    fn test_invalid_key() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();
        assert!(matches!(store.read("../x"), Err(StoreError::InvalidKey(_))));
        assert!(matches!(store.read(""), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn test_describe() {
        let dir = TempDir::new().unwrap();
        let mut store = JsonFileStore::new(dir.path()).unwrap();
        assert!(store.describe("scan").unwrap().is_none());

        let mut checkpoint = Checkpoint::new(0);
        checkpoint.record_and_advance(Some(story(1)), 2).unwrap();
        checkpoint.record_and_advance(Some(story(2)), 3).unwrap();
        store.save("scan", &checkpoint).unwrap();

        let summary = store.describe("scan").unwrap().unwrap();
        assert_eq!(summary.cursor, 3);
        assert_eq!(summary.results, 2);
    }
}
