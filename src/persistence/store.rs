//! Key/value persistence for the pair-list snapshot

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::dataset::pairs::PairRecord;
use crate::utils::error::{EngineError, Result};

/// Minimal string key/value storage
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(EngineError::Persistence(format!("Invalid storage key '{}'", key)));
        }
        Ok(self.root.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        std::fs::write(self.path_for(key)?, value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)?) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Store the pair list as a JSON array under `key`
pub fn save_pair_records(store: &dyn KeyValueStore, key: &str, records: &[PairRecord]) -> Result<()> {
    let json = serde_json::to_string(records)?;
    store.set(key, &json)?;
    tracing::debug!("Saved {} pair records under '{}'", records.len(), key);
    Ok(())
}

/// Read the pair list stored under `key`, `None` when absent
pub fn load_pair_records(store: &dyn KeyValueStore, key: &str) -> Result<Option<Vec<PairRecord>>> {
    match store.get(key)? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn records() -> Vec<PairRecord> {
        vec![
            PairRecord::new("cat1.png", "cat2.png", true),
            PairRecord::new("cat1.png", "dog.png", false),
        ]
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(load_pair_records(&store, "pairs").unwrap().is_none());

        save_pair_records(&store, "pairs", &records()).unwrap();
        assert_eq!(load_pair_records(&store, "pairs").unwrap(), Some(records()));

        store.remove("pairs").unwrap();
        assert!(store.get("pairs").unwrap().is_none());
    }

    #[test]
    fn test_file_store_layout() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("kv")).unwrap();

        save_pair_records(&store, "siamese_training_pairs", &records()).unwrap();
        let raw = std::fs::read_to_string(store.root().join("siamese_training_pairs.json")).unwrap();
        assert!(raw.starts_with('['));
        assert!(raw.contains("\"isSameAnimal\":false"));

        let reopened = FileStore::new(dir.path().join("kv")).unwrap();
        assert_eq!(load_pair_records(&reopened, "siamese_training_pairs").unwrap(), Some(records()));

        reopened.remove("siamese_training_pairs").unwrap();
        reopened.remove("siamese_training_pairs").unwrap();
        assert!(reopened.get("siamese_training_pairs").unwrap().is_none());
    }

    #[test]
    fn test_file_store_rejects_path_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(store.set("../escape", "x").is_err());
        assert!(store.get("").is_err());
    }

    #[test]
    fn test_corrupt_snapshot_is_error() {
        let store = MemoryStore::new();
        store.set("pairs", "{not json").unwrap();
        let err = load_pair_records(&store, "pairs").unwrap_err();
        assert_eq!(err.status(), 500);
    }
}
