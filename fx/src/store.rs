//! Durable key-value store holding the last fetched rate.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use parking_lot::Mutex;
use recast_common::CurrencyPair;

use crate::error::{FxError, FxResult};

/// Host-provided durable key-value store. Values are decimal strings.
pub trait RateStore: Send + Sync {
    fn get(&self, key: &str) -> FxResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> FxResult<()>;
}

/// The two fixed keys a rate is persisted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateKeys {
    /// Key of the rate value.
    pub value: String,
    /// Key of the fetch time in epoch milliseconds.
    pub timestamp: String,
}

impl RateKeys {
    pub fn for_pair(pair: &CurrencyPair) -> Self {
        let stem = format!(
            "recast_{}_{}_rate",
            pair.base.code().to_lowercase(),
            pair.quote.code().to_lowercase()
        );
        Self {
            timestamp: format!("{}_timestamp", stem),
            value: stem,
        }
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RateStore for MemoryStore {
    fn get(&self, key: &str) -> FxResult<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    fn set(&self, key: &str, value: &str) -> FxResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store persisted as a flat JSON object in a single file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    guard: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> FxResult<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| FxError::StoreError(e.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(FxError::StoreError(e.to_string())),
        }
    }
}

impl RateStore for FileStore {
    fn get(&self, key: &str) -> FxResult<Option<String>> {
        let _guard = self.guard.lock();
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> FxResult<()> {
        let _guard = self.guard.lock();
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());

        let raw = serde_json::to_string_pretty(&entries)
            .map_err(|e| FxError::StoreError(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| FxError::StoreError(e.to_string()))?;
        }
        fs::write(&self.path, raw).map_err(|e| FxError::StoreError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_keys() {
        let keys = RateKeys::for_pair(&CurrencyPair::default());
        assert_eq!(keys.value, "recast_gbp_eur_rate");
        assert_eq!(keys.timestamp, "recast_gbp_eur_rate_timestamp");
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.get("missing").unwrap().is_none());

        store.set("k", "1.17").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("1.17"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rates.json");

        let store = FileStore::new(&path);
        assert!(store.get("recast_gbp_eur_rate").unwrap().is_none());
        store.set("recast_gbp_eur_rate", "1.17").unwrap();
        store.set("recast_gbp_eur_rate_timestamp", "1700000000000").unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(
            reopened.get("recast_gbp_eur_rate").unwrap().as_deref(),
            Some("1.17")
        );
        assert_eq!(
            reopened.get("recast_gbp_eur_rate_timestamp").unwrap().as_deref(),
            Some("1700000000000")
        );
    }

    #[test]
    fn test_file_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rates.json");
        fs::write(&path, "not json").unwrap();

        let store = FileStore::new(&path);
        assert!(matches!(store.get("k"), Err(FxError::StoreError(_))));
    }
}
