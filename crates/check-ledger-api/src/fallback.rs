//! Flat key/value persistence used for recovery and migration bookkeeping.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tempfile::NamedTempFile;
use thiserror::Error;

/// Legacy flat-format record set written by older builds.
pub const LEGACY_CHECKS_KEY: &str = "checkManager_checks";
/// Last-known-good record set, written whenever a primary write fails.
pub const FALLBACK_SNAPSHOT_KEY: &str = "checkManager_checks_fallback";
/// Verbatim copy of the legacy value taken right before migration writes.
pub const BACKUP_PRE_MIGRATION_KEY: &str = "checkManager_backup_pre_migration";
pub const MIGRATION_DONE_KEY: &str = "checkManager_migration_done";

const FLAG_TRUE: &str = "true";

#[derive(Debug, Error)]
pub enum KvError {
    #[error("fallback store I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("fallback store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to persist fallback store: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Synchronous string key/value storage with no transactions or schema.
pub trait KeyValueStore {
    /// # Errors
    /// Returns [`KvError`] when the backing storage cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// # Errors
    /// Returns [`KvError`] when the backing storage cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// # Errors
    /// Returns [`KvError`] when the backing storage cannot be written.
    fn remove(&self, key: &str) -> Result<(), KvError>;
}

/// Whether the migration completion flag is set. Unreadable storage counts as unset.
pub fn migration_done<K: KeyValueStore + ?Sized>(kv: &K) -> bool {
    match kv.get(MIGRATION_DONE_KEY) {
        Ok(value) => value.as_deref() == Some(FLAG_TRUE),
        Err(err) => {
            tracing::warn!(key = MIGRATION_DONE_KEY, error = %err, "failed to read migration flag");
            false
        }
    }
}

/// # Errors
/// Returns [`KvError`] when the flag cannot be written.
pub fn mark_migration_done<K: KeyValueStore + ?Sized>(kv: &K) -> Result<(), KvError> {
    kv.set(MIGRATION_DONE_KEY, FLAG_TRUE)
}

/// Key/value store persisted as one JSON object on disk.
///
/// Every write rewrites the whole file through a temp file and rename, so a
/// crash never leaves a half-written store behind.
#[derive(Debug, Clone)]
pub struct JsonFileKv {
    path: PathBuf,
}

impl JsonFileKv {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, KvError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), KvError> {
        let bytes = serde_json::to_vec_pretty(map)?;
        write_atomically(&self.path, &bytes)
    }
}

impl KeyValueStore for JsonFileKv {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        let mut map = self.read_map()?;
        if map.remove(key).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

/// Process-local store, for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Write `contents` to `path` via a sibling temp file and an atomic rename.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), KvError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path)?;
    Ok(())
}
