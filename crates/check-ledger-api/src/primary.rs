use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use check_ledger_core::Check;
use check_ledger_store_sqlite::{ReplaceOutcome, SqliteStore};

/// Durable, transactional storage keyed by check id.
pub trait PrimaryStore {
    /// # Errors
    /// Returns an error when the backend cannot be opened or read.
    fn load_all(&mut self) -> Result<Vec<Check>>;

    /// Replace the stored set with `checks` atomically, refusing an empty
    /// overwrite of a non-empty collection.
    ///
    /// # Errors
    /// Returns an error when the backend cannot be opened or the write fails.
    fn save_all(&mut self, checks: &[Check]) -> Result<ReplaceOutcome>;

    /// # Errors
    /// Returns an error when the backend cannot be opened or read.
    fn count(&mut self) -> Result<u64>;
}

/// `SQLite` primary store whose connection is opened on first use and kept
/// for the lifetime of the value.
pub struct SqlitePrimary {
    path: PathBuf,
    handle: Option<SqliteStore>,
}

impl SqlitePrimary {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), handle: None }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Shared handle, opening and migrating the database on first call.
    /// A failed open is not cached; the next call tries again.
    ///
    /// # Errors
    /// Returns an error when the database directory, file, or schema cannot be set up.
    pub fn store(&mut self) -> Result<&mut SqliteStore> {
        if self.handle.is_none() {
            self.handle = Some(open_migrated(&self.path)?);
        }
        self.handle.as_mut().context("primary store handle missing after open")
    }
}

fn open_migrated(path: &Path) -> Result<SqliteStore> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }

    let mut store = SqliteStore::open(path)?;
    store.migrate()?;
    tracing::info!(path = %path.display(), "opened primary store");
    Ok(store)
}

impl PrimaryStore for SqlitePrimary {
    fn load_all(&mut self) -> Result<Vec<Check>> {
        self.store()?.list_checks()
    }

    fn save_all(&mut self, checks: &[Check]) -> Result<ReplaceOutcome> {
        self.store()?.replace_all(checks)
    }

    fn count(&mut self) -> Result<u64> {
        self.store()?.count_checks()
    }
}

#[cfg(test)]
mod tests {
    use check_ledger_core::{AmountValue, CheckId, CheckKind, DateValue};
    use serde_json::Map;

    use super::*;

    fn check(id: &str) -> Check {
        Check {
            id: CheckId::from(id),
            kind: CheckKind::Taken.into(),
            amount: AmountValue::Number(1.0),
            due_date: DateValue::from("2025-05-05"),
            receive_date: None,
            counterparty: "A".to_string(),
            bank: "B".to_string(),
            check_number: id.to_string(),
            extra: Map::new(),
        }
    }

    #[test]
    fn handle_is_opened_lazily_and_reused() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut primary = SqlitePrimary::new(dir.path().join("data").join("ledger.sqlite3"));
        assert!(!primary.is_open());

        primary.save_all(&[check("1")])?;
        assert!(primary.is_open());
        assert_eq!(primary.count()?, 1);
        assert_eq!(primary.load_all()?, vec![check("1")]);
        Ok(())
    }

    #[test]
    fn failed_open_is_retried_on_next_call() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory")?;

        let mut primary = SqlitePrimary::new(blocker.join("ledger.sqlite3"));
        assert!(primary.load_all().is_err());
        assert!(!primary.is_open());

        fs::remove_file(&blocker)?;
        assert!(primary.load_all()?.is_empty());
        assert!(primary.is_open());
        Ok(())
    }
}
