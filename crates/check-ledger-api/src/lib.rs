use std::path::Path;

use anyhow::Result;
use check_ledger_core::{
    generate_unique_check_number, plan_reminders, summarize, Check, CheckBook, CheckDraft,
    CheckId, LedgerSummary, Reminder,
};
use check_ledger_store_sqlite::{IntegrityReport, SchemaStatus};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

mod config;
mod export;
mod fallback;
mod migration;
mod primary;
mod store;
mod verify;

pub use config::{LedgerConfig, DATA_DIR_ENV};
pub use export::{
    export_file_name, export_snapshot, read_snapshot, write_snapshot, ExportedSnapshot,
    EXPORT_FILE_PREFIX,
};
pub use fallback::{
    mark_migration_done, migration_done, JsonFileKv, KeyValueStore, KvError, MemoryKv,
    BACKUP_PRE_MIGRATION_KEY, FALLBACK_SNAPSHOT_KEY, LEGACY_CHECKS_KEY, MIGRATION_DONE_KEY,
};
pub use migration::{migrate, MigrationOutcome};
pub use primary::{PrimaryStore, SqlitePrimary};
pub use store::{CheckStore, LoadSource, Loaded, SaveOutcome};
pub use verify::{verify_and_cleanup, CLEANUP_KEYS};

pub const API_CONTRACT_VERSION: &str = "api.v1";

pub type LedgerStore = CheckStore<SqlitePrimary, JsonFileKv>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartupReport {
    pub migration: MigrationOutcome,
    pub source: LoadSource,
    pub count: usize,
    /// `None` when the primary store was not read, so verification was skipped.
    pub verified: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Startup {
    pub report: StartupReport,
    pub checks: Vec<Check>,
}

/// Result of one add, update, or remove: the affected record and how the new set was saved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Mutation {
    pub check: Check,
    pub save: SaveOutcome,
}

/// Application-facing entry point over the on-disk ledger.
///
/// The legacy migration runs once per instance, before the first read or
/// write reaches the store.
pub struct CheckLedgerApi {
    config: LedgerConfig,
    store: LedgerStore,
    migration: Option<MigrationOutcome>,
}

impl CheckLedgerApi {
    #[must_use]
    pub fn new(config: LedgerConfig) -> Self {
        let store = CheckStore::new(
            SqlitePrimary::new(config.database_path()),
            JsonFileKv::new(config.fallback_path()),
        );
        Self { config, store, migration: None }
    }

    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Run the startup sequence: migrate, load, then verify when the primary
    /// store was readable.
    pub fn startup(&mut self) -> Startup {
        let migration = self.ensure_migrated();
        let loaded = self.load_all();

        let verified = match loaded.source {
            LoadSource::Primary | LoadSource::RecoveredFromBackup => {
                Some(self.verify_and_cleanup())
            }
            LoadSource::Fallback | LoadSource::Empty => None,
        };

        let report =
            StartupReport { migration, source: loaded.source, count: loaded.checks.len(), verified };
        tracing::info!(?report, "startup complete");
        Startup { report, checks: loaded.checks }
    }

    pub fn load_all(&mut self) -> Loaded {
        self.ensure_migrated();
        self.store.load_all()
    }

    pub fn save_all(&mut self, checks: &[Check]) -> SaveOutcome {
        self.ensure_migrated();
        self.store.save_all(checks)
    }

    /// Run the migration now, even if this instance already ran it.
    pub fn migrate(&mut self) -> MigrationOutcome {
        let outcome = migrate(&mut self.store);
        self.migration = Some(outcome.clone());
        outcome
    }

    pub fn verify_and_cleanup(&mut self) -> bool {
        self.ensure_migrated();
        verify_and_cleanup(&mut self.store)
    }

    /// Export `checks` into the configured export directory under today's (UTC) name.
    #[must_use]
    pub fn export_snapshot(&self, checks: &[Check]) -> bool {
        export_snapshot(checks, &self.config.export_dir(), today_utc())
    }

    /// Load the current set and write it to `dir` (default: the export directory).
    ///
    /// # Errors
    /// Returns an error when the snapshot file cannot be written.
    pub fn export_current(&mut self, dir: Option<&Path>) -> Result<ExportedSnapshot> {
        let loaded = self.load_all();
        let dir = dir.map_or_else(|| self.config.export_dir(), Path::to_path_buf);
        write_snapshot(&loaded.checks, &dir, today_utc())
    }

    /// Replace the stored set with the contents of an exported snapshot.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or parsed. Storage
    /// failures are reported through the returned [`SaveOutcome`].
    pub fn import_snapshot(&mut self, path: &Path) -> Result<SaveOutcome> {
        let checks = read_snapshot(path)?;
        tracing::info!(count = checks.len(), path = %path.display(), "importing snapshot");
        Ok(self.save_all(&checks))
    }

    /// # Errors
    /// Returns an error when the draft fails validation.
    pub fn add_check(&mut self, draft: CheckDraft) -> Result<Mutation> {
        let mut book = self.book();
        let check = book.add(draft)?;
        let save = self.save_all(book.checks());
        Ok(Mutation { check, save })
    }

    /// # Errors
    /// Returns an error for an unknown id or a record that fails validation.
    pub fn update_check(&mut self, check: Check) -> Result<Mutation> {
        let mut book = self.book();
        book.update(check.clone())?;
        let save = self.save_all(book.checks());
        Ok(Mutation { check, save })
    }

    /// Delete a record. Removing the last record is refused by the empty-write
    /// guard and reported as [`SaveOutcome::RefusedEmptyOverwrite`].
    ///
    /// # Errors
    /// Returns an error for an unknown id.
    pub fn remove_check(&mut self, id: &CheckId) -> Result<Mutation> {
        let mut book = self.book();
        let check = book.remove(id)?;
        let save = self.save_all(book.checks());
        Ok(Mutation { check, save })
    }

    /// A random six-digit check number not used by any stored record.
    pub fn next_check_number(&mut self) -> String {
        let checks = self.load_all().checks;
        generate_unique_check_number(&checks, &mut rand::thread_rng())
    }

    pub fn summary(&mut self, today: Date) -> LedgerSummary {
        summarize(&self.load_all().checks, today)
    }

    pub fn reminders(&mut self, now: OffsetDateTime) -> Vec<Reminder> {
        plan_reminders(&self.load_all().checks, now)
    }

    /// # Errors
    /// Returns an error when the primary database cannot be opened or queried.
    pub fn schema_status(&mut self) -> Result<SchemaStatus> {
        self.store.primary_mut().store()?.schema_status()
    }

    /// # Errors
    /// Returns an error when the primary database cannot be opened or probed.
    pub fn integrity_check(&mut self) -> Result<IntegrityReport> {
        self.store.primary_mut().store()?.integrity_check()
    }

    /// Copy the primary database to `out_file`; returns the copied check count.
    ///
    /// # Errors
    /// Returns an error when the primary database cannot be opened or copied.
    pub fn backup_database(&mut self, out_file: &Path) -> Result<u64> {
        self.store.primary_mut().store()?.backup_database(out_file)
    }

    fn ensure_migrated(&mut self) -> MigrationOutcome {
        if let Some(outcome) = &self.migration {
            return outcome.clone();
        }
        self.migrate()
    }

    fn book(&mut self) -> CheckBook {
        CheckBook::new(self.load_all().checks)
    }
}

fn today_utc() -> Date {
    OffsetDateTime::now_utc().date()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::fs;

    use anyhow::{anyhow, Result};
    use check_ledger_core::{AmountValue, CheckKind, DateValue, LedgerError};

    use super::*;

    fn draft(check_number: &str) -> CheckDraft {
        CheckDraft {
            kind: CheckKind::Taken,
            amount: 75.0,
            due_date: DateValue::from("2030-01-15"),
            receive_date: Some(DateValue::from("2030-01-01")),
            counterparty: "Acme".to_string(),
            bank: "First".to_string(),
            check_number: check_number.to_string(),
        }
    }

    fn legacy_json() -> String {
        r#"[{"id":"1700000000000","type":"Given","amount":120,"dueDate":{"value":"2025-10-21T10:07:29.000Z"},"receiveDate":null,"counterparty":"Bob","bank":"Mellat","checkNumber":"123456"}]"#
            .to_string()
    }

    #[test]
    fn startup_migrates_loads_and_cleans_up_legacy_data() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = LedgerConfig::new(dir.path());
        JsonFileKv::new(config.fallback_path()).set(LEGACY_CHECKS_KEY, &legacy_json())?;

        let mut api = CheckLedgerApi::new(config.clone());
        let startup = api.startup();
        assert_eq!(startup.report.migration, MigrationOutcome::Migrated { count: 1 });
        assert_eq!(startup.report.source, LoadSource::Primary);
        assert_eq!(startup.report.verified, Some(true));

        let first = startup.checks.first().ok_or_else(|| anyhow!("expected one check"))?;
        assert_eq!(first.due_date, DateValue::from("2025-10-21"));

        let kv = JsonFileKv::new(config.fallback_path());
        for key in CLEANUP_KEYS {
            assert_eq!(kv.get(key)?, None);
        }

        let mut reopened = CheckLedgerApi::new(config);
        let again = reopened.startup();
        assert_eq!(again.report.migration, MigrationOutcome::NoLegacyData);
        assert_eq!(again.checks.len(), 1);
        Ok(())
    }

    fn ids(checks: &[Check]) -> BTreeSet<&str> {
        checks.iter().map(|check| check.id.as_str()).collect()
    }

    #[test]
    fn add_before_startup_migrates_legacy_data_first() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = LedgerConfig::new(dir.path());
        JsonFileKv::new(config.fallback_path()).set(LEGACY_CHECKS_KEY, &legacy_json())?;

        let mut api = CheckLedgerApi::new(config.clone());
        let added = api.add_check(draft("000001"))?;
        assert_eq!(added.save, SaveOutcome::Primary { written: 2 });

        let mut restarted = CheckLedgerApi::new(config);
        let startup = restarted.startup();
        assert_eq!(startup.report.migration, MigrationOutcome::AlreadyDone);
        assert_eq!(startup.report.verified, Some(true));
        let expected = BTreeSet::from(["1700000000000", added.check.id.as_str()]);
        assert_eq!(ids(&startup.checks), expected);
        Ok(())
    }

    #[test]
    fn list_before_startup_sees_migrated_legacy_data() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = LedgerConfig::new(dir.path());
        JsonFileKv::new(config.fallback_path()).set(LEGACY_CHECKS_KEY, &legacy_json())?;

        let mut api = CheckLedgerApi::new(config);
        let loaded = api.load_all();
        assert_eq!(loaded.source, LoadSource::Primary);
        assert_eq!(ids(&loaded.checks), BTreeSet::from(["1700000000000"]));
        assert_eq!(api.startup().report.migration, MigrationOutcome::Migrated { count: 1 });
        Ok(())
    }

    #[test]
    fn restarts_with_unavailable_primary_keep_fallback_edits() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = LedgerConfig::new(dir.path());
        fs::create_dir_all(config.database_path())?;
        JsonFileKv::new(config.fallback_path()).set(LEGACY_CHECKS_KEY, &legacy_json())?;

        let mut api = CheckLedgerApi::new(config.clone());
        let first = api.startup();
        assert!(matches!(first.report.migration, MigrationOutcome::Deferred { count: 1, .. }));
        let added = api.add_check(draft("000001"))?;
        assert_eq!(added.save, SaveOutcome::Fallback { written: 2 });
        let expected = BTreeSet::from(["1700000000000", added.check.id.as_str()]);

        let mut restarted = CheckLedgerApi::new(config.clone());
        let second = restarted.startup();
        assert_eq!(
            second.report.migration,
            MigrationOutcome::Deferred { count: 2, save: SaveOutcome::Fallback { written: 2 } }
        );
        assert_eq!(second.report.source, LoadSource::Fallback);
        assert_eq!(ids(&second.checks), expected);

        fs::remove_dir(config.database_path())?;
        let mut recovered = CheckLedgerApi::new(config);
        let third = recovered.startup();
        assert_eq!(third.report.migration, MigrationOutcome::Migrated { count: 2 });
        assert_eq!(third.report.source, LoadSource::Primary);
        assert_eq!(third.report.verified, Some(true));
        assert_eq!(ids(&third.checks), expected);
        Ok(())
    }

    #[test]
    fn startup_migrates_valid_records_beside_a_malformed_one() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = LedgerConfig::new(dir.path());
        let legacy = r#"[{"id":"1","type":"Given","amount":120,"dueDate":"2025-01-01","counterparty":"Bob","bank":"Mellat","checkNumber":"1"},{"id":"2","type":"Taken","amount":"50","dueDate":"2025-01-02","counterparty":"Ann","bank":"Sepah","checkNumber":"2"}]"#;
        JsonFileKv::new(config.fallback_path()).set(LEGACY_CHECKS_KEY, legacy)?;

        let mut api = CheckLedgerApi::new(config);
        let startup = api.startup();
        assert_eq!(startup.report.migration, MigrationOutcome::Migrated { count: 2 });
        assert_eq!(ids(&startup.checks), BTreeSet::from(["1", "2"]));
        let second = startup
            .checks
            .iter()
            .find(|check| check.id.as_str() == "2")
            .ok_or_else(|| anyhow!("expected check 2"))?;
        assert_eq!(second.amount, AmountValue::Other(serde_json::json!("50")));
        Ok(())
    }

    #[test]
    fn fresh_ledger_starts_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut api = CheckLedgerApi::new(LedgerConfig::new(dir.path()));
        let startup = api.startup();
        assert_eq!(startup.report.migration, MigrationOutcome::NoLegacyData);
        assert_eq!(startup.report.verified, Some(false));
        assert!(startup.checks.is_empty());
        Ok(())
    }

    #[test]
    fn add_update_remove_round_trip_through_storage() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut api = CheckLedgerApi::new(LedgerConfig::new(dir.path()));

        let first = api.add_check(draft("000001"))?;
        assert_eq!(first.save, SaveOutcome::Primary { written: 1 });
        let second = api.add_check(draft("000002"))?;
        assert_eq!(second.save, SaveOutcome::Primary { written: 2 });

        let duplicate = api.add_check(draft("000001"));
        let Err(err) = duplicate else {
            return Err(anyhow!("duplicate check number should be rejected"));
        };
        assert!(matches!(err.downcast_ref::<LedgerError>(), Some(LedgerError::Validation(_))));

        let mut edited = first.check.clone();
        edited.amount = AmountValue::Number(80.0);
        api.update_check(edited)?;
        let stored = api.load_all().checks;
        assert!(stored.iter().any(|check| {
            check.id == first.check.id && check.amount.value().is_some_and(|amount| amount > 79.0)
        }));

        let removed = api.remove_check(&second.check.id)?;
        assert_eq!(removed.save, SaveOutcome::Primary { written: 1 });

        let last = api.remove_check(&first.check.id)?;
        assert_eq!(last.save, SaveOutcome::RefusedEmptyOverwrite { existing: 1 });
        assert_eq!(api.load_all().checks.len(), 1);
        Ok(())
    }

    #[test]
    fn export_then_import_restores_the_set() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut api = CheckLedgerApi::new(LedgerConfig::new(dir.path().join("a")));
        api.add_check(draft("000001"))?;
        api.add_check(draft("000002"))?;

        let exported = api.export_current(None)?;
        assert_eq!(exported.count, 2);
        assert!(exported.path.starts_with(api.config().export_dir()));
        let current = api.load_all().checks;
        assert!(api.export_snapshot(&current));

        let mut other = CheckLedgerApi::new(LedgerConfig::new(dir.path().join("b")));
        assert_eq!(other.import_snapshot(&exported.path)?, SaveOutcome::Primary { written: 2 });
        assert_eq!(other.load_all().checks.len(), 2);
        Ok(())
    }

    #[test]
    fn import_of_missing_file_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut api = CheckLedgerApi::new(LedgerConfig::new(dir.path()));
        assert!(api.import_snapshot(&dir.path().join("missing.json")).is_err());
        Ok(())
    }

    #[test]
    fn unusable_database_path_degrades_to_fallback_snapshot() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = LedgerConfig::new(dir.path());
        fs::create_dir_all(config.database_path())?;

        let mut api = CheckLedgerApi::new(config.clone());
        let added = api.add_check(draft("000001"))?;
        assert_eq!(added.save, SaveOutcome::Fallback { written: 1 });

        let mut reopened = CheckLedgerApi::new(config);
        let startup = reopened.startup();
        assert_eq!(startup.report.source, LoadSource::Fallback);
        assert_eq!(startup.report.verified, None);
        assert_eq!(startup.checks, vec![added.check]);
        Ok(())
    }

    #[test]
    fn db_maintenance_operations_open_the_primary_store() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut api = CheckLedgerApi::new(LedgerConfig::new(dir.path()));
        api.add_check(draft("000001"))?;

        assert_eq!(api.schema_status()?.current_version, 1);
        let report = api.integrity_check()?;
        assert!(report.quick_check_ok);
        assert_eq!(report.check_count, 1);

        let backup = dir.path().join("backup.sqlite3");
        assert_eq!(api.backup_database(&backup)?, 1);
        assert!(backup.exists());

        let number = api.next_check_number();
        assert_eq!(number.len(), 6);
        assert_ne!(number, "000001");
        Ok(())
    }
}
