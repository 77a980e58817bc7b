use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use check_ledger_core::{Check, CheckKind};
use rusqlite::{params, Connection, DatabaseName, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

pub const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS checks (
  id TEXT PRIMARY KEY,
  check_type TEXT CHECK (check_type IN ('Given','Taken')),
  amount REAL,
  due_date TEXT,
  check_number TEXT NOT NULL,
  record_json TEXT NOT NULL,
  stored_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_checks_due_date ON checks(due_date);
CREATE INDEX IF NOT EXISTS idx_checks_check_number ON checks(check_number);
";

/// Keyed check collection backed by one `SQLite` database file.
pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

/// Result of one replace-all write.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplaceOutcome {
    Replaced { written: usize, previous: u64 },
    /// An empty write was refused because the collection still holds records.
    RefusedEmpty { existing: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub check_count: u64,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open a SQLite-backed check store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA busy_timeout = 5000;
             PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Create the check collection on first use and record the schema version.
    ///
    /// Runs under an immediate transaction so two processes opening a fresh
    /// database at once cannot both create the collection.
    ///
    /// # Errors
    /// Returns an error when the schema cannot be created or the database
    /// reports a version newer than this build understands.
    pub fn migrate(&mut self) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start schema transaction")?;

        tx.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&tx)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        if version < 1 {
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&tx, 1)?;
            tracing::info!(version = 1, "applied check store schema migration");
        }

        tx.commit().context("failed to commit schema transaction")?;
        Ok(())
    }

    /// Number of stored checks.
    ///
    /// # Errors
    /// Returns an error when the collection cannot be queried.
    pub fn count_checks(&self) -> Result<u64> {
        count_checks(&self.conn)
    }

    /// Load every stored check exactly as it was written.
    ///
    /// A row whose record lost its `id` takes it from the key column. Rows
    /// whose record is not a JSON object are logged and skipped.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read from `SQLite`.
    pub fn list_checks(&self) -> Result<Vec<Check>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, record_json FROM checks ORDER BY due_date ASC, id ASC")?;
        let mut rows = stmt.query([])?;
        let mut checks = Vec::new();

        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let record_json: String = row.get(1)?;
            match decode_row(&id, &record_json) {
                Ok(check) => checks.push(check),
                Err(err) => tracing::warn!(%id, error = %err, "skipping unreadable stored check"),
            }
        }

        Ok(checks)
    }

    /// Replace the whole collection with `checks` in one transaction.
    ///
    /// An empty `checks` is refused while the collection is non-empty; the
    /// stored rows are left untouched in that case. A duplicate id aborts the
    /// transaction and leaves the previous contents in place.
    ///
    /// # Errors
    /// Returns an error when serialization or any write in the transaction fails.
    pub fn replace_all(&mut self, checks: &[Check]) -> Result<ReplaceOutcome> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start replace transaction")?;

        let previous = count_checks(&tx)?;
        if checks.is_empty() && previous > 0 {
            return Ok(ReplaceOutcome::RefusedEmpty { existing: previous });
        }

        tx.execute("DELETE FROM checks", []).context("failed to clear checks")?;

        let stored_at = now_rfc3339()?;
        for check in checks {
            let record_json =
                serde_json::to_string(check).context("failed to serialize check record")?;
            tx.execute(
                "INSERT INTO checks(id, check_type, amount, due_date, check_number, record_json, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    check.id.as_str(),
                    check.kind.known().map(CheckKind::as_str),
                    check.amount.value(),
                    check.due_date.as_text(),
                    check.check_number,
                    record_json,
                    stored_at,
                ],
            )
            .with_context(|| format!("failed to insert check {}", check.id))?;
        }

        tx.commit().context("failed to commit replace transaction")?;
        Ok(ReplaceOutcome::Replaced { written: checks.len(), previous })
    }

    /// Copy the ledger database to `out_file` with the online backup API and
    /// return the number of checks in the copy.
    ///
    /// # Errors
    /// Returns an error when the target directory cannot be created, the copy
    /// fails, or the copy cannot be opened to count its checks.
    pub fn backup_database(&self, out_file: &Path) -> Result<u64> {
        if let Some(parent) = out_file.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create backup directory {}", parent.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to back up check store to {}", out_file.display()))?;

        let copy = Connection::open(out_file)
            .with_context(|| format!("failed to open check store backup {}", out_file.display()))?;
        let copied = count_checks(&copy)?;
        tracing::info!(path = %out_file.display(), copied, "backed up check store");
        Ok(copied)
    }

    /// Run quick-check and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let schema_status = self.schema_status()?;
        let check_count = if schema_status.current_version >= 1 { self.count_checks()? } else { 0 };

        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            check_count,
            schema_status,
        })
    }
}

fn decode_row(id: &str, record_json: &str) -> Result<Check> {
    let mut record: Value = serde_json::from_str(record_json)
        .with_context(|| format!("stored check {id} is not valid JSON"))?;
    let Value::Object(fields) = &mut record else {
        return Err(anyhow!("stored check {id} is not a JSON object"));
    };
    fields.entry("id").or_insert_with(|| Value::String(id.to_string()));
    serde_json::from_value(record).with_context(|| format!("failed to decode stored check {id}"))
}

fn count_checks(conn: &Connection) -> Result<u64> {
    let count = conn
        .query_row("SELECT COUNT(*) FROM checks", [], |row| row.get::<_, i64>(0))
        .context("failed to count checks")?;
    u64::try_from(count).context("negative check count")
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
