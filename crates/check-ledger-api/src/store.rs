//! Primary store with a key/value fallback behind it.
//!
//! Reads prefer the primary store and recover from the pre-migration backup
//! or the fallback snapshot when needed. Writes go to the primary store and
//! land in the fallback snapshot only when the primary write fails. Neither
//! path returns an error to the caller; the outcome types say what happened.

use check_ledger_core::{classify_year, decode_checks, Check, YearEra};
use check_ledger_store_sqlite::ReplaceOutcome;
use serde::{Deserialize, Serialize};

use crate::fallback::{
    migration_done, KeyValueStore, BACKUP_PRE_MIGRATION_KEY, FALLBACK_SNAPSHOT_KEY,
};
use crate::primary::PrimaryStore;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    Primary,
    /// Primary was empty after migration; records came from the pre-migration backup.
    RecoveredFromBackup,
    /// Primary could not be read; records came from the fallback snapshot.
    Fallback,
    /// Neither backend produced records.
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Loaded {
    pub checks: Vec<Check>,
    pub source: LoadSource,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaveOutcome {
    Primary { written: usize },
    /// Empty write refused because the target still holds `existing` records.
    RefusedEmptyOverwrite { existing: u64 },
    /// Primary write failed; the set was kept in the fallback snapshot.
    Fallback { written: usize },
    Failed,
}

impl SaveOutcome {
    /// True when the primary store now holds exactly the saved set.
    #[must_use]
    pub fn is_primary(self) -> bool {
        matches!(self, Self::Primary { .. })
    }

    #[must_use]
    pub fn is_persisted(self) -> bool {
        matches!(self, Self::Primary { .. } | Self::Fallback { .. })
    }
}

pub struct CheckStore<P, K> {
    primary: P,
    fallback: K,
}

impl<P: PrimaryStore, K: KeyValueStore> CheckStore<P, K> {
    pub fn new(primary: P, fallback: K) -> Self {
        Self { primary, fallback }
    }

    pub fn primary_mut(&mut self) -> &mut P {
        &mut self.primary
    }

    pub fn fallback(&self) -> &K {
        &self.fallback
    }

    /// Read every record, normalizing dates on the way out.
    pub fn load_all(&mut self) -> Loaded {
        let loaded = match self.primary.load_all() {
            Ok(checks) if checks.is_empty() && migration_done(&self.fallback) => {
                self.recover_from_backup()
            }
            Ok(checks) => {
                tracing::info!(count = checks.len(), source = "primary", "loaded checks");
                Loaded { checks, source: LoadSource::Primary }
            }
            Err(err) => {
                tracing::warn!(
                    error = %format!("{err:#}"),
                    "primary load failed; trying fallback snapshot"
                );
                self.load_fallback_snapshot()
            }
        };

        let checks = loaded.checks.iter().map(Check::normalized).collect::<Vec<_>>();
        for check in &checks {
            if let Some(text) = check.due_date.as_text() {
                if classify_year(text) == YearEra::BelowThreshold {
                    tracing::debug!(
                        id = %check.id,
                        due_date = text,
                        "due date year below Gregorian threshold; kept as stored"
                    );
                }
            }
        }
        Loaded { checks, source: loaded.source }
    }

    /// Persist `checks` as the whole record set.
    pub fn save_all(&mut self, checks: &[Check]) -> SaveOutcome {
        match self.primary.save_all(checks) {
            Ok(ReplaceOutcome::Replaced { written, previous }) => {
                tracing::info!(count = written, previous, "saved checks to primary store");
                SaveOutcome::Primary { written }
            }
            Ok(ReplaceOutcome::RefusedEmpty { existing }) => {
                tracing::warn!(existing, "refusing to overwrite stored checks with an empty set");
                SaveOutcome::RefusedEmptyOverwrite { existing }
            }
            Err(err) => {
                tracing::warn!(
                    error = %format!("{err:#}"),
                    "primary save failed; writing fallback snapshot"
                );
                self.save_fallback_snapshot(checks)
            }
        }
    }

    fn recover_from_backup(&self) -> Loaded {
        let empty = Loaded { checks: Vec::new(), source: LoadSource::Primary };
        match read_checks(&self.fallback, BACKUP_PRE_MIGRATION_KEY) {
            Some(checks) if !checks.is_empty() => {
                tracing::warn!(
                    count = checks.len(),
                    key = BACKUP_PRE_MIGRATION_KEY,
                    source = "backup",
                    "primary store empty after migration; recovered checks from backup"
                );
                Loaded { checks, source: LoadSource::RecoveredFromBackup }
            }
            _ => empty,
        }
    }

    fn load_fallback_snapshot(&self) -> Loaded {
        match read_checks(&self.fallback, FALLBACK_SNAPSHOT_KEY) {
            Some(checks) => {
                tracing::info!(count = checks.len(), source = "fallback", "loaded checks");
                Loaded { checks, source: LoadSource::Fallback }
            }
            None => {
                tracing::warn!("no usable fallback snapshot; returning empty record set");
                Loaded { checks: Vec::new(), source: LoadSource::Empty }
            }
        }
    }

    fn save_fallback_snapshot(&self, checks: &[Check]) -> SaveOutcome {
        if checks.is_empty() {
            let existing = read_checks(&self.fallback, FALLBACK_SNAPSHOT_KEY)
                .as_deref()
                .map_or(0, <[Check]>::len);
            if existing > 0 {
                tracing::warn!(
                    existing,
                    key = FALLBACK_SNAPSHOT_KEY,
                    "refusing to overwrite fallback snapshot with an empty set"
                );
                let existing = u64::try_from(existing).unwrap_or(u64::MAX);
                return SaveOutcome::RefusedEmptyOverwrite { existing };
            }
        }

        let encoded = match serde_json::to_string(checks) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize fallback snapshot");
                return SaveOutcome::Failed;
            }
        };

        match self.fallback.set(FALLBACK_SNAPSHOT_KEY, &encoded) {
            Ok(()) => {
                tracing::info!(
                    count = checks.len(),
                    key = FALLBACK_SNAPSHOT_KEY,
                    "saved checks to fallback snapshot"
                );
                SaveOutcome::Fallback { written: checks.len() }
            }
            Err(err) => {
                tracing::error!(error = %err, key = FALLBACK_SNAPSHOT_KEY, "fallback save failed");
                SaveOutcome::Failed
            }
        }
    }
}

/// Decode a JSON record array stored under `key`, element by element.
/// Missing values and values that are not arrays yield `None`.
pub(crate) fn read_checks<K: KeyValueStore + ?Sized>(kv: &K, key: &str) -> Option<Vec<Check>> {
    let raw = match kv.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            tracing::warn!(key, error = %err, "failed to read fallback key");
            return None;
        }
    };

    match decode_checks(&raw) {
        Ok(decoded) => {
            if decoded.skipped > 0 {
                tracing::warn!(
                    key,
                    skipped = decoded.skipped,
                    "stored elements without an id were skipped"
                );
            }
            Some(decoded.checks)
        }
        Err(err) => {
            tracing::warn!(key, error = %err, "stored value is not a check array");
            None
        }
    }
}
