//! One-time transfer of the legacy flat record set into the primary store.

use check_ledger_core::decode_checks;
use serde::{Deserialize, Serialize};

use crate::fallback::{
    mark_migration_done, migration_done, KeyValueStore, BACKUP_PRE_MIGRATION_KEY,
    FALLBACK_SNAPSHOT_KEY, LEGACY_CHECKS_KEY,
};
use crate::primary::PrimaryStore;
use crate::store::{read_checks, CheckStore, SaveOutcome};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// The completion flag was already set; nothing ran.
    AlreadyDone,
    NoLegacyData,
    EmptyLegacyData,
    Migrated { count: usize },
    /// Legacy records were read but the primary store did not accept them.
    /// The completion flag stays unset and the next run retries from the
    /// fallback snapshot `save` wrote, so edits made in between are kept.
    Deferred { count: usize, save: SaveOutcome },
    Failed { reason: String },
}

impl MigrationOutcome {
    /// Whether the completion flag is set after this run.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            Self::AlreadyDone | Self::NoLegacyData | Self::EmptyLegacyData | Self::Migrated { .. }
        )
    }
}

/// Move legacy records into the primary store, once.
///
/// The legacy value is copied verbatim to the pre-migration backup key before
/// any primary write. Re-running after completion is a no-op; re-running after
/// an interrupted run repeats the whole transfer, which replace-all makes safe.
///
/// Legacy elements are decoded one by one. Malformed fields pass through
/// unchanged and elements without an `id` stay only in the backup. When a
/// fallback snapshot exists the flag was never set, so the snapshot came from
/// a deferred run and the saves after it; it is migrated in place of the
/// legacy value.
pub fn migrate<P, K>(store: &mut CheckStore<P, K>) -> MigrationOutcome
where
    P: PrimaryStore,
    K: KeyValueStore,
{
    if migration_done(store.fallback()) {
        tracing::debug!("migration already completed; skipping");
        return MigrationOutcome::AlreadyDone;
    }

    let legacy = match store.fallback().get(LEGACY_CHECKS_KEY) {
        Ok(legacy) => legacy,
        Err(err) => return failed(format!("failed to read legacy data: {err}")),
    };

    let Some(raw) = legacy else {
        tracing::info!(key = LEGACY_CHECKS_KEY, "no legacy data found");
        return finish(store.fallback(), MigrationOutcome::NoLegacyData);
    };

    let decoded = match decode_checks(&raw) {
        Ok(decoded) => decoded,
        Err(err) => return failed(format!("legacy data is not a check array: {err}")),
    };

    if decoded.checks.is_empty() && decoded.skipped == 0 {
        tracing::info!(key = LEGACY_CHECKS_KEY, "legacy data is empty; nothing to migrate");
        return finish(store.fallback(), MigrationOutcome::EmptyLegacyData);
    }

    tracing::info!(count = decoded.checks.len(), "migrating legacy checks");
    if let Err(err) = store.fallback().set(BACKUP_PRE_MIGRATION_KEY, &raw) {
        return failed(format!("failed to write pre-migration backup: {err}"));
    }
    tracing::info!(key = BACKUP_PRE_MIGRATION_KEY, "wrote pre-migration backup");
    if decoded.skipped > 0 {
        tracing::warn!(
            skipped = decoded.skipped,
            key = BACKUP_PRE_MIGRATION_KEY,
            "legacy elements without an id kept in the backup only"
        );
    }

    let checks = match read_checks(store.fallback(), FALLBACK_SNAPSHOT_KEY) {
        Some(snapshot) if !snapshot.is_empty() => {
            tracing::info!(
                count = snapshot.len(),
                key = FALLBACK_SNAPSHOT_KEY,
                "fallback snapshot from a deferred migration supersedes legacy data"
            );
            snapshot
        }
        _ => decoded.checks,
    };
    if checks.is_empty() {
        return finish(store.fallback(), MigrationOutcome::EmptyLegacyData);
    }

    let count = checks.len();
    match store.save_all(&checks) {
        SaveOutcome::Primary { .. } => {
            finish(store.fallback(), MigrationOutcome::Migrated { count })
        }
        save => {
            tracing::warn!(
                count,
                ?save,
                "legacy checks did not reach the primary store; will retry"
            );
            MigrationOutcome::Deferred { count, save }
        }
    }
}

fn finish<K: KeyValueStore>(kv: &K, outcome: MigrationOutcome) -> MigrationOutcome {
    match mark_migration_done(kv) {
        Ok(()) => {
            tracing::info!(?outcome, "migration completed");
            outcome
        }
        Err(err) => failed(format!("failed to set migration flag: {err}")),
    }
}

fn failed(reason: String) -> MigrationOutcome {
    tracing::error!(%reason, "migration failed; will retry on next start");
    MigrationOutcome::Failed { reason }
}
