use crate::fallback::{
    migration_done, KeyValueStore, BACKUP_PRE_MIGRATION_KEY, FALLBACK_SNAPSHOT_KEY,
    LEGACY_CHECKS_KEY, MIGRATION_DONE_KEY,
};
use crate::primary::PrimaryStore;
use crate::store::CheckStore;

/// Keys removed once the primary store is confirmed to hold migrated data.
pub const CLEANUP_KEYS: [&str; 4] =
    [LEGACY_CHECKS_KEY, FALLBACK_SNAPSHOT_KEY, BACKUP_PRE_MIGRATION_KEY, MIGRATION_DONE_KEY];

/// Confirm migrated data reached the primary store and drop the legacy copies.
///
/// Returns whether the primary store holds at least one record; an unreadable
/// primary store reports `false` and touches nothing.
pub fn verify_and_cleanup<P, K>(store: &mut CheckStore<P, K>) -> bool
where
    P: PrimaryStore,
    K: KeyValueStore,
{
    let count = match store.primary_mut().count() {
        Ok(count) => count,
        Err(err) => {
            tracing::error!(
                error = %format!("{err:#}"),
                "verification could not read primary store"
            );
            return false;
        }
    };
    tracing::info!(count, "verifying migrated checks");

    let kv = store.fallback();
    if count > 0 && migration_done(kv) {
        for key in CLEANUP_KEYS {
            if let Err(err) = kv.remove(key) {
                tracing::warn!(key, error = %err, "failed to remove legacy key");
            }
        }
        tracing::info!("migration verified; legacy data cleaned up");
    } else if count == 0 && has_backup(kv) {
        tracing::warn!(key = BACKUP_PRE_MIGRATION_KEY, "primary store is empty; keeping backup");
    }

    count > 0
}

fn has_backup<K: KeyValueStore>(kv: &K) -> bool {
    matches!(kv.get(BACKUP_PRE_MIGRATION_KEY), Ok(Some(_)))
}
