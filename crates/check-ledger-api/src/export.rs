use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use check_ledger_core::{decode_checks, format_canonical_date, Check};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::Date;

use crate::fallback::write_atomically;

pub const EXPORT_FILE_PREFIX: &str = "check-manager-backup-";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportedSnapshot {
    pub path: PathBuf,
    pub count: usize,
    pub sha256: String,
}

/// `check-manager-backup-YYYY-MM-DD.json` for the given day.
#[must_use]
pub fn export_file_name(date: Date) -> String {
    format!("{EXPORT_FILE_PREFIX}{}.json", format_canonical_date(date))
}

/// Write `checks` as one pretty-printed JSON array into `dir`.
///
/// A second export on the same day replaces the earlier file.
///
/// # Errors
/// Returns an error when the snapshot cannot be serialized or written.
pub fn write_snapshot(checks: &[Check], dir: &Path, date: Date) -> Result<ExportedSnapshot> {
    let path = dir.join(export_file_name(date));
    let body = serde_json::to_string_pretty(checks).context("failed to serialize export snapshot")?;

    write_atomically(&path, body.as_bytes())
        .with_context(|| format!("failed to write export file {}", path.display()))?;

    let sha256 = format!("{:x}", Sha256::digest(body.as_bytes()));
    tracing::info!(count = checks.len(), path = %path.display(), %sha256, "exported checks");
    Ok(ExportedSnapshot { path, count: checks.len(), sha256 })
}

/// Like [`write_snapshot`] but reports failure as `false` instead of an error.
#[must_use]
pub fn export_snapshot(checks: &[Check], dir: &Path, date: Date) -> bool {
    match write_snapshot(checks, dir, date) {
        Ok(_) => true,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), dir = %dir.display(), "export failed");
            false
        }
    }
}

/// Read a snapshot written by [`write_snapshot`].
///
/// # Errors
/// Returns an error when the file cannot be read or is not a JSON array.
pub fn read_snapshot(path: &Path) -> Result<Vec<Check>> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot file {}", path.display()))?;
    let decoded = decode_checks(&body)
        .with_context(|| format!("snapshot file {} is not a check array", path.display()))?;
    if decoded.skipped > 0 {
        tracing::warn!(
            skipped = decoded.skipped,
            path = %path.display(),
            "snapshot elements without an id were not read"
        );
    }
    Ok(decoded.checks)
}
