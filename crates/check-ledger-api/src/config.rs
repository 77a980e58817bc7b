use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DATA_DIR_ENV: &str = "CHECK_LEDGER_DATA_DIR";

const APP_DIR_NAME: &str = "CheckLedger";
const LOCAL_DIR_NAME: &str = ".check-ledger";
const DATABASE_FILE: &str = "check_ledger.sqlite3";
const FALLBACK_FILE: &str = "fallback_store.json";
const EXPORT_DIR: &str = "exports";

/// On-disk layout of one ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerConfig {
    pub data_dir: PathBuf,
}

impl LedgerConfig {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    /// Resolve the data directory from an explicit override, the
    /// `CHECK_LEDGER_DATA_DIR` environment variable, or the platform data dir.
    #[must_use]
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        resolve_with(explicit, std::env::var_os(DATA_DIR_ENV), dirs::data_dir())
    }

    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    #[must_use]
    pub fn fallback_path(&self) -> PathBuf {
        self.data_dir.join(FALLBACK_FILE)
    }

    #[must_use]
    pub fn export_dir(&self) -> PathBuf {
        self.data_dir.join(EXPORT_DIR)
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

fn resolve_with(
    explicit: Option<PathBuf>,
    env_value: Option<OsString>,
    platform_data_dir: Option<PathBuf>,
) -> LedgerConfig {
    if let Some(path) = explicit {
        return LedgerConfig::new(path);
    }
    if let Some(value) = env_value.filter(|value| !value.is_empty()) {
        return LedgerConfig::new(PathBuf::from(value));
    }
    match platform_data_dir {
        Some(base) => LedgerConfig::new(base.join(APP_DIR_NAME)),
        None => LedgerConfig::new(PathBuf::from(LOCAL_DIR_NAME)),
    }
}
