use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use tempfile::TempDir;

use crate::{
    config::EngineConfig,
    storage::{data_manager::DataManager, ledger::TransactionLedger, storage_manager::StorageManager},
    types::{DB_SUFFIX, LOG_SUFFIX, XID_SUFFIX, error::DatabaseError, suffixed_path},
};

/// Memory budget used by tests: 64 pages.
pub const TEST_MEMORY: u64 = 64 * 8192;

/// A scratch directory holding one database base path. Everything is
/// removed when it is dropped.
pub struct TempDatabase {
    dir: TempDir,
    pub path: PathBuf,
}

impl TempDatabase {
    pub fn new() -> Self {
        Self::with_prefix("lumbung_test")
    }

    pub fn with_prefix(prefix: &str) -> Self {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .unwrap_or_else(|e| panic!("failed to create temp dir: {e}"));
        let path = dir.path().join("db");
        Self { dir, path }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> EngineConfig {
        EngineConfig::new(&self.path).with_memory(TEST_MEMORY)
    }

    pub fn create_storage_manager(&self) -> Result<StorageManager, DatabaseError> {
        StorageManager::create(self.config())
    }

    pub fn open_storage_manager(&self) -> Result<StorageManager, DatabaseError> {
        StorageManager::open(self.config())
    }

    pub fn create_data_manager(&self) -> Result<(Arc<TransactionLedger>, DataManager), DatabaseError> {
        let ledger = Arc::new(TransactionLedger::create(&self.path)?);
        let dm = DataManager::create(&self.path, TEST_MEMORY, Arc::clone(&ledger))?;
        Ok((ledger, dm))
    }

    pub fn open_data_manager(&self) -> Result<(Arc<TransactionLedger>, DataManager), DatabaseError> {
        let ledger = Arc::new(TransactionLedger::open(&self.path)?);
        let dm = DataManager::open(&self.path, TEST_MEMORY, Arc::clone(&ledger))?;
        Ok((ledger, dm))
    }

    /// Copies the page, log and ledger files aside under `tag`.
    pub fn snapshot_files(&self, tag: &str) -> Result<(), DatabaseError> {
        for suffix in [DB_SUFFIX, LOG_SUFFIX, XID_SUFFIX] {
            let from = suffixed_path(&self.path, suffix);
            fs::copy(&from, self.saved_path(tag, suffix))?;
        }
        Ok(())
    }

    /// Puts one saved file back in place.
    pub fn restore_file(&self, tag: &str, suffix: &str) -> Result<(), DatabaseError> {
        fs::copy(self.saved_path(tag, suffix), suffixed_path(&self.path, suffix))?;
        Ok(())
    }

    fn saved_path(&self, tag: &str, suffix: &str) -> PathBuf {
        self.dir.path().join(format!("{tag}.{suffix}"))
    }
}

impl Default for TempDatabase {
    fn default() -> Self {
        Self::new()
    }
}
