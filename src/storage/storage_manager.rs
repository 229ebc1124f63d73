use std::{path::Path, sync::Arc};

use tracing::info;

use crate::{
    config::EngineConfig,
    mvcc::{transaction::IsolationLevel, version_manager::VersionManager},
    storage::{
        booter::Booter, bplus_tree::BPlusTree, data_manager::DataManager,
        ledger::TransactionLedger, recovery::RecoveryStats,
    },
    types::{DB_SUFFIX, Uid, Xid, error::DatabaseError, read_u64, suffixed_path},
};

/// The engine: ledger, data manager, version manager and the primary index,
/// all sharing one base path.
pub struct StorageManager {
    config: EngineConfig,
    ledger: Arc<TransactionLedger>,
    dm: Arc<DataManager>,
    vm: VersionManager,
    primary: BPlusTree,
}

impl StorageManager {
    pub fn create(config: EngineConfig) -> Result<Self, DatabaseError> {
        let path = config.path.clone();
        info!(path = %path.display(), memory = config.memory, "creating database");
        let db_path = suffixed_path(&path, DB_SUFFIX);
        if db_path.exists() {
            return Err(DatabaseError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", db_path.display()),
            )));
        }
        let ledger = Arc::new(TransactionLedger::create(&path)?);
        let dm = Arc::new(DataManager::create(&path, config.memory, Arc::clone(&ledger))?);
        let boot_uid = BPlusTree::create(&dm)?;
        Booter::create(&path, &boot_uid.to_be_bytes())?;
        Self::assemble(config, ledger, dm, boot_uid)
    }

    pub fn open(config: EngineConfig) -> Result<Self, DatabaseError> {
        let path = config.path.clone();
        info!(path = %path.display(), memory = config.memory, "opening database");
        let ledger = Arc::new(TransactionLedger::open(&path)?);
        let dm = Arc::new(DataManager::open(&path, config.memory, Arc::clone(&ledger))?);
        let boot = Booter::open(&path)?.load()?;
        if boot.len() != 8 {
            return Err(DatabaseError::BootFile {
                reason: format!("boot file holds {} bytes, expected 8", boot.len()),
            });
        }
        Self::assemble(config, ledger, dm, read_u64(&boot, 0))
    }

    /// Opens the database at `config.path`, creating it when it is missing.
    pub fn open_or_create(config: EngineConfig) -> Result<Self, DatabaseError> {
        if suffixed_path(&config.path, DB_SUFFIX).exists() {
            Self::open(config)
        } else {
            Self::create(config)
        }
    }

    fn assemble(
        config: EngineConfig,
        ledger: Arc<TransactionLedger>,
        dm: Arc<DataManager>,
        boot_uid: Uid,
    ) -> Result<Self, DatabaseError> {
        let vm = VersionManager::new(Arc::clone(&ledger), Arc::clone(&dm));
        let primary = BPlusTree::load(boot_uid, Arc::clone(&dm))?;
        Ok(Self {
            config,
            ledger,
            dm,
            vm,
            primary,
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<TransactionLedger> {
        &self.ledger
    }

    pub fn data_manager(&self) -> &Arc<DataManager> {
        &self.dm
    }

    pub fn version_manager(&self) -> &VersionManager {
        &self.vm
    }

    pub fn recovery_stats(&self) -> Option<&RecoveryStats> {
        self.dm.recovery_stats()
    }

    /// Starts a transaction at the configured isolation level.
    pub fn begin(&self) -> Result<Xid, DatabaseError> {
        self.vm.begin(self.config.isolation)
    }

    pub fn begin_transaction(&self, level: IsolationLevel) -> Result<Xid, DatabaseError> {
        self.vm.begin(level)
    }

    pub fn commit(&self, xid: Xid) -> Result<(), DatabaseError> {
        self.vm.commit(xid)
    }

    pub fn abort(&self, xid: Xid) -> Result<(), DatabaseError> {
        self.vm.abort(xid)
    }

    pub fn read_version(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>, DatabaseError> {
        self.vm.read(xid, uid)
    }

    pub fn insert_version(&self, xid: Xid, data: &[u8]) -> Result<Uid, DatabaseError> {
        self.vm.insert(xid, data)
    }

    pub fn delete_version(&self, xid: Xid, uid: Uid) -> Result<bool, DatabaseError> {
        self.vm.delete(xid, uid)
    }

    /// Creates another empty index and returns its boot uid.
    pub fn create_index(&self) -> Result<Uid, DatabaseError> {
        BPlusTree::create(&self.dm)
    }

    /// Loads an index by boot uid. Close it before closing the engine.
    pub fn load_index(&self, boot_uid: Uid) -> Result<BPlusTree, DatabaseError> {
        BPlusTree::load(boot_uid, Arc::clone(&self.dm))
    }

    pub fn primary_index(&self) -> &BPlusTree {
        &self.primary
    }

    /// Shuts down cleanly, so the next open skips recovery.
    pub fn close(self) -> Result<(), DatabaseError> {
        self.primary.close()?;
        self.dm.close()?;
        self.ledger.close()?;
        info!(path = %self.config.path.display(), "closed database");
        Ok(())
    }
}
