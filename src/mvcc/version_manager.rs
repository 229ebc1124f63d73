use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    mvcc::{
        lock_table::LockTable,
        transaction::{ConflictKind, IsolationLevel, Transaction},
        visibility::{is_version_skip, is_visible},
    },
    storage::{data_item::DataItem, data_manager::DataManager, ledger::TransactionLedger},
    types::{
        SUPER_XID, Uid, Xid,
        entry::{OF_PAYLOAD, OF_XMAX, VersionHeader, wrap_entry},
        error::DatabaseError,
    },
};

/// Versioned records on top of the data manager.
pub struct VersionManager {
    ledger: Arc<TransactionLedger>,
    dm: Arc<DataManager>,
    active: Mutex<HashMap<Xid, Arc<Transaction>>>,
    lock_table: LockTable,
}

impl VersionManager {
    pub fn new(ledger: Arc<TransactionLedger>, dm: Arc<DataManager>) -> Self {
        let mut active = HashMap::new();
        active.insert(
            SUPER_XID,
            Arc::new(Transaction::new(SUPER_XID, IsolationLevel::ReadCommitted, std::iter::empty())),
        );
        Self {
            ledger,
            dm,
            active: Mutex::new(active),
            lock_table: LockTable::new(),
        }
    }

    pub fn begin(&self, level: IsolationLevel) -> Result<Xid, DatabaseError> {
        let mut active = self.active.lock();
        let xid = self.ledger.begin()?;
        let t = Transaction::new(xid, level, active.keys().copied());
        active.insert(xid, Arc::new(t));
        info!(xid, %level, "transaction started");
        Ok(xid)
    }

    fn transaction(&self, xid: Xid) -> Result<Arc<Transaction>, DatabaseError> {
        self.active
            .lock()
            .get(&xid)
            .cloned()
            .ok_or(DatabaseError::UnknownTransaction { xid })
    }

    /// Number of registered transactions, the super transaction included.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Payload of the entry at `uid` if `xid` can see it.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>, DatabaseError> {
        let t = self.transaction(xid)?;
        t.check_conflict()?;
        let Some(item) = self.dm.read(uid)? else {
            return Ok(None);
        };
        let raw = item.data();
        self.dm.release(&item)?;

        let header = VersionHeader::from_bytes(&raw)?;
        if is_visible(&self.ledger, &t, &header)? {
            Ok(Some(raw[OF_PAYLOAD..].to_vec()))
        } else {
            Ok(None)
        }
    }

    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid, DatabaseError> {
        let t = self.transaction(xid)?;
        t.check_conflict()?;
        self.dm.insert(xid, &wrap_entry(xid, data))
    }

    /// Marks the entry at `uid` deleted by `xid`.
    ///
    /// Returns false when the entry is invisible or `xid` already deleted
    /// it. May block behind the current owner of the row. A deadlock or a
    /// version skip aborts `xid` and is returned as the error.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool, DatabaseError> {
        let t = self.transaction(xid)?;
        t.check_conflict()?;
        let Some(item) = self.dm.read(uid)? else {
            return Ok(false);
        };
        let result = self.delete_item(&t, &item);
        self.dm.release(&item)?;
        result
    }

    fn delete_item(&self, t: &Transaction, item: &DataItem) -> Result<bool, DatabaseError> {
        let xid = t.xid;
        let header = VersionHeader::from_bytes(&item.data())?;
        if !is_visible(&self.ledger, t, &header)? {
            return Ok(false);
        }

        match self.lock_table.add(xid, item.uid()) {
            Ok(Some(handle)) => {
                debug!(xid, uid = item.uid(), "delete waiting for row owner");
                handle.wait();
            }
            Ok(None) => {}
            Err(e) => {
                if let DatabaseError::Deadlock { .. } = e {
                    self.auto_abort(t, ConflictKind::Deadlock)?;
                }
                return Err(e);
            }
        }

        let header = VersionHeader::from_bytes(&item.data())?;
        if header.xmax == xid {
            return Ok(false);
        }
        if is_version_skip(&self.ledger, t, &header)? {
            warn!(xid, uid = item.uid(), xmax = header.xmax, "version skip");
            self.auto_abort(t, ConflictKind::ConcurrentUpdate)?;
            return Err(ConflictKind::ConcurrentUpdate.to_error(xid));
        }

        let mut guard = item.before();
        guard.write_data(OF_XMAX, &xid.to_be_bytes())?;
        guard.after(xid)?;
        Ok(true)
    }

    /// Commits `xid`. The ledger records the outcome before any waiter on
    /// its rows is woken.
    pub fn commit(&self, xid: Xid) -> Result<(), DatabaseError> {
        if xid == SUPER_XID {
            return Err(DatabaseError::UnknownTransaction { xid });
        }
        let t = self.transaction(xid)?;
        t.check_conflict()?;
        self.active.lock().remove(&xid);
        let result = self.ledger.commit(xid);
        self.lock_table.remove(xid);
        result?;
        info!(xid, "transaction committed");
        Ok(())
    }

    pub fn abort(&self, xid: Xid) -> Result<(), DatabaseError> {
        if xid == SUPER_XID {
            return Err(DatabaseError::UnknownTransaction { xid });
        }
        self.intern_abort(xid, false)
    }

    fn auto_abort(&self, t: &Transaction, kind: ConflictKind) -> Result<(), DatabaseError> {
        t.set_conflict(kind);
        self.intern_abort(t.xid, true)?;
        t.set_auto_aborted();
        warn!(xid = t.xid, ?kind, "transaction aborted automatically");
        Ok(())
    }

    // an auto-aborted transaction stays registered until the caller aborts
    // it, but its locks and ledger status are only released once
    fn intern_abort(&self, xid: Xid, auto: bool) -> Result<(), DatabaseError> {
        let t = {
            let mut active = self.active.lock();
            if auto {
                active.get(&xid).cloned()
            } else {
                active.remove(&xid)
            }
        }
        .ok_or(DatabaseError::UnknownTransaction { xid })?;

        if t.is_auto_aborted() {
            return Ok(());
        }
        let result = self.ledger.abort(xid);
        self.lock_table.remove(xid);
        result?;
        if !auto {
            info!(xid, "transaction aborted");
        }
        Ok(())
    }

    pub fn ledger(&self) -> &Arc<TransactionLedger> {
        &self.ledger
    }

    pub fn data_manager(&self) -> &Arc<DataManager> {
        &self.dm
    }
}
