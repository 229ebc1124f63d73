use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use tracing::warn;

use crate::{
    storage::{log_record::update_record, wal::Wal},
    types::{Uid, Xid, error::DatabaseError, page::Page, read_u16},
};

/*
 * Data Item Layout (inside a data page)
 * ┌──────────┬─────────┬──────────────────────────┐
 * │ valid(1) │ size(2) │ payload ...              │
 * └──────────┴─────────┴──────────────────────────┘
 * valid is 0 for a live item and 1 once the item has been invalidated.
 */
pub const OF_VALID: usize = 0;
pub const OF_SIZE: usize = OF_VALID + 1;
pub const OF_DATA: usize = OF_SIZE + 2;

pub const ITEM_VALID: u8 = 0;
pub const ITEM_INVALID: u8 = 1;

pub fn wrap_item_raw(data: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(OF_DATA + data.len());
    raw.push(ITEM_VALID);
    raw.extend_from_slice(&(data.len() as u16).to_be_bytes());
    raw.extend_from_slice(data);
    raw
}

/// A record slot inside a pinned page.
///
/// Reads take the item's shared lock. Writes go through [`DataItem::before`],
/// which returns a guard that either logs the change with
/// [`ItemWriteGuard::after`] or rolls it back with
/// [`ItemWriteGuard::un_before`]. A guard dropped without either rolls back.
pub struct DataItem {
    uid: Uid,
    page: Arc<Page>,
    offset: u16,
    len: usize,
    lock: RwLock<()>,
    old_raw: Mutex<Vec<u8>>,
    wal: Arc<Wal>,
}

impl DataItem {
    /// Parses the item header at `offset` of a pinned page.
    pub fn parse(page: Arc<Page>, offset: u16, uid: Uid, wal: Arc<Wal>) -> Result<Self, DatabaseError> {
        let start = offset as usize;
        let len = {
            let data = page.read();
            if start + OF_DATA > data.len() {
                return Err(DatabaseError::CorruptedPage {
                    page_no: page.page_no(),
                    reason: format!("item header at offset {} is past the page end", offset),
                });
            }
            let len = OF_DATA + read_u16(&data, start + OF_SIZE) as usize;
            if start + len > data.len() {
                return Err(DatabaseError::CorruptedPage {
                    page_no: page.page_no(),
                    reason: format!("item at offset {} with length {} overflows the page", offset, len),
                });
            }
            len
        };
        Ok(Self {
            uid,
            page,
            offset,
            len,
            lock: RwLock::new(()),
            old_raw: Mutex::new(Vec::new()),
            wal,
        })
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    pub fn is_valid(&self) -> bool {
        let _shared = self.lock.read();
        self.page.read()[self.offset as usize + OF_VALID] == ITEM_VALID
    }

    /// Copy of the payload.
    pub fn data(&self) -> Vec<u8> {
        let _shared = self.lock.read();
        self.payload()
    }

    /// Copy of the full raw bytes, header included.
    pub fn raw(&self) -> Vec<u8> {
        let _shared = self.lock.read();
        self.raw_unlocked()
    }

    fn raw_unlocked(&self) -> Vec<u8> {
        let start = self.offset as usize;
        self.page.read()[start..start + self.len].to_vec()
    }

    fn payload(&self) -> Vec<u8> {
        let start = self.offset as usize;
        self.page.read()[start + OF_DATA..start + self.len].to_vec()
    }

    fn restore(&self, raw: &[u8]) {
        let start = self.offset as usize;
        self.page.lock()[start..start + raw.len()].copy_from_slice(raw);
    }

    /// Takes the exclusive lock and snapshots the raw bytes for undo.
    pub fn before(&self) -> ItemWriteGuard<'_> {
        let lock = self.lock.write();
        self.page.set_dirty(true);
        *self.old_raw.lock() = self.raw_unlocked();
        ItemWriteGuard {
            item: self,
            _lock: lock,
            finished: false,
        }
    }
}

pub struct ItemWriteGuard<'a> {
    item: &'a DataItem,
    _lock: RwLockWriteGuard<'a, ()>,
    finished: bool,
}

impl ItemWriteGuard<'_> {
    pub fn data(&self) -> Vec<u8> {
        self.item.payload()
    }

    /// Overwrites payload bytes starting at `at`. The item never grows.
    pub fn write_data(&mut self, at: usize, bytes: &[u8]) -> Result<(), DatabaseError> {
        let payload_len = self.item.len - OF_DATA;
        if at + bytes.len() > payload_len {
            return Err(DatabaseError::DataTooLarge {
                size: at + bytes.len(),
                max: payload_len,
            });
        }
        let start = self.item.offset as usize + OF_DATA + at;
        self.item.page.lock()[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Logs the change under `xid` and releases the lock.
    pub fn after(mut self, xid: Xid) -> Result<(), DatabaseError> {
        let old_raw = std::mem::take(&mut *self.item.old_raw.lock());
        let new_raw = self.item.raw_unlocked();
        let (page_no, offset) = (self.item.page.page_no(), self.item.offset);
        let record = update_record(xid, page_no, offset, &old_raw, &new_raw);
        match self.item.wal.log(&record) {
            Ok(()) => {
                self.finished = true;
                Ok(())
            }
            Err(e) => {
                // put the snapshot back so the drop rolls the page back
                *self.item.old_raw.lock() = old_raw;
                Err(e)
            }
        }
    }

    /// Restores the snapshot and releases the lock without logging.
    pub fn un_before(mut self) {
        self.roll_back();
    }

    fn roll_back(&mut self) {
        let old_raw = std::mem::take(&mut *self.item.old_raw.lock());
        if !old_raw.is_empty() {
            self.item.restore(&old_raw);
        }
        self.finished = true;
    }
}

impl Drop for ItemWriteGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(uid = self.item.uid, "item write abandoned, rolling back");
            self.roll_back();
        }
    }
}
