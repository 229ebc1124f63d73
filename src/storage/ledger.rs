//! Durable per-transaction status, one byte per xid.
use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::types::{SUPER_XID, XID_SUFFIX, Xid, error::DatabaseError, suffixed_path};

/*
 * Ledger file
 * ┌────────────┬─────────┬─────────┬─────┐
 * │ counter(8) │ xid 1   │ xid 2   │ ... │   one status byte per issued xid
 * └────────────┴─────────┴─────────┴─────┘
 */
const LEDGER_HEADER_SIZE: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active = 0,
    Committed = 1,
    Aborted = 2,
}

impl TransactionStatus {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

struct LedgerFile {
    file: File,
    counter: Xid,
}

pub struct TransactionLedger {
    path: PathBuf,
    inner: Mutex<LedgerFile>,
}

fn status_position(xid: Xid) -> u64 {
    LEDGER_HEADER_SIZE + (xid - 1)
}

impl TransactionLedger {
    /// Creates `<path>.xid` with a zero counter.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = suffixed_path(path, XID_SUFFIX);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.write_all(&0u64.to_be_bytes())?;
        file.sync_all()?;
        info!(path = %path.display(), "created transaction ledger");
        Ok(Self {
            path,
            inner: Mutex::new(LedgerFile { file, counter: 0 }),
        })
    }

    /// Opens `<path>.xid` and checks its length against the stored counter.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = suffixed_path(path, XID_SUFFIX);
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_len = file.metadata()?.len();
        if file_len < LEDGER_HEADER_SIZE {
            return Err(DatabaseError::BadLedgerFile {
                reason: format!("file is {} bytes, shorter than its header", file_len),
            });
        }

        let mut header = [0u8; 8];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let counter = u64::from_be_bytes(header);
        let expected = LEDGER_HEADER_SIZE + counter;
        if expected != file_len {
            return Err(DatabaseError::BadLedgerFile {
                reason: format!(
                    "counter {} implies {} bytes, file has {}",
                    counter, expected, file_len
                ),
            });
        }
        info!(path = %path.display(), counter, "opened transaction ledger");
        Ok(Self {
            path,
            inner: Mutex::new(LedgerFile { file, counter }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Issues the next xid and records it as active.
    pub fn begin(&self) -> Result<Xid, DatabaseError> {
        let mut inner = self.inner.lock();
        let xid = inner.counter + 1;
        Self::write_status(&mut inner.file, xid, TransactionStatus::Active)?;
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&xid.to_be_bytes())?;
        inner.file.sync_data()?;
        inner.counter = xid;
        debug!(xid, "transaction began");
        Ok(xid)
    }

    pub fn commit(&self, xid: Xid) -> Result<(), DatabaseError> {
        self.finish(xid, TransactionStatus::Committed)
    }

    pub fn abort(&self, xid: Xid) -> Result<(), DatabaseError> {
        self.finish(xid, TransactionStatus::Aborted)
    }

    fn finish(&self, xid: Xid, status: TransactionStatus) -> Result<(), DatabaseError> {
        if xid == SUPER_XID {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        if xid > inner.counter {
            return Err(DatabaseError::UnknownTransaction { xid });
        }
        Self::write_status(&mut inner.file, xid, status)?;
        inner.file.sync_data()?;
        debug!(xid, ?status, "transaction finished");
        Ok(())
    }

    fn write_status(file: &mut File, xid: Xid, status: TransactionStatus) -> Result<(), DatabaseError> {
        file.seek(SeekFrom::Start(status_position(xid)))?;
        file.write_all(&[status.as_u8()])?;
        Ok(())
    }

    fn check(&self, xid: Xid, status: TransactionStatus) -> Result<bool, DatabaseError> {
        let mut inner = self.inner.lock();
        if xid > inner.counter {
            return Ok(false);
        }
        let mut buf = [0u8; 1];
        inner.file.seek(SeekFrom::Start(status_position(xid)))?;
        inner.file.read_exact(&mut buf)?;
        Ok(buf[0] == status.as_u8())
    }

    pub fn is_active(&self, xid: Xid) -> Result<bool, DatabaseError> {
        if xid == SUPER_XID {
            return Ok(false);
        }
        self.check(xid, TransactionStatus::Active)
    }

    pub fn is_committed(&self, xid: Xid) -> Result<bool, DatabaseError> {
        if xid == SUPER_XID {
            return Ok(true);
        }
        self.check(xid, TransactionStatus::Committed)
    }

    pub fn is_aborted(&self, xid: Xid) -> Result<bool, DatabaseError> {
        if xid == SUPER_XID {
            return Ok(false);
        }
        self.check(xid, TransactionStatus::Aborted)
    }

    /// Highest xid issued so far.
    pub fn last_xid(&self) -> Xid {
        self.inner.lock().counter
    }

    pub fn close(&self) -> Result<(), DatabaseError> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}
