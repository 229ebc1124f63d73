use thiserror::Error;

use crate::types::{PageNo, Uid, Xid};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad transaction ledger file: {reason}")]
    BadLedgerFile { reason: String },

    #[error("Bad log file: {reason}")]
    BadLogFile { reason: String },

    #[error("Memory too small: {pages} pages, need at least {min}")]
    MemoryTooSmall { pages: usize, min: usize },

    #[error("Invalid memory setting '{value}'")]
    InvalidMemory { value: String },

    #[error("Cache is full")]
    CacheFull,

    #[error("Data too large: {size} bytes, page holds at most {max}")]
    DataTooLarge { size: usize, max: usize },

    #[error("Deadlock detected for transaction {xid}")]
    Deadlock { xid: Xid },

    #[error("Concurrent update issue for transaction {xid}")]
    ConcurrentUpdate { xid: Xid },

    #[error("Unknown transaction {xid}")]
    UnknownTransaction { xid: Xid },

    #[error("Corrupted page: page_no={page_no}, reason={reason}")]
    CorruptedPage { page_no: PageNo, reason: String },

    #[error("Corrupted log record: {reason}")]
    CorruptedLog { reason: String },

    #[error("Corrupted entry: {reason}")]
    CorruptedEntry { reason: String },

    #[error("Corrupted index: uid={uid}, reason={reason}")]
    CorruptedIndex { uid: Uid, reason: String },

    #[error("Boot file error: {reason}")]
    BootFile { reason: String },
}

impl DatabaseError {
    /// Errors that leave the engine unusable; callers are expected to stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DatabaseError::Io(_)
                | DatabaseError::BadLedgerFile { .. }
                | DatabaseError::BadLogFile { .. }
                | DatabaseError::MemoryTooSmall { .. }
                | DatabaseError::InvalidMemory { .. }
                | DatabaseError::CorruptedPage { .. }
                | DatabaseError::CorruptedLog { .. }
                | DatabaseError::CorruptedEntry { .. }
                | DatabaseError::CorruptedIndex { .. }
                | DatabaseError::BootFile { .. }
        )
    }

    /// Errors that aborted the calling transaction.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DatabaseError::Deadlock { .. } | DatabaseError::ConcurrentUpdate { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;
