use std::{
    collections::HashSet,
    fmt,
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{SUPER_XID, Xid, error::DatabaseError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
}

impl FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rc" | "0" | "read_committed" => Ok(IsolationLevel::ReadCommitted),
            "rr" | "1" | "repeatable_read" => Ok(IsolationLevel::RepeatableRead),
            other => Err(format!("unknown isolation level '{}'", other)),
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::ReadCommitted => write!(f, "read committed"),
            IsolationLevel::RepeatableRead => write!(f, "repeatable read"),
        }
    }
}

/// Why a transaction was aborted from the inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Deadlock,
    ConcurrentUpdate,
}

impl ConflictKind {
    pub fn to_error(self, xid: Xid) -> DatabaseError {
        match self {
            ConflictKind::Deadlock => DatabaseError::Deadlock { xid },
            ConflictKind::ConcurrentUpdate => DatabaseError::ConcurrentUpdate { xid },
        }
    }
}

pub struct Transaction {
    pub xid: Xid,
    pub level: IsolationLevel,
    snapshot: HashSet<Xid>,
    conflict: Mutex<Option<ConflictKind>>,
    auto_aborted: AtomicBool,
}

impl Transaction {
    /// `active` is the set of running xids; it is only kept for
    /// repeatable read.
    pub fn new<I>(xid: Xid, level: IsolationLevel, active: I) -> Self
    where
        I: IntoIterator<Item = Xid>,
    {
        let snapshot = match level {
            IsolationLevel::RepeatableRead => active.into_iter().collect(),
            IsolationLevel::ReadCommitted => HashSet::new(),
        };
        Self {
            xid,
            level,
            snapshot,
            conflict: Mutex::new(None),
            auto_aborted: AtomicBool::new(false),
        }
    }

    pub fn is_in_snapshot(&self, xid: Xid) -> bool {
        xid != SUPER_XID && self.snapshot.contains(&xid)
    }

    pub fn conflict(&self) -> Option<ConflictKind> {
        *self.conflict.lock()
    }

    pub fn set_conflict(&self, kind: ConflictKind) {
        self.conflict.lock().get_or_insert(kind);
    }

    /// Re-raises a recorded conflict.
    pub fn check_conflict(&self) -> Result<(), DatabaseError> {
        match self.conflict() {
            Some(kind) => Err(kind.to_error(self.xid)),
            None => Ok(()),
        }
    }

    pub fn is_auto_aborted(&self) -> bool {
        self.auto_aborted.load(Ordering::Acquire)
    }

    pub fn set_auto_aborted(&self) {
        self.auto_aborted.store(true, Ordering::Release);
    }
}
