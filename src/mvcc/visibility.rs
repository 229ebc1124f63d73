//! Which entry versions a transaction may see.
use crate::{
    mvcc::transaction::{IsolationLevel, Transaction},
    storage::ledger::TransactionLedger,
    types::{entry::VersionHeader, error::DatabaseError},
};

/// True when a transaction this one cannot see already replaced the entry.
/// Only meaningful under repeatable read.
pub fn is_version_skip(
    ledger: &TransactionLedger,
    t: &Transaction,
    e: &VersionHeader,
) -> Result<bool, DatabaseError> {
    if t.level == IsolationLevel::ReadCommitted {
        return Ok(false);
    }
    Ok(ledger.is_committed(e.xmax)? && (e.xmax > t.xid || t.is_in_snapshot(e.xmax)))
}

pub fn is_visible(
    ledger: &TransactionLedger,
    t: &Transaction,
    e: &VersionHeader,
) -> Result<bool, DatabaseError> {
    match t.level {
        IsolationLevel::ReadCommitted => read_committed(ledger, t, e),
        IsolationLevel::RepeatableRead => repeatable_read(ledger, t, e),
    }
}

fn read_committed(ledger: &TransactionLedger, t: &Transaction, e: &VersionHeader) -> Result<bool, DatabaseError> {
    let xid = t.xid;
    if e.xmin == xid && e.xmax == 0 {
        return Ok(true);
    }
    if ledger.is_committed(e.xmin)? {
        if e.xmax == 0 {
            return Ok(true);
        }
        if e.xmax != xid && !ledger.is_committed(e.xmax)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn repeatable_read(ledger: &TransactionLedger, t: &Transaction, e: &VersionHeader) -> Result<bool, DatabaseError> {
    let xid = t.xid;
    if e.xmin == xid && e.xmax == 0 {
        return Ok(true);
    }
    if ledger.is_committed(e.xmin)? && e.xmin < xid && !t.is_in_snapshot(e.xmin) {
        if e.xmax == 0 {
            return Ok(true);
        }
        if e.xmax != xid
            && (!ledger.is_committed(e.xmax)? || e.xmax > xid || t.is_in_snapshot(e.xmax))
        {
            return Ok(true);
        }
    }
    Ok(false)
}
