//! Crash recovery: redo what finished, undo what never did.
use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::{
    storage::{
        data_item::{ITEM_INVALID, OF_VALID},
        ledger::TransactionLedger,
        log_record::LogRecord,
        page_cache::PageCache,
        wal::Wal,
    },
    types::{PageNo, Xid, error::DatabaseError, page::Page, uid_to_address},
};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    pub max_page_no: PageNo,
    pub redone: usize,
    pub undone: usize,
    pub aborted: Vec<Xid>,
}

fn with_page<F>(pc: &PageCache, page_no: PageNo, f: F) -> Result<(), DatabaseError>
where
    F: FnOnce(&Page) -> Result<(), DatabaseError>,
{
    let page = pc.get(page_no)?;
    let result = f(&page);
    pc.release(&page)?;
    result
}

fn for_each_record<F>(wal: &Wal, mut f: F) -> Result<(), DatabaseError>
where
    F: FnMut(LogRecord) -> Result<(), DatabaseError>,
{
    wal.rewind();
    while let Some(payload) = wal.next()? {
        f(LogRecord::from_bytes(&payload)?)?;
    }
    Ok(())
}

pub fn recover(ledger: &TransactionLedger, wal: &Wal, pc: &PageCache) -> Result<RecoveryStats, DatabaseError> {
    info!("recovery started");
    let mut stats = RecoveryStats {
        max_page_no: 1,
        ..Default::default()
    };

    for_each_record(wal, |record| {
        stats.max_page_no = stats.max_page_no.max(record.page_no());
        Ok(())
    })?;
    pc.truncate_by_page_no(stats.max_page_no)?;
    info!(max_page_no = stats.max_page_no, "truncated page file");

    redo(ledger, wal, pc, &mut stats)?;
    info!(redone = stats.redone, "redo finished");

    undo(ledger, wal, pc, &mut stats)?;
    info!(undone = stats.undone, "undo finished");

    for xid in 1..=ledger.last_xid() {
        if ledger.is_active(xid)? {
            ledger.abort(xid)?;
            stats.aborted.push(xid);
        }
    }
    info!(aborted = stats.aborted.len(), "recovery finished");
    Ok(stats)
}

fn redo(ledger: &TransactionLedger, wal: &Wal, pc: &PageCache, stats: &mut RecoveryStats) -> Result<(), DatabaseError> {
    for_each_record(wal, |record| {
        if ledger.is_active(record.xid())? {
            return Ok(());
        }
        stats.redone += 1;
        match record {
            LogRecord::Insert {
                page_no,
                offset,
                raw,
                ..
            } => with_page(pc, page_no, |page| page.recover_insert(&raw, offset)),
            LogRecord::Update { uid, new_raw, .. } => {
                let (page_no, offset) = uid_to_address(uid);
                with_page(pc, page_no, |page| page.recover_update(&new_raw, offset))
            }
        }
    })
}

fn undo(ledger: &TransactionLedger, wal: &Wal, pc: &PageCache, stats: &mut RecoveryStats) -> Result<(), DatabaseError> {
    let mut pending: BTreeMap<Xid, Vec<LogRecord>> = BTreeMap::new();
    for_each_record(wal, |record| {
        if ledger.is_active(record.xid())? {
            pending.entry(record.xid()).or_default().push(record);
        }
        Ok(())
    })?;

    for (xid, records) in pending {
        debug!(xid, records = records.len(), "undoing transaction");
        for record in records.into_iter().rev() {
            stats.undone += 1;
            match record {
                LogRecord::Insert {
                    page_no,
                    offset,
                    mut raw,
                    ..
                } => {
                    if let Some(valid) = raw.get_mut(OF_VALID) {
                        *valid = ITEM_INVALID;
                    }
                    with_page(pc, page_no, |page| page.recover_insert(&raw, offset))?;
                }
                LogRecord::Update { uid, old_raw, .. } => {
                    let (page_no, offset) = uid_to_address(uid);
                    with_page(pc, page_no, |page| page.recover_update(&old_raw, offset))?;
                }
            }
        }
    }
    Ok(())
}
