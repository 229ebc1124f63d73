use std::{collections::HashSet, fs::OpenOptions, io::Write, sync::Arc, thread};

use lumbung::{
    storage::ledger::TransactionLedger,
    types::{SUPER_XID, XID_SUFFIX, error::DatabaseError, suffixed_path},
    utils::mock::TempDatabase,
};
use rand::Rng;

#[test]
fn test_begin_issues_increasing_xids() {
    let db = TempDatabase::with_prefix("ledger_begin");
    let ledger = TransactionLedger::create(&db.path).unwrap();
    assert_eq!(ledger.begin().unwrap(), 1);
    assert_eq!(ledger.begin().unwrap(), 2);
    assert_eq!(ledger.last_xid(), 2);
    assert!(ledger.is_active(1).unwrap());
}

#[test]
fn test_status_survives_reopen() {
    let db = TempDatabase::with_prefix("ledger_reopen");
    {
        let ledger = TransactionLedger::create(&db.path).unwrap();
        let committed = ledger.begin().unwrap();
        let aborted = ledger.begin().unwrap();
        ledger.begin().unwrap();
        ledger.commit(committed).unwrap();
        ledger.abort(aborted).unwrap();
        ledger.close().unwrap();
    }

    let ledger = TransactionLedger::open(&db.path).unwrap();
    assert!(ledger.is_committed(1).unwrap());
    assert!(ledger.is_aborted(2).unwrap());
    assert!(ledger.is_active(3).unwrap());
    assert_eq!(ledger.begin().unwrap(), 4);
}

#[test]
fn test_super_xid_is_always_committed() {
    let db = TempDatabase::with_prefix("ledger_super");
    let ledger = TransactionLedger::create(&db.path).unwrap();
    assert!(ledger.is_committed(SUPER_XID).unwrap());
    assert!(!ledger.is_active(SUPER_XID).unwrap());
    assert!(!ledger.is_aborted(SUPER_XID).unwrap());
}

#[test]
fn test_unknown_xid_cannot_finish() {
    let db = TempDatabase::with_prefix("ledger_unknown");
    let ledger = TransactionLedger::create(&db.path).unwrap();
    assert!(matches!(
        ledger.commit(7),
        Err(DatabaseError::UnknownTransaction { xid: 7 })
    ));
    assert!(!ledger.is_active(7).unwrap());
}

#[test]
fn test_length_mismatch_is_fatal() {
    let db = TempDatabase::with_prefix("ledger_corrupt");
    {
        let ledger = TransactionLedger::create(&db.path).unwrap();
        ledger.begin().unwrap();
    }
    let mut file = OpenOptions::new()
        .append(true)
        .open(suffixed_path(&db.path, XID_SUFFIX))
        .unwrap();
    file.write_all(&[0, 0]).unwrap();
    drop(file);

    let err = TransactionLedger::open(&db.path).err().unwrap();
    assert!(matches!(err, DatabaseError::BadLedgerFile { .. }));
    assert!(err.is_fatal());
}

#[test]
fn test_concurrent_begin_never_reuses_xids() {
    let db = TempDatabase::with_prefix("ledger_threads");
    let ledger = Arc::new(TransactionLedger::create(&db.path).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let mut xids = Vec::new();
                for _ in 0..50 {
                    let xid = ledger.begin().unwrap();
                    if rng.gen_bool(0.5) {
                        ledger.commit(xid).unwrap();
                    } else {
                        ledger.abort(xid).unwrap();
                    }
                    xids.push(xid);
                }
                xids
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for xid in handle.join().unwrap() {
            assert!(seen.insert(xid), "xid {xid} issued twice");
        }
    }
    assert_eq!(seen.len(), 400);
    assert_eq!(ledger.last_xid(), 400);
    for xid in 1..=400 {
        assert!(!ledger.is_active(xid).unwrap());
    }
}
