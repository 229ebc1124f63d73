use std::{sync::Arc, thread, time::Duration};

use lumbung::{
    mvcc::transaction::IsolationLevel::{ReadCommitted, RepeatableRead},
    storage::storage_manager::StorageManager,
    types::{SUPER_XID, error::DatabaseError},
    utils::mock::TempDatabase,
};

fn seed(engine: &StorageManager, data: &[u8]) -> u64 {
    let xid = engine.begin().unwrap();
    let uid = engine.insert_version(xid, data).unwrap();
    engine.commit(xid).unwrap();
    uid
}

#[test]
fn test_own_writes_are_visible() {
    let db = TempDatabase::with_prefix("vm_own");
    let engine = db.create_storage_manager().unwrap();
    for level in [ReadCommitted, RepeatableRead] {
        let xid = engine.begin_transaction(level).unwrap();
        let uid = engine.insert_version(xid, b"mine").unwrap();
        assert_eq!(engine.read_version(xid, uid).unwrap().as_deref(), Some(&b"mine"[..]));
        assert!(engine.delete_version(xid, uid).unwrap());
        assert_eq!(engine.read_version(xid, uid).unwrap(), None);
        engine.commit(xid).unwrap();
    }
    engine.close().unwrap();
}

#[test]
fn test_read_committed_hides_uncommitted_writes() {
    let db = TempDatabase::with_prefix("vm_rc");
    let engine = db.create_storage_manager().unwrap();
    let writer = engine.begin_transaction(ReadCommitted).unwrap();
    let reader = engine.begin_transaction(ReadCommitted).unwrap();

    let uid = engine.insert_version(writer, b"pending").unwrap();
    assert_eq!(engine.read_version(reader, uid).unwrap(), None);
    engine.commit(writer).unwrap();
    assert_eq!(engine.read_version(reader, uid).unwrap().as_deref(), Some(&b"pending"[..]));

    // a committed delete disappears for read committed
    let deleter = engine.begin_transaction(ReadCommitted).unwrap();
    assert!(engine.delete_version(deleter, uid).unwrap());
    assert!(engine.read_version(reader, uid).unwrap().is_some());
    engine.commit(deleter).unwrap();
    assert_eq!(engine.read_version(reader, uid).unwrap(), None);

    engine.commit(reader).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_aborted_insert_is_never_visible() {
    let db = TempDatabase::with_prefix("vm_aborted");
    let engine = db.create_storage_manager().unwrap();
    let writer = engine.begin().unwrap();
    let uid = engine.insert_version(writer, b"rolled back").unwrap();
    engine.abort(writer).unwrap();

    let reader = engine.begin().unwrap();
    assert_eq!(engine.read_version(reader, uid).unwrap(), None);
    assert!(!engine.delete_version(reader, uid).unwrap());
    engine.commit(reader).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_repeatable_read_snapshot_is_stable() {
    let db = TempDatabase::with_prefix("vm_rr");
    let engine = db.create_storage_manager().unwrap();
    let existing = seed(&engine, b"before");

    let concurrent = engine.begin_transaction(ReadCommitted).unwrap();
    let reader = engine.begin_transaction(RepeatableRead).unwrap();
    let later = engine.begin_transaction(ReadCommitted).unwrap();

    let from_concurrent = engine.insert_version(concurrent, b"concurrent").unwrap();
    let from_later = engine.insert_version(later, b"later").unwrap();
    assert!(engine.delete_version(later, existing).unwrap());
    engine.commit(concurrent).unwrap();
    engine.commit(later).unwrap();

    // both writers committed, neither is part of the reader's snapshot
    assert_eq!(engine.read_version(reader, from_concurrent).unwrap(), None);
    assert_eq!(engine.read_version(reader, from_later).unwrap(), None);
    assert_eq!(engine.read_version(reader, existing).unwrap().as_deref(), Some(&b"before"[..]));
    engine.commit(reader).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_version_skip_aborts_repeatable_read() {
    let db = TempDatabase::with_prefix("vm_skip");
    let engine = db.create_storage_manager().unwrap();
    let uid = seed(&engine, b"contested");

    let slow = engine.begin_transaction(RepeatableRead).unwrap();
    let fast = engine.begin_transaction(ReadCommitted).unwrap();
    assert!(engine.delete_version(fast, uid).unwrap());
    engine.commit(fast).unwrap();

    assert!(matches!(
        engine.delete_version(slow, uid),
        Err(DatabaseError::ConcurrentUpdate { xid }) if xid == slow
    ));
    assert!(engine.ledger().is_aborted(slow).unwrap());
    // every later call reports the same conflict
    assert!(matches!(
        engine.read_version(slow, uid),
        Err(DatabaseError::ConcurrentUpdate { .. })
    ));
    assert!(matches!(
        engine.commit(slow),
        Err(DatabaseError::ConcurrentUpdate { .. })
    ));
    engine.abort(slow).unwrap();
    assert!(matches!(
        engine.abort(slow),
        Err(DatabaseError::UnknownTransaction { .. })
    ));
    engine.close().unwrap();
}

#[test]
fn test_read_committed_deletes_after_concurrent_delete_as_noop() {
    let db = TempDatabase::with_prefix("vm_rc_delete");
    let engine = db.create_storage_manager().unwrap();
    let uid = seed(&engine, b"gone soon");

    let first = engine.begin_transaction(ReadCommitted).unwrap();
    let second = engine.begin_transaction(ReadCommitted).unwrap();
    assert!(engine.delete_version(first, uid).unwrap());
    engine.commit(first).unwrap();
    assert!(!engine.delete_version(second, uid).unwrap());
    engine.commit(second).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_second_delete_returns_false() {
    let db = TempDatabase::with_prefix("vm_delete_twice");
    let engine = db.create_storage_manager().unwrap();
    let uid = seed(&engine, b"once");
    let xid = engine.begin().unwrap();
    assert!(engine.delete_version(xid, uid).unwrap());
    assert!(!engine.delete_version(xid, uid).unwrap());
    engine.commit(xid).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_unknown_transaction_is_rejected() {
    let db = TempDatabase::with_prefix("vm_unknown");
    let engine = db.create_storage_manager().unwrap();
    assert!(matches!(
        engine.insert_version(42, b"nobody"),
        Err(DatabaseError::UnknownTransaction { xid: 42 })
    ));
    let xid = engine.begin().unwrap();
    engine.commit(xid).unwrap();
    assert!(matches!(
        engine.commit(xid),
        Err(DatabaseError::UnknownTransaction { .. })
    ));
    engine.close().unwrap();
}

#[test]
fn test_blocked_delete_resumes_after_commit() {
    let db = TempDatabase::with_prefix("vm_blocking");
    let engine = Arc::new(db.create_storage_manager().unwrap());
    let uid = seed(&engine, b"row");

    let holder = engine.begin_transaction(ReadCommitted).unwrap();
    let waiter = engine.begin_transaction(ReadCommitted).unwrap();
    assert!(engine.delete_version(holder, uid).unwrap());

    let blocked = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.delete_version(waiter, uid))
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!blocked.is_finished());

    engine.commit(holder).unwrap();
    // read committed only re-checks its own stamp once it owns the row
    assert!(blocked.join().unwrap().unwrap());
    engine.commit(waiter).unwrap();

    let engine = Arc::into_inner(engine).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_blocked_repeatable_read_delete_hits_version_skip() {
    let db = TempDatabase::with_prefix("vm_blocking_rr");
    let engine = Arc::new(db.create_storage_manager().unwrap());
    let uid = seed(&engine, b"row");

    let holder = engine.begin_transaction(ReadCommitted).unwrap();
    let waiter = engine.begin_transaction(RepeatableRead).unwrap();
    assert!(engine.delete_version(holder, uid).unwrap());

    let blocked = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.delete_version(waiter, uid))
    };
    thread::sleep(Duration::from_millis(50));
    engine.commit(holder).unwrap();
    assert!(matches!(
        blocked.join().unwrap(),
        Err(DatabaseError::ConcurrentUpdate { xid }) if xid == waiter
    ));
    engine.abort(waiter).unwrap();

    let engine = Arc::into_inner(engine).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_woken_repeatable_read_delete_always_sees_the_commit() {
    let db = TempDatabase::with_prefix("vm_wake_order");
    let engine = Arc::new(db.create_storage_manager().unwrap());

    for _ in 0..20 {
        let uid = seed(&engine, b"row");
        let holder = engine.begin_transaction(ReadCommitted).unwrap();
        let waiter = engine.begin_transaction(RepeatableRead).unwrap();
        assert!(engine.delete_version(holder, uid).unwrap());

        let blocked = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.delete_version(waiter, uid))
        };
        thread::sleep(Duration::from_millis(5));
        engine.commit(holder).unwrap();
        assert!(matches!(
            blocked.join().unwrap(),
            Err(DatabaseError::ConcurrentUpdate { xid }) if xid == waiter
        ));
        engine.abort(waiter).unwrap();
    }

    let engine = Arc::into_inner(engine).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_blocked_delete_proceeds_after_abort() {
    let db = TempDatabase::with_prefix("vm_blocking_abort");
    let engine = Arc::new(db.create_storage_manager().unwrap());
    let uid = seed(&engine, b"row");

    let holder = engine.begin().unwrap();
    let waiter = engine.begin().unwrap();
    assert!(engine.delete_version(holder, uid).unwrap());

    let blocked = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.delete_version(waiter, uid))
    };
    thread::sleep(Duration::from_millis(50));
    engine.abort(holder).unwrap();
    assert!(blocked.join().unwrap().unwrap());
    engine.commit(waiter).unwrap();

    let engine = Arc::into_inner(engine).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_deadlock_aborts_one_transaction() {
    let db = TempDatabase::with_prefix("vm_deadlock");
    let engine = Arc::new(db.create_storage_manager().unwrap());
    let a = seed(&engine, b"a");
    let b = seed(&engine, b"b");

    let first = engine.begin().unwrap();
    let second = engine.begin().unwrap();
    assert!(engine.delete_version(first, a).unwrap());
    assert!(engine.delete_version(second, b).unwrap());

    let blocked = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.delete_version(first, b))
    };
    thread::sleep(Duration::from_millis(50));

    assert!(matches!(
        engine.delete_version(second, a),
        Err(DatabaseError::Deadlock { xid }) if xid == second
    ));
    assert!(engine.ledger().is_aborted(second).unwrap());
    // the victim's row lock went with it, so the first delete goes through
    assert!(blocked.join().unwrap().unwrap());
    engine.commit(first).unwrap();
    engine.abort(second).unwrap();

    let reader = engine.begin().unwrap();
    assert_eq!(engine.read_version(reader, a).unwrap(), None);
    assert_eq!(engine.read_version(reader, b).unwrap(), None);
    engine.commit(reader).unwrap();

    let engine = Arc::into_inner(engine).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_finished_transactions_leave_the_active_table() {
    let db = TempDatabase::with_prefix("vm_active");
    let engine = db.create_storage_manager().unwrap();
    let vm = engine.version_manager();
    let baseline = vm.active_count();
    let a = engine.begin().unwrap();
    let b = engine.begin().unwrap();
    assert_eq!(vm.active_count(), baseline + 2);
    engine.commit(a).unwrap();
    engine.abort(b).unwrap();
    assert_eq!(vm.active_count(), baseline);
    engine.close().unwrap();
}

#[test]
fn test_uids_outside_data_pages_are_absent() {
    let db = TempDatabase::with_prefix("vm_out_of_range");
    let engine = db.create_storage_manager().unwrap();
    let uid = seed(&engine, b"row");
    for level in [ReadCommitted, RepeatableRead] {
        let xid = engine.begin_transaction(level).unwrap();
        for bogus in [0, 999 << 32 | 10] {
            assert_eq!(engine.read_version(xid, bogus).unwrap(), None);
            assert!(!engine.delete_version(xid, bogus).unwrap());
        }
        // still usable afterwards
        assert_eq!(engine.read_version(xid, uid).unwrap().as_deref(), Some(&b"row"[..]));
        engine.commit(xid).unwrap();
    }
    engine.close().unwrap();
}

#[test]
fn test_super_transaction_cannot_be_finished() {
    let db = TempDatabase::with_prefix("vm_super_finish");
    let engine = db.create_storage_manager().unwrap();
    let vm = engine.version_manager();
    let baseline = vm.active_count();

    assert!(matches!(
        engine.commit(SUPER_XID),
        Err(DatabaseError::UnknownTransaction { xid: SUPER_XID })
    ));
    assert!(matches!(
        engine.abort(SUPER_XID),
        Err(DatabaseError::UnknownTransaction { xid: SUPER_XID })
    ));
    assert_eq!(vm.active_count(), baseline);
    assert!(engine.ledger().is_committed(SUPER_XID).unwrap());

    let uid = engine.insert_version(SUPER_XID, b"bootstrap").unwrap();
    assert_eq!(
        engine.read_version(SUPER_XID, uid).unwrap().as_deref(),
        Some(&b"bootstrap"[..])
    );
    engine.close().unwrap();
}
