use std::fs;

use lumbung::{
    config::EngineConfig,
    mvcc::transaction::IsolationLevel,
    storage::storage_manager::StorageManager,
    types::{
        BOOT_SUFFIX, DB_SUFFIX, LOG_SUFFIX, SUPER_XID, XID_SUFFIX, error::DatabaseError,
        suffixed_path,
    },
    utils::mock::{TEST_MEMORY, TempDatabase},
};

#[test]
fn test_create_lays_out_every_file() {
    let db = TempDatabase::with_prefix("sm_files");
    let engine = db.create_storage_manager().unwrap();
    for suffix in [DB_SUFFIX, LOG_SUFFIX, XID_SUFFIX, BOOT_SUFFIX] {
        assert!(suffixed_path(&db.path, suffix).exists(), "missing .{suffix}");
    }
    assert_eq!(engine.path(), db.path.as_path());
    assert!(engine.recovery_stats().is_none());
    engine.close().unwrap();
}

#[test]
fn test_create_over_existing_database_fails() {
    let db = TempDatabase::with_prefix("sm_exists");
    db.create_storage_manager().unwrap().close().unwrap();
    assert!(db.create_storage_manager().is_err());
}

#[test]
fn test_open_missing_database_fails() {
    let db = TempDatabase::with_prefix("sm_missing");
    assert!(db.open_storage_manager().is_err());
}

#[test]
fn test_hundred_committed_records_survive_reopen() {
    let db = TempDatabase::with_prefix("sm_durable");
    let mut written = Vec::new();
    {
        let engine = db.create_storage_manager().unwrap();
        let xid = engine.begin().unwrap();
        for i in 0..100u32 {
            let data = format!("row number {i}").into_bytes();
            written.push((engine.insert_version(xid, &data).unwrap(), data));
        }
        engine.commit(xid).unwrap();
        engine.close().unwrap();
    }

    let engine = db.open_storage_manager().unwrap();
    assert!(engine.recovery_stats().is_none());
    let xid = engine.begin().unwrap();
    for (uid, data) in &written {
        assert_eq!(engine.read_version(xid, *uid).unwrap().as_ref(), Some(data));
    }
    engine.commit(xid).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_crash_keeps_committed_and_drops_uncommitted() {
    let db = TempDatabase::with_prefix("sm_crash");
    let (kept, lost, unfinished);
    {
        let engine = db.create_storage_manager().unwrap();
        let done = engine.begin().unwrap();
        kept = engine.insert_version(done, b"committed").unwrap();
        engine.commit(done).unwrap();

        unfinished = engine.begin().unwrap();
        lost = engine.insert_version(unfinished, b"never committed").unwrap();
        assert!(engine.delete_version(unfinished, kept).unwrap());
        // crash: dropped without close
    }

    let engine = db.open_storage_manager().unwrap();
    let stats = engine.recovery_stats().unwrap();
    assert_eq!(stats.aborted, vec![unfinished]);
    assert!(engine.ledger().is_aborted(unfinished).unwrap());

    let xid = engine.begin().unwrap();
    assert_eq!(engine.read_version(xid, kept).unwrap().as_deref(), Some(&b"committed"[..]));
    assert_eq!(engine.read_version(xid, lost).unwrap(), None);
    // the undone delete leaves the row deletable again
    assert!(engine.delete_version(xid, kept).unwrap());
    engine.commit(xid).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_primary_index_persists() {
    let db = TempDatabase::with_prefix("sm_index");
    let boot_before;
    {
        let engine = db.create_storage_manager().unwrap();
        let xid = engine.begin().unwrap();
        for key in 0..300u64 {
            let uid = engine
                .insert_version(xid, format!("value {key}").as_bytes())
                .unwrap();
            engine.primary_index().insert(key, uid).unwrap();
        }
        engine.commit(xid).unwrap();
        boot_before = fs::read(suffixed_path(&db.path, BOOT_SUFFIX)).unwrap();
        engine.close().unwrap();
    }
    assert_eq!(fs::read(suffixed_path(&db.path, BOOT_SUFFIX)).unwrap(), boot_before);

    let engine = db.open_storage_manager().unwrap();
    let xid = engine.begin().unwrap();
    let uids = engine.primary_index().search(123).unwrap();
    assert_eq!(uids.len(), 1);
    assert_eq!(
        engine.read_version(xid, uids[0]).unwrap().as_deref(),
        Some(&b"value 123"[..])
    );
    assert_eq!(engine.primary_index().search_range(100, 199).unwrap().len(), 100);
    engine.commit(xid).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_secondary_index_by_boot_uid() {
    let db = TempDatabase::with_prefix("sm_secondary");
    let boot_uid;
    {
        let engine = db.create_storage_manager().unwrap();
        boot_uid = engine.create_index().unwrap();
        let index = engine.load_index(boot_uid).unwrap();
        index.insert(7, 70).unwrap();
        index.insert(8, 80).unwrap();
        index.close().unwrap();
        engine.close().unwrap();
    }
    let engine = db.open_storage_manager().unwrap();
    let index = engine.load_index(boot_uid).unwrap();
    assert_eq!(index.search(8).unwrap(), vec![80]);
    assert!(engine.primary_index().search(8).unwrap().is_empty());
    index.close().unwrap();
    engine.close().unwrap();
}

#[test]
fn test_truncated_boot_file_is_rejected() {
    let db = TempDatabase::with_prefix("sm_bad_boot");
    db.create_storage_manager().unwrap().close().unwrap();
    fs::write(suffixed_path(&db.path, BOOT_SUFFIX), [1, 2, 3]).unwrap();
    assert!(matches!(
        db.open_storage_manager(),
        Err(DatabaseError::BootFile { .. })
    ));
}

#[test]
fn test_open_or_create() {
    let db = TempDatabase::with_prefix("sm_open_or_create");
    let uid;
    {
        let engine = StorageManager::open_or_create(db.config()).unwrap();
        let xid = engine.begin().unwrap();
        uid = engine.insert_version(xid, b"first run").unwrap();
        engine.commit(xid).unwrap();
        engine.close().unwrap();
    }
    let engine = StorageManager::open_or_create(db.config()).unwrap();
    let xid = engine.begin().unwrap();
    assert_eq!(engine.read_version(xid, uid).unwrap().as_deref(), Some(&b"first run"[..]));
    engine.commit(xid).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_configured_isolation_is_used() {
    let db = TempDatabase::with_prefix("sm_isolation");
    let config = EngineConfig::new(&db.path)
        .with_memory(TEST_MEMORY)
        .with_isolation(IsolationLevel::RepeatableRead);
    let engine = StorageManager::create(config).unwrap();

    let reader = engine.begin().unwrap();
    let writer = engine.begin_transaction(IsolationLevel::ReadCommitted).unwrap();
    let uid = engine.insert_version(writer, b"late").unwrap();
    engine.commit(writer).unwrap();

    // started before the writer, so a repeatable read never sees it
    assert_eq!(engine.read_version(reader, uid).unwrap(), None);
    engine.commit(reader).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_memory_below_minimum_is_rejected() {
    let db = TempDatabase::with_prefix("sm_small");
    let config = EngineConfig::new(&db.path).with_memory(4 * 8192);
    assert!(matches!(
        StorageManager::create(config),
        Err(DatabaseError::MemoryTooSmall { .. })
    ));
}

#[test]
fn test_super_transaction_writes_are_always_visible() {
    let db = TempDatabase::with_prefix("sm_super");
    let engine = db.create_storage_manager().unwrap();
    let uid = engine.insert_version(SUPER_XID, b"bootstrap").unwrap();
    let xid = engine.begin().unwrap();
    assert_eq!(engine.read_version(xid, uid).unwrap().as_deref(), Some(&b"bootstrap"[..]));
    engine.commit(xid).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_dotted_base_paths_keep_separate_files() {
    let db = TempDatabase::with_prefix("sm_dotted");
    let v2 = db.dir().join("orders.v2");
    let v3 = db.dir().join("orders.v3");
    assert!(suffixed_path(&v2, DB_SUFFIX).ends_with("orders.v2.db"));

    let mut uids = Vec::new();
    for (base, data) in [(&v2, &b"second"[..]), (&v3, &b"third"[..])] {
        let engine = StorageManager::create(EngineConfig::new(base).with_memory(TEST_MEMORY)).unwrap();
        let xid = engine.begin().unwrap();
        uids.push(engine.insert_version(xid, data).unwrap());
        engine.commit(xid).unwrap();
        engine.close().unwrap();
    }
    for suffix in [DB_SUFFIX, LOG_SUFFIX, XID_SUFFIX, BOOT_SUFFIX] {
        assert!(suffixed_path(&v2, suffix).exists());
        assert!(suffixed_path(&v3, suffix).exists());
    }
    assert!(!db.dir().join("orders.db").exists());

    for ((base, data), uid) in [(&v2, &b"second"[..]), (&v3, &b"third"[..])].into_iter().zip(uids) {
        let engine = StorageManager::open(EngineConfig::new(base).with_memory(TEST_MEMORY)).unwrap();
        assert!(engine.recovery_stats().is_none());
        let xid = engine.begin().unwrap();
        assert_eq!(engine.read_version(xid, uid).unwrap().as_deref(), Some(data));
        engine.commit(xid).unwrap();
        engine.close().unwrap();
    }
}
