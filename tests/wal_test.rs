//! Integration tests for write-ahead logging and recovery

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use strata::buffer::PageCache;
use strata::common::{EngineConfig, PageId, SlotId, StrataError, TxnId};
use strata::storage::disk::{FileStorage, HardDiskEmulator, Storage};
use strata::storage::page::DiskPage;
use strata::txn::{PassThroughScheduler, SingleWriterScheduler, TransactionManager, TxnPageCache};
use strata::wal::{LogManager, MemoryWal, Recovery, ReplayRecovery, StorageWal, Wal, WalReader};
use tempfile::NamedTempFile;

fn page(id: u32) -> PageId {
    PageId::new(id)
}

fn manager_for(log_manager: &Arc<LogManager>, config: &EngineConfig) -> TransactionManager {
    TransactionManager::new(
        Arc::new(SingleWriterScheduler::new()),
        Arc::new(log_manager.page_cache()),
        log_manager.clone(),
        config,
    )
    .unwrap()
}

fn append(cache: &TxnPageCache, id: u32, data: &[u8]) {
    cache.get(page(id)).unwrap().append_record(data).unwrap();
}

#[test]
fn test_memory_wal_records_transaction_lifecycle() {
    common::setup_logger();
    let config = EngineConfig::default();
    let wal = Arc::new(MemoryWal::new());
    let log_manager =
        Arc::new(LogManager::new(Arc::new(HardDiskEmulator::new()), wal.clone(), &config).unwrap());
    let manager = manager_for(&log_manager, &config);

    manager
        .txn(|cache, _| {
            cache.get(page(10))?.append_record(b"a")?;
            cache.commit()?;
            Ok(())
        })
        .unwrap()
        .join()
        .unwrap();
    manager
        .txn(|cache, _| {
            cache.get(page(10))?.append_record(b"b")?;
            cache.abort()?;
            Ok(())
        })
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(
        wal.entries(),
        vec![
            "<START T1>",
            "<BEFORE T1, 10>",
            "<AFTER T1, 10>",
            "<COMMIT T1 (modified 1 pages)>",
            "<START T2>",
            "<BEFORE T2, 10>",
            "<AFTER T2, 10>",
            "<ABORT T2 (modified 1 pages)>",
        ]
    );
}

#[test]
fn test_evicted_uncommitted_page_stays_off_disk() {
    let config = EngineConfig::default().with_cache_capacity(1);
    let disk = Arc::new(HardDiskEmulator::new());
    let log_manager =
        Arc::new(LogManager::new(disk.clone(), Arc::new(MemoryWal::new()), &config).unwrap());
    let manager = manager_for(&log_manager, &config);

    let cache = manager.begin().unwrap();
    append(&cache, 0, b"uncommitted");
    // Admitting page 1 evicts the dirty page 0
    cache.get(page(1)).unwrap();
    assert!(!log_manager.page_cache().is_resident(page(0)));
    assert_eq!(disk.read_page(page(0)).unwrap().record_count(), 0);

    // The held-back copy is served when the page comes back
    assert_eq!(cache.get(page(0)).unwrap().record_count(), 1);
    cache.get(page(1)).unwrap();

    cache.commit().unwrap();
    assert_eq!(disk.read_page(page(0)).unwrap().record_count(), 1);
}

#[test]
fn test_evicted_page_of_aborted_transaction_is_restored() {
    let config = EngineConfig::default().with_cache_capacity(1);
    let disk = Arc::new(HardDiskEmulator::new());
    let mut original = DiskPage::new(page(0));
    original.append_record(b"original");
    disk.write_page(&original).unwrap();

    let log_manager =
        Arc::new(LogManager::new(disk.clone(), Arc::new(MemoryWal::new()), &config).unwrap());
    let manager = manager_for(&log_manager, &config);

    let cache = manager.begin().unwrap();
    cache
        .get(page(0))
        .unwrap()
        .put_record(b"changed", SlotId::new(0))
        .unwrap();
    cache.get(page(1)).unwrap();
    cache.abort().unwrap();

    let restored = log_manager.page_cache().get(page(0)).unwrap();
    assert_eq!(restored.get_record(SlotId::new(0)).bytes(), Some(&b"original"[..]));
    assert_eq!(disk.read_page(page(0)).unwrap(), original);
}

#[test]
fn test_redo_rebuilds_committed_state_on_replica() {
    let config = EngineConfig::default();
    let log = Arc::new(HardDiskEmulator::new());
    let wal = Arc::new(StorageWal::new(log.clone()));
    let log_manager =
        Arc::new(LogManager::new(Arc::new(HardDiskEmulator::new()), wal, &config).unwrap());
    let manager = manager_for(&log_manager, &config);

    let committed = manager.begin().unwrap();
    append(&committed, 1, b"one");
    append(&committed, 2, b"two");
    append(&committed, 2, b"three");
    committed.commit().unwrap();

    // Never finishes: simulates a crash mid-transaction
    let in_flight = manager.begin().unwrap();
    append(&in_flight, 3, b"lost");

    let replica = HardDiskEmulator::new();
    let report = ReplayRecovery::new().run(log.as_ref(), &replica).unwrap();

    assert_eq!(report.committed, BTreeSet::from([committed.txn()]));
    assert_eq!(report.rolled_back, BTreeSet::from([in_flight.txn()]));
    assert_eq!(report.pages_written, 3);
    assert_eq!(replica.read_page(page(1)).unwrap().record_count(), 1);
    assert_eq!(replica.read_page(page(2)).unwrap().record_count(), 2);
    assert_eq!(replica.read_page(page(3)).unwrap().record_count(), 0);
}

#[test]
fn test_undo_rolls_back_uncommitted_page_on_disk() {
    let config = EngineConfig::default();
    let disk = Arc::new(HardDiskEmulator::new());
    let log = Arc::new(HardDiskEmulator::new());
    let wal = Arc::new(StorageWal::new(log.clone()));
    let log_manager = Arc::new(LogManager::unguarded(disk.clone(), wal, &config).unwrap());
    assert!(!log_manager.is_guarded());
    let manager = TransactionManager::new(
        Arc::new(PassThroughScheduler),
        Arc::new(log_manager.page_cache()),
        log_manager.clone(),
        &config,
    )
    .unwrap();

    let first = manager.begin().unwrap();
    append(&first, 10, b"committed");
    first.commit().unwrap();

    let second = manager.begin().unwrap();
    append(&second, 10, b"uncommitted");
    log_manager.page_cache().flush().unwrap();
    assert_eq!(disk.read_page(page(10)).unwrap().record_count(), 2);

    // Crash: the second transaction never finishes
    let report = ReplayRecovery::new().run(log.as_ref(), disk.as_ref()).unwrap();
    assert_eq!(report.rolled_back, BTreeSet::from([second.txn()]));
    let recovered = disk.read_page(page(10)).unwrap();
    assert_eq!(recovered.record_count(), 1);
    assert_eq!(recovered.get_record(SlotId::new(0)).bytes(), Some(&b"committed"[..]));

    // Replaying again changes nothing
    let again = ReplayRecovery::new().run(log.as_ref(), disk.as_ref()).unwrap();
    assert_eq!(again, report);
    assert_eq!(disk.read_page(page(10)).unwrap(), recovered);
}

#[test]
fn test_replay_stops_at_torn_tail_frame() {
    common::setup_logger();
    let log = Arc::new(HardDiskEmulator::new());
    let wal = StorageWal::new(log.clone());
    let (t1, t2) = (TxnId::new(1), TxnId::new(2));
    let empty = DiskPage::new(page(5));
    let mut committed = empty.clone();
    committed.append_record(b"committed");
    let mut in_flight = committed.clone();
    in_flight.append_record(b"in flight");

    wal.transaction_started(t1).unwrap();
    wal.before_page_write(t1, &empty).unwrap();
    wal.after_page_write(t1, &committed).unwrap();
    wal.transaction_committed(t1, &BTreeSet::from([page(5)]))
        .unwrap();
    wal.transaction_started(t2).unwrap();
    wal.before_page_write(t2, &committed).unwrap();
    // Crash: the rest of this frame never reaches the log
    wal.after_page_write(t2, &in_flight).unwrap();
    drop(wal);

    let mut reader = WalReader::new(log.as_ref());
    let records = reader.by_ref().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(records.len(), 6);
    assert!(reader.is_torn());

    let replica = HardDiskEmulator::new();
    let report = ReplayRecovery::new().run(log.as_ref(), &replica).unwrap();
    assert_eq!(report.committed, BTreeSet::from([t1]));
    assert_eq!(report.rolled_back, BTreeSet::from([t2]));
    assert_eq!(replica.read_page(page(5)).unwrap(), committed);

    // Reopening drops the torn frame and keeps appending
    let wal = StorageWal::open(log.clone()).unwrap();
    wal.transaction_aborted(t2, &BTreeSet::from([page(5)]))
        .unwrap();
    let mut reader = WalReader::new(log.as_ref());
    assert_eq!(reader.by_ref().filter(|record| record.is_ok()).count(), 7);
    assert!(!reader.is_torn());
    let again = ReplayRecovery::new().run(log.as_ref(), &replica).unwrap();
    assert_eq!(again.rolled_back, BTreeSet::from([t2]));
    assert_eq!(replica.read_page(page(5)).unwrap(), committed);
}

#[test]
fn test_write_through_evicted_handle_reaches_storage() {
    let config = EngineConfig::default().with_cache_capacity(1);
    let disk = Arc::new(HardDiskEmulator::new());
    let log_manager =
        Arc::new(LogManager::new(disk.clone(), Arc::new(MemoryWal::new()), &config).unwrap());
    let manager = TransactionManager::new(
        Arc::new(PassThroughScheduler),
        Arc::new(log_manager.page_cache()),
        log_manager.clone(),
        &config,
    )
    .unwrap();

    let first = manager.begin().unwrap();
    let second = manager.begin().unwrap();
    let handle = first.get(page(0)).unwrap();
    // Evicts page 0 before the first transaction writes to it
    second.get(page(1)).unwrap();
    assert!(!log_manager.page_cache().is_resident(page(0)));

    handle.append_record(b"kept").unwrap();
    assert_eq!(handle.record_count(), 1);
    first.commit().unwrap();
    second.commit().unwrap();

    let cache = log_manager.page_cache();
    cache.flush().unwrap();
    assert_eq!(cache.get(page(0)).unwrap().record_count(), 1);
    assert_eq!(disk.read_page(page(0)).unwrap().record_count(), 1);
}

#[test]
fn test_file_backed_log_survives_reopen() {
    let data_file = NamedTempFile::new().unwrap();
    let log_file = NamedTempFile::new().unwrap();
    let config = EngineConfig::default();

    {
        let log: Arc<dyn Storage> = Arc::new(FileStorage::new(log_file.path()).unwrap());
        let data = Arc::new(FileStorage::new(data_file.path()).unwrap());
        let log_manager =
            Arc::new(LogManager::new(data, Arc::new(StorageWal::new(log)), &config).unwrap());
        let manager = manager_for(&log_manager, &config);
        let cache = manager.begin().unwrap();
        append(&cache, 0, b"durable");
        cache.commit().unwrap();
    }

    // The data file never saw the page; the log has it
    let data = FileStorage::new(data_file.path()).unwrap();
    assert_eq!(data.read_page(page(0)).unwrap().record_count(), 0);

    let log: Arc<dyn Storage> = Arc::new(FileStorage::new(log_file.path()).unwrap());
    ReplayRecovery::new().run(log.as_ref(), &data).unwrap();
    assert_eq!(data.read_page(page(0)).unwrap().record_count(), 1);

    // Appending after reopen keeps earlier frames
    let wal = StorageWal::open(log.clone()).unwrap();
    wal.transaction_started(TxnId::new(7)).unwrap();
    wal.force().unwrap();
    let txns: Vec<TxnId> = WalReader::new(log.as_ref())
        .map(|record| record.unwrap().txn())
        .collect();
    assert_eq!(txns.first(), Some(&TxnId::new(1)));
    assert_eq!(txns.last(), Some(&TxnId::new(7)));
}

#[test]
fn test_corrupted_log_is_detected() {
    let log = Arc::new(HardDiskEmulator::new());
    let wal = StorageWal::new(log.clone());
    wal.transaction_started(TxnId::new(1)).unwrap();
    wal.transaction_aborted(TxnId::new(1), &Default::default())
        .unwrap();

    let mut bytes = log.read_page(page(0)).unwrap().raw_bytes().to_vec();
    // Inside the transaction id of the first frame
    bytes[5] ^= 0x01;
    log.write_page(&DiskPage::from_bytes(page(0), &bytes)).unwrap();

    let result = ReplayRecovery::new().run(log.as_ref(), &HardDiskEmulator::new());
    assert!(matches!(result, Err(StrataError::WalCorrupted(_))));
}
