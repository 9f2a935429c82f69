//! Integration tests for page storage and its cost model

use std::sync::Arc;
use std::thread;

use strata::common::{PageId, SlotId, RANDOM_ACCESS_COST, SEQUENTIAL_PAGE_COST};
use strata::storage::disk::{FileStorage, HardDiskEmulator, Storage};
use strata::storage::page::DiskPage;
use tempfile::NamedTempFile;

fn page_with(id: u32, data: &[u8]) -> DiskPage {
    let mut page = DiskPage::new(PageId::new(id));
    page.append_record(data);
    page
}

fn assert_cost(storage: &dyn Storage, expected: f64) {
    let actual = storage.total_access_cost();
    assert!(
        (actual - expected).abs() < 1e-9,
        "cost {} != expected {}",
        actual,
        expected
    );
}

/// Behavior every storage shares.
fn exercise(storage: &dyn Storage) {
    let fresh = storage.read_page(PageId::new(42)).unwrap();
    assert_eq!(fresh.record_count(), 0);
    assert_cost(storage, RANDOM_ACCESS_COST);

    storage.write_page(&page_with(3, b"three")).unwrap();
    let read = storage.read_page(PageId::new(3)).unwrap();
    assert_eq!(read.get_record(SlotId::new(0)).bytes(), Some(&b"three"[..]));
    assert_cost(storage, 3.0 * RANDOM_ACCESS_COST);

    let mut pages = (10..14).map(|id| page_with(id, &[id as u8; 8]));
    let ids = storage
        .write_page_sequence(Some(PageId::new(10)), &mut pages)
        .unwrap();
    assert_eq!(ids, (10..14).map(PageId::new).collect::<Vec<_>>());
    let after_write = 4.0 * RANDOM_ACCESS_COST + 4.0 * SEQUENTIAL_PAGE_COST;
    assert_cost(storage, after_write);

    let mut seen = Vec::new();
    storage
        .read_page_sequence(PageId::new(10), 4, &mut |page| {
            seen.push((page.id(), page.get_record(SlotId::new(0)).into_bytes()));
            Ok(())
        })
        .unwrap();
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[2], (PageId::new(12), Some(vec![12u8; 8])));
    // Sequence cost accumulates on top of earlier charges
    assert_cost(
        storage,
        after_write + RANDOM_ACCESS_COST + 4.0 * SEQUENTIAL_PAGE_COST,
    );
}

#[test]
fn test_emulator_storage() {
    let emulator = HardDiskEmulator::new();
    exercise(&emulator);
    // Reading an unknown page did not allocate it
    assert_eq!(emulator.page_count(), 5);
}

#[test]
fn test_file_storage() {
    let file = NamedTempFile::new().unwrap();
    let storage = FileStorage::new(file.path()).unwrap();
    exercise(&storage);
    assert_eq!(storage.num_pages(), 14);
}

#[test]
fn test_sequence_without_start_appends() {
    let emulator = HardDiskEmulator::new();
    emulator.write_page(&page_with(4, b"x")).unwrap();
    let mut pages = (0..2).map(|_| page_with(0, b"y"));
    let ids = emulator.write_page_sequence(None, &mut pages).unwrap();
    assert_eq!(ids, vec![PageId::new(5), PageId::new(6)]);
    assert_eq!(emulator.read_page(PageId::new(6)).unwrap().record_count(), 1);
}

#[test]
fn test_create_page_allocates_next_id() {
    let file = NamedTempFile::new().unwrap();
    let storage = FileStorage::new(file.path()).unwrap();
    assert_eq!(storage.create_page().unwrap().id(), PageId::new(0));
    assert_eq!(storage.create_page().unwrap().id(), PageId::new(1));

    let emulator = HardDiskEmulator::new();
    assert_eq!(emulator.create_page().unwrap().id(), PageId::new(0));
    assert_eq!(emulator.create_page().unwrap().id(), PageId::new(1));
}

#[test]
fn test_file_storage_survives_reopen() {
    let file = NamedTempFile::new().unwrap();
    {
        let storage = FileStorage::new(file.path()).unwrap();
        storage.write_page(&page_with(2, b"durable")).unwrap();
        storage.sync().unwrap();
    }
    let storage = FileStorage::new(file.path()).unwrap();
    assert_eq!(storage.num_pages(), 3);
    let page = storage.read_page(PageId::new(2)).unwrap();
    assert_eq!(page.get_record(SlotId::new(0)).bytes(), Some(&b"durable"[..]));
}

#[test]
fn test_concurrent_writers() {
    let emulator = Arc::new(HardDiskEmulator::new());
    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let emulator = Arc::clone(&emulator);
            thread::spawn(move || {
                for i in 0..25 {
                    let id = t * 25 + i;
                    emulator.write_page(&page_with(id, &id.to_be_bytes())).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(emulator.page_count(), 100);
    assert_cost(emulator.as_ref(), 100.0 * RANDOM_ACCESS_COST);
}
