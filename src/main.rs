use std::sync::Arc;

use strata::buffer::PageCache;
use strata::common::{EngineConfig, PageId, Result, SlotId};
use strata::record::{FieldType, Record};
use strata::storage::disk::{HardDiskEmulator, Storage};
use strata::txn::{SingleWriterScheduler, TransactionManager};
use strata::wal::{LogManager, Recovery, ReplayRecovery, StorageWal};

const ACCOUNTS: PageId = PageId(10);
const AUDIT: PageId = PageId(11);

fn account(id: i32, owner: &str, balance: f64) -> Record {
    Record::builder()
        .value(id)
        .value(owner)
        .value(balance)
        .build()
}

fn print_page(label: &str, storage: &dyn Storage, page_id: PageId) -> Result<()> {
    let schema = [FieldType::Integer, FieldType::String, FieldType::Double];
    let page = storage.read_page(page_id)?;
    println!("{} {}: {} records", label, page_id, page.record_count());
    for (slot, result) in page.all_records() {
        match result.bytes() {
            Some(bytes) => println!("  {} {}", slot, Record::from_bytes(&schema, bytes)?),
            None => println!("  {} deleted", slot),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("Strata - a transactional storage engine in Rust");
    println!("================================================\n");

    let data = Arc::new(HardDiskEmulator::new());
    let log = Arc::new(HardDiskEmulator::new());
    let wal = Arc::new(StorageWal::new(log.clone()));
    let config = EngineConfig::default().with_cache_capacity(8);

    let log_manager = Arc::new(LogManager::new(data.clone(), wal, &config)?);
    let manager = TransactionManager::new(
        Arc::new(SingleWriterScheduler::new()),
        Arc::new(log_manager.page_cache()),
        log_manager.clone(),
        &config,
    )?;

    // The first transaction opens two accounts and commits.
    let opened = manager.txn(|cache, txn| {
        let page = cache.get(ACCOUNTS)?;
        page.append_record(&account(1, "Alice", 120.0).to_bytes())?;
        page.append_record(&account(2, "Bob", 80.5).to_bytes())?;
        println!("{} opened 2 accounts", txn);
        cache.commit()?;
        Ok(())
    })?;
    opened.join()?;

    // The second transaction moves money, then changes its mind.
    let cancelled = manager.txn(|cache, txn| {
        let page = cache.get(ACCOUNTS)?;
        page.put_record(&account(1, "Alice", 20.0).to_bytes(), SlotId::new(0))?;
        page.put_record(&account(2, "Bob", 180.5).to_bytes(), SlotId::new(1))?;
        cache
            .get(AUDIT)?
            .append_record(&account(0, "transfer 100", 100.0).to_bytes())?;
        println!("{} transferred 100 and aborts", txn);
        cache.abort()?;
        Ok(())
    })?;
    cancelled.join()?;

    log_manager.page_cache().flush()?;
    println!();
    print_page("data", data.as_ref(), ACCOUNTS)?;
    print_page("data", data.as_ref(), AUDIT)?;

    let replica = HardDiskEmulator::new();
    let report = ReplayRecovery::new().run(log.as_ref(), &replica)?;
    println!(
        "\nreplayed WAL: committed {:?}, rolled back {:?}, {} pages",
        report.committed, report.rolled_back, report.pages_written
    );
    print_page("replica", &replica, ACCOUNTS)?;
    print_page("replica", &replica, AUDIT)?;

    println!("\ndata storage access cost: {:.1}", data.total_access_cost());
    Ok(())
}
