//! Strata - a teaching-grade transactional storage engine in Rust
//!
//! Records live in slotted pages, pages live on a block storage that charges a
//! synthetic access cost, and a pinning buffer pool caches them in memory.
//! Transactions run concurrently against the pool under a pluggable scheduler,
//! and a write-ahead log manager makes their writes revertable and recoverable.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): block devices and page layout
//!   - `Storage`: page-granular device with an access cost model
//!   - `HardDiskEmulator` / `FileStorage`: in-memory and file-backed devices
//!   - `SlottedPage` / `DiskPage`: variable-length records in a 4 KiB page
//!
//! - **Records** (`record`): typed fields encoded into record bytes
//!
//! - **Buffer Pool** (`buffer`): in-memory page cache
//!   - `BufferPool`: pin-aware cache with LRU-K eviction and write-back
//!   - `SubCache`: bounded partition of the pool with its own statistics
//!
//! - **Transactions** (`txn`): concurrent transaction bodies
//!   - `Scheduler`: read/write verdicts (ok, abort, wait)
//!   - `TransactionManager`: runs bodies and wakes waiters on commit/abort
//!
//! - **Write-Ahead Log** (`wal`): undo/redo logging
//!   - `LogManager`: before-images, revertable write-back, WAL notifications
//!   - `ReplayRecovery`: rebuilds committed state from a log
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata::buffer::PageCache;
//! use strata::common::{EngineConfig, PageId};
//! use strata::storage::disk::HardDiskEmulator;
//! use strata::txn::{SingleWriterScheduler, TransactionManager};
//! use strata::wal::{LogManager, MemoryWal};
//!
//! let config = EngineConfig::default();
//! let log_manager = Arc::new(
//!     LogManager::new(Arc::new(HardDiskEmulator::new()), Arc::new(MemoryWal::new()), &config)
//!         .unwrap(),
//! );
//! let manager = TransactionManager::new(
//!     Arc::new(SingleWriterScheduler::new()),
//!     Arc::new(log_manager.page_cache()),
//!     log_manager.clone(),
//!     &config,
//! )
//! .unwrap();
//!
//! let handle = manager
//!     .txn(|cache, _txn| {
//!         cache.get(PageId::new(10))?.append_record(b"Hello, World!")?;
//!         cache.commit()?;
//!         Ok(())
//!     })
//!     .unwrap();
//! handle.join().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod record;
pub mod storage;
pub mod txn;
pub mod wal;

// Re-export commonly used types at the crate root
pub use common::{PageId, Result, SlotId, StrataError, TxnId};
