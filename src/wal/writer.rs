use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{PageId, Result, TxnId, PAGE_SIZE};
use crate::storage::disk::Storage;
use crate::storage::page::DiskPage;

use super::reader::WalReader;
use super::record::WalRecord;

/// Write-ahead log sink. The log manager calls it at each point of a
/// transaction's life, in the order start, (before, after)*, commit or abort.
pub trait Wal: Send + Sync {
    fn transaction_started(&self, txn: TxnId) -> Result<()>;
    fn before_page_write(&self, txn: TxnId, image: &DiskPage) -> Result<()>;
    fn after_page_write(&self, txn: TxnId, image: &DiskPage) -> Result<()>;
    fn transaction_committed(&self, txn: TxnId, pages: &BTreeSet<PageId>) -> Result<()>;
    fn transaction_aborted(&self, txn: TxnId, pages: &BTreeSet<PageId>) -> Result<()>;
}

/// Keeps the log in memory. Its text form lists one record per line.
#[derive(Debug, Default)]
pub struct MemoryWal {
    records: Mutex<Vec<WalRecord>>,
}

impl MemoryWal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<WalRecord> {
        self.records.lock().clone()
    }

    /// Text form of every record, in log order.
    pub fn entries(&self) -> Vec<String> {
        self.records.lock().iter().map(ToString::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn push(&self, record: WalRecord) -> Result<()> {
        log::trace!("wal {}", record);
        self.records.lock().push(record);
        Ok(())
    }
}

impl Wal for MemoryWal {
    fn transaction_started(&self, txn: TxnId) -> Result<()> {
        self.push(WalRecord::Started { txn })
    }

    fn before_page_write(&self, txn: TxnId, image: &DiskPage) -> Result<()> {
        self.push(WalRecord::BeforeWrite {
            txn,
            image: image.clone(),
        })
    }

    fn after_page_write(&self, txn: TxnId, image: &DiskPage) -> Result<()> {
        self.push(WalRecord::AfterWrite {
            txn,
            image: image.clone(),
        })
    }

    fn transaction_committed(&self, txn: TxnId, pages: &BTreeSet<PageId>) -> Result<()> {
        self.push(WalRecord::Committed {
            txn,
            pages: pages.clone(),
        })
    }

    fn transaction_aborted(&self, txn: TxnId, pages: &BTreeSet<PageId>) -> Result<()> {
        self.push(WalRecord::Aborted {
            txn,
            pages: pages.clone(),
        })
    }
}

impl fmt::Display for MemoryWal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in self.records.lock().iter() {
            writeln!(f, "{}", record)?;
        }
        Ok(())
    }
}

struct Tail {
    page_id: PageId,
    bytes: Vec<u8>,
    unforced: bool,
}

/// Log stored as a byte stream over consecutive pages of a dedicated storage.
///
/// Full pages are written as soon as they fill. The partially filled tail page
/// is forced after every before-image, commit and abort, so undo information
/// reaches the log before the page it describes can reach the data storage.
pub struct StorageWal {
    storage: Arc<dyn Storage>,
    tail: Mutex<Tail>,
}

impl StorageWal {
    /// Starts an empty log at page 0 of `storage`.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            tail: Mutex::new(Tail {
                page_id: PageId::new(0),
                bytes: Vec::with_capacity(PAGE_SIZE),
                unforced: false,
            }),
        }
    }

    /// Reopens the log in `storage`, appending after its last valid frame.
    ///
    /// A torn frame at the end of the log is cut off: the tail page is
    /// rewritten without it and the pages it reached into are zeroed.
    pub fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let (frames, end, torn, pages_read) = {
            let mut reader = WalReader::new(storage.as_ref());
            let mut frames = 0usize;
            for record in reader.by_ref() {
                record?;
                frames += 1;
            }
            (frames, reader.offset(), reader.is_torn(), reader.pages_read())
        };
        let page_id = PageId::new((end / PAGE_SIZE) as u32);
        let page = storage.read_page(page_id)?;
        let bytes = page.raw_bytes()[..end % PAGE_SIZE].to_vec();
        if torn {
            storage.write_page(&DiskPage::from_bytes(page_id, &bytes))?;
            for id in page_id.as_u32() + 1..pages_read {
                storage.write_page(&DiskPage::new(PageId::new(id)))?;
            }
            log::warn!("truncated torn WAL tail at offset {}", end);
        }
        log::info!("reopened WAL with {} frames, {} bytes", frames, end);
        Ok(Self {
            storage,
            tail: Mutex::new(Tail {
                page_id,
                bytes,
                unforced: false,
            }),
        })
    }

    /// Storage the log is written to.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Writes the tail page if it holds unwritten frames.
    pub fn force(&self) -> Result<()> {
        let mut tail = self.tail.lock();
        self.force_tail(&mut tail)
    }

    fn force_tail(&self, tail: &mut Tail) -> Result<()> {
        if tail.unforced {
            self.storage
                .write_page(&DiskPage::from_bytes(tail.page_id, &tail.bytes))?;
            tail.unforced = false;
        }
        Ok(())
    }

    fn append(&self, record: &WalRecord, force: bool) -> Result<()> {
        let frame = record.encode();
        let mut tail = self.tail.lock();
        let mut rest = &frame[..];
        while !rest.is_empty() {
            let take = rest.len().min(PAGE_SIZE - tail.bytes.len());
            tail.bytes.extend_from_slice(&rest[..take]);
            tail.unforced = true;
            rest = &rest[take..];
            if tail.bytes.len() == PAGE_SIZE {
                self.force_tail(&mut tail)?;
                tail.page_id = tail.page_id.offset(1);
                tail.bytes.clear();
            }
        }
        log::trace!("wal {} appended at {}", record, tail.page_id);
        if force {
            self.force_tail(&mut tail)?;
        }
        Ok(())
    }
}

impl Wal for StorageWal {
    fn transaction_started(&self, txn: TxnId) -> Result<()> {
        self.append(&WalRecord::Started { txn }, false)
    }

    fn before_page_write(&self, txn: TxnId, image: &DiskPage) -> Result<()> {
        let record = WalRecord::BeforeWrite {
            txn,
            image: image.clone(),
        };
        self.append(&record, true)
    }

    fn after_page_write(&self, txn: TxnId, image: &DiskPage) -> Result<()> {
        let record = WalRecord::AfterWrite {
            txn,
            image: image.clone(),
        };
        self.append(&record, false)
    }

    fn transaction_committed(&self, txn: TxnId, pages: &BTreeSet<PageId>) -> Result<()> {
        let record = WalRecord::Committed {
            txn,
            pages: pages.clone(),
        };
        self.append(&record, true)
    }

    fn transaction_aborted(&self, txn: TxnId, pages: &BTreeSet<PageId>) -> Result<()> {
        let record = WalRecord::Aborted {
            txn,
            pages: pages.clone(),
        };
        self.append(&record, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::HardDiskEmulator;

    fn image(id: u32, data: &[u8]) -> DiskPage {
        let mut page = DiskPage::new(PageId::new(id));
        page.append_record(data);
        page
    }

    #[test]
    fn test_memory_wal_text() {
        let wal = MemoryWal::new();
        let (t1, t2) = (TxnId::new(1), TxnId::new(2));
        let page = image(10, b"a");
        let modified: BTreeSet<PageId> = [PageId::new(10)].into_iter().collect();

        wal.transaction_started(t1).unwrap();
        wal.before_page_write(t1, &page).unwrap();
        wal.after_page_write(t1, &page).unwrap();
        wal.transaction_committed(t1, &modified).unwrap();
        wal.transaction_started(t2).unwrap();
        wal.transaction_aborted(t2, &modified).unwrap();

        assert_eq!(
            wal.entries(),
            vec![
                "<START T1>",
                "<BEFORE T1, 10>",
                "<AFTER T1, 10>",
                "<COMMIT T1 (modified 1 pages)>",
                "<START T2>",
                "<ABORT T2 (modified 1 pages)>",
            ]
        );
        assert!(wal.to_string().ends_with("<ABORT T2 (modified 1 pages)>\n"));
    }

    #[test]
    fn test_frames_span_pages() {
        let storage = Arc::new(HardDiskEmulator::new());
        let wal = StorageWal::new(storage.clone());
        let t1 = TxnId::new(1);

        wal.transaction_started(t1).unwrap();
        for id in 0..5 {
            wal.after_page_write(t1, &image(id, &[id as u8; 32])).unwrap();
        }
        wal.transaction_committed(t1, &BTreeSet::new()).unwrap();

        let records: Vec<WalRecord> = WalReader::new(storage.as_ref())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 7);
        assert_eq!(records[3].page_id(), Some(PageId::new(2)));
        assert!(storage.page_count() > 5);
    }

    #[test]
    fn test_unforced_tail_is_not_visible() {
        let storage = Arc::new(HardDiskEmulator::new());
        let wal = StorageWal::new(storage.clone());
        wal.transaction_started(TxnId::new(1)).unwrap();
        assert_eq!(WalReader::new(storage.as_ref()).count(), 0);

        wal.force().unwrap();
        assert_eq!(WalReader::new(storage.as_ref()).count(), 1);
    }

    #[test]
    fn test_reopen_cuts_off_torn_frame() {
        let storage = Arc::new(HardDiskEmulator::new());
        let wal = StorageWal::new(storage.clone());
        let t1 = TxnId::new(1);
        wal.transaction_started(t1).unwrap();
        wal.before_page_write(t1, &image(3, b"before")).unwrap();
        // Spills into the next page, which is only written once it fills
        wal.after_page_write(t1, &image(3, b"after")).unwrap();
        drop(wal);

        let mut reader = WalReader::new(storage.as_ref());
        assert_eq!(reader.by_ref().count(), 2);
        assert!(reader.is_torn());

        let wal = StorageWal::open(storage.clone()).unwrap();
        wal.transaction_aborted(t1, &BTreeSet::new()).unwrap();

        let mut reader = WalReader::new(storage.as_ref());
        let records: Vec<WalRecord> = reader.by_ref().collect::<Result<_>>().unwrap();
        assert!(!reader.is_torn());
        assert_eq!(records.len(), 3);
        assert!(matches!(records[2], WalRecord::Aborted { .. }));
    }

    #[test]
    fn test_reopen_appends_after_last_frame() {
        let storage = Arc::new(HardDiskEmulator::new());
        let wal = StorageWal::new(storage.clone());
        wal.transaction_started(TxnId::new(1)).unwrap();
        wal.transaction_aborted(TxnId::new(1), &BTreeSet::new()).unwrap();
        drop(wal);

        let wal = StorageWal::open(storage.clone()).unwrap();
        wal.transaction_started(TxnId::new(2)).unwrap();
        wal.force().unwrap();

        let txns: Vec<TxnId> = WalReader::new(storage.as_ref())
            .map(|r| r.unwrap().txn())
            .collect();
        assert_eq!(txns, vec![TxnId::new(1), TxnId::new(1), TxnId::new(2)]);
    }
}
