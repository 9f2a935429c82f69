use std::collections::BTreeSet;
use std::sync::Arc;

use crate::buffer::{BufferPool, CachedPage};
use crate::common::{EngineConfig, PageId, Result, TxnId};
use crate::storage::disk::Storage;
use crate::txn::WriteTracker;

use super::revertable::{RevertableStorage, WriteSets};
use super::writer::Wal;

/// Tracks the pages each transaction writes, feeds the WAL, and undoes the
/// writes of aborted transactions.
///
/// The log manager owns the buffer pool transactions run against. In guarded
/// mode the pool writes back through a [`RevertableStorage`], so pages written
/// by in-flight transactions only reach the real storage once their writers
/// have finished. Before-images are captured on the first write of a page by a
/// transaction and restored into the pool on abort.
pub struct LogManager {
    wal: Arc<dyn Wal>,
    pool: BufferPool,
    storage: Arc<dyn Storage>,
    writes: Arc<WriteSets>,
    guarded: bool,
}

impl LogManager {
    pub fn new(storage: Arc<dyn Storage>, wal: Arc<dyn Wal>, config: &EngineConfig) -> Result<Self> {
        let writes = Arc::new(WriteSets::default());
        let revertable: Arc<dyn Storage> =
            Arc::new(RevertableStorage::new(Arc::clone(&storage), Arc::clone(&writes)));
        let pool = BufferPool::from_config(config, revertable)?;
        Ok(Self {
            wal,
            pool,
            storage,
            writes,
            guarded: true,
        })
    }

    /// Builds a log manager whose pool writes straight to `storage`.
    /// Uncommitted pages may then reach the storage and have to be rolled back
    /// by recovery after a crash.
    pub fn unguarded(
        storage: Arc<dyn Storage>,
        wal: Arc<dyn Wal>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let pool = BufferPool::from_config(config, Arc::clone(&storage))?;
        Ok(Self {
            wal,
            pool,
            storage,
            writes: Arc::new(WriteSets::default()),
            guarded: false,
        })
    }

    /// The buffer pool transactions should run against.
    pub fn page_cache(&self) -> BufferPool {
        self.pool.clone()
    }

    pub fn wal(&self) -> &Arc<dyn Wal> {
        &self.wal
    }

    pub fn is_guarded(&self) -> bool {
        self.guarded
    }

    /// Pages written so far by an active transaction.
    pub fn modified_pages(&self, txn: TxnId) -> BTreeSet<PageId> {
        self.writes.modified_pages(txn)
    }

    /// Returns true if an active transaction has written the page.
    pub fn is_modified(&self, page_id: PageId) -> bool {
        self.writes.is_owned(page_id)
    }
}

impl WriteTracker for LogManager {
    fn start(&self, txn: TxnId) -> Result<()> {
        self.writes.start(txn);
        self.wal.transaction_started(txn)
    }

    fn before_write(&self, txn: TxnId, page: &CachedPage) -> Result<()> {
        let image = page.snapshot();
        if self.writes.record_write(txn, page.id(), || image.clone())? {
            log::trace!("{} captured before-image of {}", txn, page.id());
        }
        self.wal.before_page_write(txn, &image)
    }

    fn after_write(&self, txn: TxnId, page: &CachedPage) -> Result<()> {
        self.wal.after_page_write(txn, &page.snapshot())
    }

    fn commit(&self, txn: TxnId) -> Result<()> {
        let pages = self.writes.modified_pages(txn);
        self.wal.transaction_committed(txn, &pages)?;
        self.writes.release(txn, true, self.storage.as_ref())?;
        log::debug!("{} committed {} pages", txn, pages.len());
        Ok(())
    }

    /// Restores the before-images and releases the transaction's pages. A page
    /// that cannot be restored into the pool still has its before-image settled
    /// in storage, and the first such failure is returned once the pages are
    /// released.
    fn abort(&self, txn: TxnId) -> Result<()> {
        let images = self.writes.before_images(txn);
        let mut failure = None;
        for image in &images {
            if let Err(e) = self.pool.reset_page(image) {
                log::warn!("{} could not restore {} into the pool: {}", txn, image.id(), e);
                // Guarded pages are settled from their parked copy on release
                if !self.guarded {
                    if let Err(e) = self.storage.write_page(image) {
                        log::warn!("{} could not restore {} in storage: {}", txn, image.id(), e);
                    }
                }
                failure.get_or_insert(e);
            }
        }
        let pages = images.iter().map(|image| image.id()).collect();
        let logged = self.wal.transaction_aborted(txn, &pages);
        self.writes.release(txn, false, self.storage.as_ref())?;
        log::debug!("{} rolled back {} pages", txn, images.len());
        match failure {
            Some(e) => Err(e),
            None => logged,
        }
    }
}
