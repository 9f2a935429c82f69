use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{CacheStats, CachedPage, PageCache, PageUsage};
use crate::common::{PageId, Result, SlotId, StrataError, TxnId};
use crate::storage::page::{DiskPage, GetRecordResult, PutRecordResult};

use super::manager::ManagerInner;
use super::scheduler::{ReadVerdict, WriteVerdict};

/// Identity of a transaction plus the manager it runs under, shared by its
/// cache views and pages.
struct TxnScope {
    txn: TxnId,
    manager: Arc<ManagerInner>,
}

impl TxnScope {
    /// Aborts the transaction and builds the error handed to its body.
    fn fail(&self, reason: String) -> StrataError {
        log::debug!("{} aborted by scheduler: {}", self.txn, reason);
        if let Err(e) = self.manager.abort(self.txn) {
            log::debug!("abort of {} after scheduler verdict: {}", self.txn, e);
        }
        StrataError::TransactionAborted {
            txn: self.txn,
            reason,
        }
    }

    fn wait_for(&self, blocking: TxnId) -> Result<()> {
        log::debug!("{} waits for {}", self.txn, blocking);
        if self.manager.wait_for(blocking) {
            return Ok(());
        }
        if let Err(e) = self.manager.abort(self.txn) {
            log::debug!("abort of {} after wait timeout: {}", self.txn, e);
        }
        Err(StrataError::WaitTimeout {
            txn: self.txn,
            blocking,
        })
    }

    /// Loops on the scheduler until the read is allowed, then performs it.
    fn try_read(
        &self,
        page_id: PageId,
        read: impl Fn(PageId) -> Result<CachedPage>,
    ) -> Result<CachedPage> {
        loop {
            match self.manager.scheduler.read(self.txn, page_id) {
                ReadVerdict::Ok(target) => return read(target),
                ReadVerdict::Abort(reason) => return Err(self.fail(reason)),
                ReadVerdict::Wait(blocking) => self.wait_for(blocking)?,
            }
        }
    }

    /// Loops on the scheduler until the write is allowed, then pins the page
    /// and performs the write between the tracker's before and after hooks.
    /// Returns the pinned handle the write went through.
    fn try_write<R>(
        &self,
        page_id: PageId,
        pin: impl FnOnce(PageId) -> Result<CachedPage>,
        write: impl FnOnce(&CachedPage) -> R,
    ) -> Result<(CachedPage, R)> {
        loop {
            match self.manager.scheduler.write(self.txn, page_id) {
                WriteVerdict::Ok(on_written) => {
                    let page = pin(page_id)?;
                    self.manager.tracker.before_write(self.txn, &page)?;
                    let result = write(&page);
                    self.manager.tracker.after_write(self.txn, &page)?;
                    on_written(self.txn, page_id);
                    return Ok((page, result));
                }
                WriteVerdict::Abort(reason) => return Err(self.fail(reason)),
                WriteVerdict::Wait(blocking) => self.wait_for(blocking)?,
            }
        }
    }
}

/// Page cache view scoped to one transaction.
pub struct TxnPageCache {
    scope: Arc<TxnScope>,
    cache: Arc<dyn PageCache<Page = CachedPage>>,
}

impl TxnPageCache {
    pub(crate) fn new(
        txn: TxnId,
        cache: Arc<dyn PageCache<Page = CachedPage>>,
        manager: Arc<ManagerInner>,
    ) -> Self {
        Self {
            scope: Arc::new(TxnScope { txn, manager }),
            cache,
        }
    }

    pub fn txn(&self) -> TxnId {
        self.scope.txn
    }

    /// Commits this view's transaction.
    pub fn commit(&self) -> Result<Vec<TxnId>> {
        self.scope.manager.commit(self.scope.txn)
    }

    /// Aborts this view's transaction.
    pub fn abort(&self) -> Result<Vec<TxnId>> {
        self.scope.manager.abort(self.scope.txn)
    }

    fn wrap(&self, page: CachedPage) -> TxnPage {
        TxnPage {
            page: Mutex::new(page),
            cache: Arc::clone(&self.cache),
            scope: Arc::clone(&self.scope),
        }
    }
}

impl PageCache for TxnPageCache {
    type Page = TxnPage;

    fn load(&self, start: PageId, count: usize) -> Result<()> {
        self.cache.load(start, count)
    }

    fn get(&self, page_id: PageId) -> Result<TxnPage> {
        let page = self.scope.try_read(page_id, |target| self.cache.get(target))?;
        Ok(self.wrap(page))
    }

    fn get_and_pin(&self, page_id: PageId) -> Result<TxnPage> {
        let page = self
            .scope
            .try_read(page_id, |target| self.cache.get_and_pin(target))?;
        Ok(self.wrap(page))
    }

    /// The sub-cache stays scoped to this transaction.
    fn create_sub_cache(&self, capacity: usize) -> Result<Box<dyn PageCache<Page = TxnPage>>> {
        let sub_cache: Arc<dyn PageCache<Page = CachedPage>> =
            Arc::from(self.cache.create_sub_cache(capacity)?);
        Ok(Box::new(TxnPageCache {
            scope: Arc::clone(&self.scope),
            cache: sub_cache,
        }))
    }

    fn flush(&self) -> Result<()> {
        self.cache.flush()
    }

    fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

/// A cached page seen through a transaction. Reads go straight to the page;
/// mutations are arbitrated by the scheduler and reported to the write tracker.
///
/// Every mutation pins the page in the cache it was read from for the length
/// of the write, so a page evicted since it was read is admitted again instead
/// of taking the write on a detached copy.
pub struct TxnPage {
    page: Mutex<CachedPage>,
    cache: Arc<dyn PageCache<Page = CachedPage>>,
    scope: Arc<TxnScope>,
}

impl TxnPage {
    pub fn id(&self) -> PageId {
        self.page.lock().id()
    }

    pub fn txn(&self) -> TxnId {
        self.scope.txn
    }

    pub fn is_pinned(&self) -> bool {
        self.page.lock().is_pinned()
    }

    pub fn pin_count(&self) -> u32 {
        self.page.lock().pin_count()
    }

    pub fn is_dirty(&self) -> bool {
        self.page.lock().is_dirty()
    }

    pub fn usage(&self) -> PageUsage {
        self.page.lock().usage()
    }

    pub fn free_space(&self) -> usize {
        self.page.lock().free_space()
    }

    pub fn record_count(&self) -> usize {
        self.page.lock().record_count()
    }

    pub fn get_record(&self, slot: SlotId) -> GetRecordResult {
        self.page.lock().get_record(slot)
    }

    pub fn all_records(&self) -> BTreeMap<SlotId, GetRecordResult> {
        self.page.lock().all_records()
    }

    pub fn snapshot(&self) -> DiskPage {
        self.page.lock().snapshot()
    }

    pub fn put_record(&self, data: &[u8], slot: SlotId) -> Result<PutRecordResult> {
        self.write(|page| page.put_record(data, slot))
    }

    pub fn append_record(&self, data: &[u8]) -> Result<PutRecordResult> {
        self.write(|page| page.append_record(data))
    }

    pub fn delete_record(&self, slot: SlotId) -> Result<()> {
        self.write(|page| page.delete_record(slot))
    }

    pub fn clear(&self) -> Result<()> {
        self.write(CachedPage::clear)
    }

    fn write<R>(&self, write: impl FnOnce(&CachedPage) -> R) -> Result<R> {
        let (pinned, result) = self
            .scope
            .try_write(self.id(), |page_id| self.cache.get_and_pin(page_id), write)?;
        let mut page = self.page.lock();
        // A pinned handle cannot have been evicted
        if !page.is_pinned() {
            *page = pinned.unpinned();
        }
        Ok(result)
    }

    /// Releases the page, unpinning it if it was pinned.
    pub fn release(self) {}
}

impl fmt::Debug for TxnPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnPage")
            .field("txn", &self.scope.txn)
            .field("page", &*self.page.lock())
            .finish()
    }
}
