use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::buffer::{CachedPage, PageCache};
use crate::common::{EngineConfig, Result, StrataError, TxnId};

use super::completion::CompletionNotifier;
use super::scheduler::Scheduler;
use super::tracker::{NoopTracker, WriteTracker};
use super::txn_cache::TxnPageCache;

pub(crate) struct ManagerInner {
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) cache: Arc<dyn PageCache<Page = CachedPage>>,
    pub(crate) tracker: Arc<dyn WriteTracker>,
    pub(crate) wait_timeout: Option<Duration>,
    completions: CompletionNotifier,
    active: Mutex<HashSet<TxnId>>,
    last_txn: AtomicU64,
}

impl ManagerInner {
    pub(crate) fn commit(&self, txn: TxnId) -> Result<Vec<TxnId>> {
        self.retire(txn)?;
        let waiting = self.scheduler.commit(txn);
        let logged = self.tracker.commit(txn);
        self.completions.notify(txn)?;
        logged?;
        log::debug!("{} committed, {} waiters to re-evaluate", txn, waiting.len());
        Ok(waiting)
    }

    pub(crate) fn abort(&self, txn: TxnId) -> Result<Vec<TxnId>> {
        self.retire(txn)?;
        let waiting = self.scheduler.abort(txn);
        let logged = self.tracker.abort(txn);
        self.completions.notify(txn)?;
        logged?;
        log::debug!("{} aborted, {} waiters to re-evaluate", txn, waiting.len());
        Ok(waiting)
    }

    pub(crate) fn is_active(&self, txn: TxnId) -> bool {
        self.active.lock().contains(&txn)
    }

    /// Blocks until `blocking` finishes. Returns false on timeout.
    pub(crate) fn wait_for(&self, blocking: TxnId) -> bool {
        self.completions.wait_for(blocking, self.wait_timeout)
    }

    fn retire(&self, txn: TxnId) -> Result<()> {
        if self.active.lock().remove(&txn) {
            Ok(())
        } else {
            Err(StrataError::UnknownTransaction(txn))
        }
    }
}

/// Runs transaction bodies concurrently, each on its own thread with a cache
/// view scoped to its transaction. Every read and write of that view is
/// arbitrated by the scheduler; writes are reported to the write tracker.
///
/// Cloning a TransactionManager yields another handle to the same manager.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
}

impl TransactionManager {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        cache: Arc<dyn PageCache<Page = CachedPage>>,
        tracker: Arc<dyn WriteTracker>,
        config: &EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                scheduler,
                cache,
                tracker,
                wait_timeout: config.wait_timeout,
                completions: CompletionNotifier::new()?,
                active: Mutex::new(HashSet::new()),
                last_txn: AtomicU64::new(0),
            }),
        })
    }

    /// Creates a manager without write tracking and with default settings.
    pub fn untracked(
        scheduler: Arc<dyn Scheduler>,
        cache: Arc<dyn PageCache<Page = CachedPage>>,
    ) -> Result<Self> {
        Self::new(scheduler, cache, Arc::new(NoopTracker), &EngineConfig::default())
    }

    /// Starts a transaction on the calling thread and returns its scoped cache.
    pub fn begin(&self) -> Result<TxnPageCache> {
        let txn = TxnId::new(self.inner.last_txn.fetch_add(1, Ordering::SeqCst) + 1);
        self.inner.active.lock().insert(txn);
        if let Err(e) = self.inner.tracker.start(txn) {
            self.inner.active.lock().remove(&txn);
            // The id still counts as finished so later ids can be forgotten
            if let Err(notify) = self.inner.completions.notify(txn) {
                log::debug!("completion of failed start {}: {}", txn, notify);
            }
            return Err(e);
        }
        log::debug!("{} started", txn);
        Ok(TxnPageCache::new(txn, Arc::clone(&self.inner.cache), Arc::clone(&self.inner)))
    }

    /// Launches `body` as a new transaction on its own thread.
    ///
    /// The body receives the transaction-scoped cache and the transaction id and
    /// is expected to commit or abort. Whenever the body leaves its transaction
    /// active, including on error or panic, the transaction is aborted.
    pub fn txn<F>(&self, body: F) -> Result<TxnHandle>
    where
        F: FnOnce(&TxnPageCache, TxnId) -> Result<()> + Send + 'static,
    {
        let cache = self.begin()?;
        let txn = cache.txn();
        let inner = Arc::clone(&self.inner);

        let spawned = thread::Builder::new()
            .name(format!("txn-{}", txn.as_u64()))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| body(&cache, txn)))
                    .unwrap_or_else(|_| {
                        Err(StrataError::TransactionAborted {
                            txn,
                            reason: "transaction body panicked".into(),
                        })
                    });
                if inner.is_active(txn) {
                    match &result {
                        Ok(()) => log::warn!("{} finished without commit or abort, aborting", txn),
                        Err(e) => log::debug!("{} failed: {}, aborting", txn, e),
                    }
                    if let Err(e) = inner.abort(txn) {
                        log::warn!("failed to abort {}: {}", txn, e);
                    }
                }
                result
            });

        match spawned {
            Ok(handle) => Ok(TxnHandle { txn, handle }),
            Err(e) => {
                self.inner.abort(txn)?;
                Err(e.into())
            }
        }
    }

    /// Commits `txn`: scheduler first, then the write tracker, then the
    /// completion announcement. Returns the transactions that were waiting on it.
    pub fn commit(&self, txn: TxnId) -> Result<Vec<TxnId>> {
        self.inner.commit(txn)
    }

    /// Aborts `txn`, undoing its writes through the write tracker.
    pub fn abort(&self, txn: TxnId) -> Result<Vec<TxnId>> {
        self.inner.abort(txn)
    }

    pub fn is_active(&self, txn: TxnId) -> bool {
        self.inner.is_active(txn)
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }
}

/// Handle to a transaction launched with `TransactionManager::txn`.
pub struct TxnHandle {
    txn: TxnId,
    handle: JoinHandle<Result<()>>,
}

impl TxnHandle {
    pub fn txn(&self) -> TxnId {
        self.txn
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the body to return and yields its result.
    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| StrataError::TransactionAborted {
                txn: self.txn,
                reason: "transaction body panicked".into(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::common::PageId;
    use crate::storage::disk::HardDiskEmulator;
    use crate::txn::{PassThroughScheduler, SingleWriterScheduler};

    fn pool() -> Arc<BufferPool> {
        Arc::new(BufferPool::new(8, 2, Arc::new(HardDiskEmulator::new())))
    }

    #[test]
    fn test_ids_increase() {
        let manager = TransactionManager::untracked(Arc::new(PassThroughScheduler), pool()).unwrap();
        let first = manager.begin().unwrap();
        let second = manager.begin().unwrap();
        assert_eq!(first.txn(), TxnId::new(1));
        assert_eq!(second.txn(), TxnId::new(2));
        assert_eq!(manager.active_count(), 2);
    }

    #[test]
    fn test_commit_twice_is_unknown() {
        let manager = TransactionManager::untracked(Arc::new(PassThroughScheduler), pool()).unwrap();
        let txn = manager.begin().unwrap().txn();
        manager.commit(txn).unwrap();
        assert!(!manager.is_active(txn));
        assert!(matches!(
            manager.commit(txn),
            Err(StrataError::UnknownTransaction(t)) if t == txn
        ));
        assert!(manager.abort(txn).is_err());
    }

    #[test]
    fn test_unfinished_body_is_aborted() {
        let scheduler = Arc::new(SingleWriterScheduler::new());
        let manager = TransactionManager::untracked(scheduler.clone(), pool()).unwrap();
        let handle = manager
            .txn(|cache, _| {
                cache.get(PageId::new(1))?.append_record(b"left open")?;
                Ok(())
            })
            .unwrap();
        let txn = handle.txn();
        handle.join().unwrap();

        assert!(!manager.is_active(txn));
        assert_eq!(scheduler.writer(), None);
    }

    #[test]
    fn test_body_error_is_returned() {
        let manager = TransactionManager::untracked(Arc::new(PassThroughScheduler), pool()).unwrap();
        let handle = manager
            .txn(|_, txn| Err(StrataError::UnknownTransaction(txn)))
            .unwrap();
        let txn = handle.txn();
        assert!(matches!(handle.join(), Err(StrataError::UnknownTransaction(t)) if t == txn));
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_panicking_body() {
        let manager = TransactionManager::untracked(Arc::new(PassThroughScheduler), pool()).unwrap();
        let handle = manager.txn(|_, _| panic!("boom")).unwrap();
        assert!(matches!(
            handle.join(),
            Err(StrataError::TransactionAborted { .. })
        ));
        assert_eq!(manager.active_count(), 0);
    }
}
