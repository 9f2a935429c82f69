use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{PageId, Result, StrataError, TxnId};
use crate::storage::disk::Storage;
use crate::storage::page::DiskPage;

#[derive(Default)]
struct WriteSetState {
    /// Before-image of every page each active transaction has written.
    txn_writes: HashMap<TxnId, BTreeMap<PageId, DiskPage>>,
    /// Number of active transactions that have written each page.
    owners: HashMap<PageId, usize>,
    /// Write-backs of owned pages held back from the real storage.
    parked: HashMap<PageId, DiskPage>,
}

/// Write sets of the active transactions, shared by the log manager and the
/// revertable storage.
///
/// Lock order: buffer pool, then write sets, then the real storage.
#[derive(Default)]
pub(crate) struct WriteSets {
    state: Mutex<WriteSetState>,
}

impl WriteSets {
    pub(crate) fn start(&self, txn: TxnId) {
        self.state.lock().txn_writes.entry(txn).or_default();
    }

    /// Records the first write of `txn` to a page. `capture` is only called
    /// when this is the first write. Returns true if it was.
    pub(crate) fn record_write(
        &self,
        txn: TxnId,
        page_id: PageId,
        capture: impl FnOnce() -> DiskPage,
    ) -> Result<bool> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let writes = state
            .txn_writes
            .get_mut(&txn)
            .ok_or(StrataError::UnknownTransaction(txn))?;
        if writes.contains_key(&page_id) {
            return Ok(false);
        }
        writes.insert(page_id, capture());
        *state.owners.entry(page_id).or_insert(0) += 1;
        Ok(true)
    }

    pub(crate) fn modified_pages(&self, txn: TxnId) -> BTreeSet<PageId> {
        self.state
            .lock()
            .txn_writes
            .get(&txn)
            .map(|writes| writes.keys().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn before_images(&self, txn: TxnId) -> Vec<DiskPage> {
        self.state
            .lock()
            .txn_writes
            .get(&txn)
            .map(|writes| writes.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Forgets the write set of `txn`. For every page no other active
    /// transaction owns, a parked write-back is settled: on commit the parked
    /// copy is written to `storage`, on abort the before-image is.
    pub(crate) fn release(&self, txn: TxnId, committed: bool, storage: &dyn Storage) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let writes = match state.txn_writes.remove(&txn) {
            Some(writes) => writes,
            None => return Ok(()),
        };
        let mut settled_all = Ok(());
        for (page_id, before) in writes {
            let remaining = match state.owners.get_mut(&page_id) {
                Some(count) => {
                    *count -= 1;
                    *count
                }
                None => 0,
            };
            if remaining > 0 {
                continue;
            }
            state.owners.remove(&page_id);
            if let Some(parked) = state.parked.remove(&page_id) {
                let settled = if committed { parked } else { before };
                log::trace!("{} releases parked write of {}", txn, page_id);
                if let Err(e) = storage.write_page(&settled) {
                    log::warn!("{} could not settle {}: {}", txn, page_id, e);
                    if settled_all.is_ok() {
                        settled_all = Err(e);
                    }
                }
            }
        }
        settled_all
    }

    /// Holds back the write of an owned page. Returns false if the page is not
    /// owned by any active transaction.
    fn park(&self, page: &DiskPage) -> bool {
        let mut state = self.state.lock();
        if !state.owners.contains_key(&page.id()) {
            return false;
        }
        state.parked.insert(page.id(), page.clone());
        true
    }

    fn parked(&self, page_id: PageId) -> Option<DiskPage> {
        self.state.lock().parked.get(&page_id).cloned()
    }

    pub(crate) fn is_owned(&self, page_id: PageId) -> bool {
        self.state.lock().owners.contains_key(&page_id)
    }
}

/// Storage decorator that keeps pages written by in-flight transactions away
/// from the real storage.
///
/// Write-backs of such pages are parked instead of persisted and served back on
/// reads, so a page evicted mid-transaction is not lost. The log manager settles
/// parked pages when the owning transactions finish.
pub struct RevertableStorage {
    inner: Arc<dyn Storage>,
    writes: Arc<WriteSets>,
}

impl RevertableStorage {
    pub(crate) fn new(inner: Arc<dyn Storage>, writes: Arc<WriteSets>) -> Self {
        Self { inner, writes }
    }

    pub fn inner(&self) -> &Arc<dyn Storage> {
        &self.inner
    }

    /// Returns true if a write-back of the page is currently held back.
    pub fn is_parked(&self, page_id: PageId) -> bool {
        self.writes.parked(page_id).is_some()
    }
}

impl Storage for RevertableStorage {
    fn read_page(&self, page_id: PageId) -> Result<DiskPage> {
        match self.writes.parked(page_id) {
            Some(page) => Ok(page),
            None => self.inner.read_page(page_id),
        }
    }

    fn read_page_sequence(
        &self,
        start: PageId,
        count: usize,
        reader: &mut dyn FnMut(DiskPage) -> Result<()>,
    ) -> Result<()> {
        self.inner.read_page_sequence(start, count, &mut |page| {
            match self.writes.parked(page.id()) {
                Some(parked) => reader(parked),
                None => reader(page),
            }
        })
    }

    fn write_page(&self, page: &DiskPage) -> Result<()> {
        if self.writes.park(page) {
            log::trace!("write-back of {} held until its writers finish", page.id());
            return Ok(());
        }
        self.inner.write_page(page)
    }

    /// Sequence writes go straight to the real storage.
    fn write_page_sequence(
        &self,
        start: Option<PageId>,
        pages: &mut dyn Iterator<Item = DiskPage>,
    ) -> Result<Vec<PageId>> {
        self.inner.write_page_sequence(start, pages)
    }

    fn create_page(&self) -> Result<DiskPage> {
        self.inner.create_page()
    }

    fn total_access_cost(&self) -> f64 {
        self.inner.total_access_cost()
    }
}
