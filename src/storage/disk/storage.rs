use parking_lot::Mutex;

use crate::common::{PageId, Result, RANDOM_ACCESS_COST, SEQUENTIAL_PAGE_COST};
use crate::storage::page::DiskPage;

/// Page-granular block device.
///
/// Every implementation charges a synthetic access cost: a single page read or
/// write is one random access, a sequential run is one random access (the initial
/// seek) plus `SEQUENTIAL_PAGE_COST` per page. For a fixed trace of calls the
/// total is always the same.
pub trait Storage: Send + Sync {
    /// Reads a page. A page that was never written reads back zeroed.
    fn read_page(&self, page_id: PageId) -> Result<DiskPage>;

    /// Streams `count` contiguous pages starting at `start` into `reader`.
    fn read_page_sequence(
        &self,
        start: PageId,
        count: usize,
        reader: &mut dyn FnMut(DiskPage) -> Result<()>,
    ) -> Result<()>;

    /// Persists a page under its own id.
    fn write_page(&self, page: &DiskPage) -> Result<()>;

    /// Writes pages contiguously from `start`, or after the last existing page when
    /// `start` is `None`. The end of the iterator terminates the run. Returns the
    /// ids the pages were written under.
    fn write_page_sequence(
        &self,
        start: Option<PageId>,
        pages: &mut dyn Iterator<Item = DiskPage>,
    ) -> Result<Vec<PageId>>;

    /// Allocates the next unused page id and returns an empty page for it.
    fn create_page(&self) -> Result<DiskPage>;

    /// Total synthetic access cost charged so far.
    fn total_access_cost(&self) -> f64;
}

/// Accumulates the synthetic access cost of a storage.
#[derive(Debug, Default)]
pub struct AccessCostMeter {
    total: Mutex<f64>,
}

impl AccessCostMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Charges one random access.
    pub fn random_access(&self) {
        *self.total.lock() += RANDOM_ACCESS_COST;
    }

    /// Charges the transfer of `pages` pages in a sequential run.
    pub fn sequential_scan(&self, pages: usize) {
        *self.total.lock() += SEQUENTIAL_PAGE_COST * pages as f64;
    }

    pub fn total(&self) -> f64 {
        *self.total.lock()
    }
}
