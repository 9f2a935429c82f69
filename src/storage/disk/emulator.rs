use std::collections::BTreeMap;

use parking_lot::Mutex;

use super::{AccessCostMeter, Storage};
use crate::common::{PageId, Result};
use crate::storage::page::DiskPage;

/// In-memory hard disk emulator. Pages live in an ordered map; reads of ids that
/// were never written return a zeroed page without allocating it.
#[derive(Debug, Default)]
pub struct HardDiskEmulator {
    pages: Mutex<BTreeMap<PageId, DiskPage>>,
    cost: AccessCostMeter,
}

impl HardDiskEmulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of allocated pages.
    pub fn page_count(&self) -> usize {
        self.pages.lock().len()
    }

    fn next_page_id(pages: &BTreeMap<PageId, DiskPage>) -> PageId {
        pages
            .keys()
            .next_back()
            .map(|id| id.offset(1))
            .unwrap_or(PageId::new(0))
    }

    fn lookup(&self, page_id: PageId) -> DiskPage {
        self.pages
            .lock()
            .get(&page_id)
            .cloned()
            .unwrap_or_else(|| DiskPage::new(page_id))
    }
}

impl Storage for HardDiskEmulator {
    fn read_page(&self, page_id: PageId) -> Result<DiskPage> {
        let page = self.lookup(page_id);
        self.cost.random_access();
        Ok(page)
    }

    fn read_page_sequence(
        &self,
        start: PageId,
        count: usize,
        reader: &mut dyn FnMut(DiskPage) -> Result<()>,
    ) -> Result<()> {
        self.cost.random_access();
        self.cost.sequential_scan(count);
        for i in 0..count {
            reader(self.lookup(start.offset(i)))?;
        }
        Ok(())
    }

    fn write_page(&self, page: &DiskPage) -> Result<()> {
        self.pages.lock().insert(page.id(), page.clone());
        self.cost.random_access();
        Ok(())
    }

    fn write_page_sequence(
        &self,
        start: Option<PageId>,
        pages: &mut dyn Iterator<Item = DiskPage>,
    ) -> Result<Vec<PageId>> {
        let mut next = match start {
            Some(start) => start,
            None => Self::next_page_id(&self.pages.lock()),
        };
        self.cost.random_access();

        let mut written = Vec::new();
        for page in pages {
            self.pages.lock().insert(next, page.with_id(next));
            written.push(next);
            next = next.offset(1);
        }
        self.cost.sequential_scan(written.len());
        Ok(written)
    }

    fn create_page(&self) -> Result<DiskPage> {
        let mut pages = self.pages.lock();
        let page = DiskPage::new(Self::next_page_id(&pages));
        pages.insert(page.id(), page.clone());
        self.cost.random_access();
        Ok(page)
    }

    fn total_access_cost(&self) -> f64 {
        self.cost.total()
    }
}
