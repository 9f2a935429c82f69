use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::frame::{Frame, PageUsage};
use crate::common::{PageId, SlotId};
use crate::storage::page::{DiskPage, GetRecordResult, PutRecordResult};

/// Handle to a page resident in the buffer pool.
///
/// A pinned handle (from `get_and_pin`) keeps the page from being evicted until
/// it is dropped or released. An unpinned handle (from `get`) is a transient
/// borrow: the page may be evicted by the next admission, after which the handle
/// sees a detached copy whose writes never reach storage.
pub struct CachedPage {
    page_id: PageId,
    frame: Arc<Frame>,
    pinned: bool,
}

impl CachedPage {
    /// Wraps a frame. A pinned handle takes over one pin already added to the frame.
    pub(crate) fn new(page_id: PageId, frame: Arc<Frame>, pinned: bool) -> Self {
        Self {
            page_id,
            frame,
            pinned,
        }
    }

    pub fn id(&self) -> PageId {
        self.page_id
    }

    /// Whether this handle holds a pin.
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Current pin count of the underlying page across all handles.
    pub fn pin_count(&self) -> u32 {
        self.frame.pin_count()
    }

    /// True after any write since the page was admitted or last flushed.
    pub fn is_dirty(&self) -> bool {
        self.frame.is_dirty()
    }

    pub fn usage(&self) -> PageUsage {
        self.frame.usage()
    }

    pub fn free_space(&self) -> usize {
        self.frame.inspect(DiskPage::free_space)
    }

    pub fn record_count(&self) -> usize {
        self.frame.inspect(DiskPage::record_count)
    }

    pub fn get_record(&self, slot: SlotId) -> GetRecordResult {
        self.frame.read_with(|page| page.get_record(slot))
    }

    pub fn all_records(&self) -> BTreeMap<SlotId, GetRecordResult> {
        self.frame.read_with(DiskPage::all_records)
    }

    pub fn put_record(&self, data: &[u8], slot: SlotId) -> PutRecordResult {
        self.frame.write_with(|page| page.put_record(data, slot))
    }

    pub fn append_record(&self, data: &[u8]) -> PutRecordResult {
        self.frame.write_with(|page| page.append_record(data))
    }

    pub fn delete_record(&self, slot: SlotId) {
        self.frame.write_with(|page| page.delete_record(slot))
    }

    pub fn clear(&self) {
        self.frame.write_with(DiskPage::clear)
    }

    /// Another handle to the same frame that holds no pin.
    pub(crate) fn unpinned(&self) -> CachedPage {
        CachedPage::new(self.page_id, Arc::clone(&self.frame), false)
    }

    /// Copies the current page contents.
    pub fn snapshot(&self) -> DiskPage {
        self.frame.inspect(DiskPage::clone)
    }

    /// Releases the handle, unpinning the page if it was pinned.
    pub fn release(self) {}
}

impl Drop for CachedPage {
    fn drop(&mut self) {
        if self.pinned && self.frame.unpin().is_none() {
            log::warn!("{} released with zero pin count", self.page_id);
        }
    }
}

impl fmt::Debug for CachedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedPage")
            .field("id", &self.page_id)
            .field("pinned", &self.pinned)
            .field("pin_count", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
