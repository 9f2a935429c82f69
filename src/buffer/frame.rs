use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::storage::page::DiskPage;

/// Read/write usage of a cached page since it was admitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageUsage {
    pub read_count: u64,
    pub write_count: u64,
    pub last_read: Option<Instant>,
    pub last_write: Option<Instant>,
}

/// One resident page of the buffer pool: the page bytes plus pin count, dirty
/// flag and usage. Shared between the pool and every handle to the page.
pub(crate) struct Frame {
    page: RwLock<DiskPage>,
    /// Number of handles currently pinning this frame
    pin_count: AtomicU32,
    /// Whether the page has been modified since it was read or last flushed
    is_dirty: AtomicBool,
    usage: Mutex<PageUsage>,
}

impl Frame {
    pub(crate) fn new(page: DiskPage) -> Self {
        Self {
            page: RwLock::new(page),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            usage: Mutex::new(PageUsage::default()),
        }
    }

    pub(crate) fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value.
    /// Returns None if the pin count was already 0.
    pub(crate) fn unpin(&self) -> Option<u32> {
        loop {
            let current = self.pin_count.load(Ordering::Acquire);
            if current == 0 {
                return None;
            }
            if self
                .pin_count
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(current - 1);
            }
        }
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    pub(crate) fn usage(&self) -> PageUsage {
        *self.usage.lock()
    }

    /// Runs `f` against the page and counts it as a read.
    pub(crate) fn read_with<R>(&self, f: impl FnOnce(&DiskPage) -> R) -> R {
        let result = f(&self.page.read());
        let mut usage = self.usage.lock();
        usage.read_count += 1;
        usage.last_read = Some(Instant::now());
        result
    }

    /// Runs `f` against the page and counts it as a write.
    pub(crate) fn write_with<R>(&self, f: impl FnOnce(&mut DiskPage) -> R) -> R {
        let result = f(&mut self.page.write());
        self.set_dirty(true);
        let mut usage = self.usage.lock();
        usage.write_count += 1;
        usage.last_write = Some(Instant::now());
        result
    }

    /// Reads the page without touching the usage counters.
    pub(crate) fn inspect<R>(&self, f: impl FnOnce(&DiskPage) -> R) -> R {
        f(&self.page.read())
    }

    /// Replaces the page bytes, keeping the page id.
    pub(crate) fn overwrite(&self, image: &DiskPage) {
        self.page.write().copy_bytes_from(image);
        self.set_dirty(true);
    }
}
