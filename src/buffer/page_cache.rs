use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::{PageId, Result};

/// Cumulative hit/miss counters of a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub cache_hit: u64,
    pub cache_miss: u64,
}

/// Atomic hit/miss counters, snapshotted into `CacheStats`.
#[derive(Debug, Default)]
pub(crate) struct StatsCounter {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StatsCounter {
    pub(crate) fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            cache_hit: self.hits.load(Ordering::Relaxed),
            cache_miss: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// A bounded page cache over a storage.
///
/// `Page` is the handle type the cache hands out: the buffer pool returns
/// `CachedPage`, a transaction-scoped cache returns pages whose writes go
/// through the scheduler.
pub trait PageCache: Send + Sync {
    type Page;

    /// Reads `count` pages from `start` with one sequential scan and admits
    /// those not yet resident, without pinning them.
    fn load(&self, start: PageId, count: usize) -> Result<()>;

    /// Returns the page without pinning it.
    fn get(&self, page_id: PageId) -> Result<Self::Page>;

    /// Returns the page pinned; dropping the handle unpins it.
    fn get_and_pin(&self, page_id: PageId) -> Result<Self::Page>;

    /// Creates a view with its own capacity and membership that shares this
    /// cache's pages.
    fn create_sub_cache(&self, capacity: usize) -> Result<Box<dyn PageCache<Page = Self::Page>>>;

    /// Writes every page of this cache back to storage.
    fn flush(&self) -> Result<()>;

    fn stats(&self) -> CacheStats;
}
