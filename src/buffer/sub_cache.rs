use std::sync::Arc;

use crate::common::{PageId, Result};

use super::buffer_pool::{PartitionId, PoolCore};
use super::page_cache::{CacheStats, PageCache, StatsCounter};
use super::CachedPage;

/// A capacity-bounded view over the buffer pool.
///
/// Pages admitted through a sub-cache count against its capacity and are only
/// evicted to make room for other sub-cache admissions, while staying visible
/// through the parent. A page resident elsewhere is served as is and does not
/// join the sub-cache. Hits and misses are counted both locally (hit = page is a
/// member) and on the pool. Dropping the sub-cache hands its pages to the pool.
pub struct SubCache {
    core: Arc<PoolCore>,
    partition: PartitionId,
    stats: StatsCounter,
}

impl SubCache {
    pub(crate) fn new(core: Arc<PoolCore>, capacity: usize) -> Result<Self> {
        let partition = core.create_partition(capacity)?;
        Ok(Self {
            core,
            partition,
            stats: StatsCounter::default(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.core.partition_capacity(self.partition)
    }

    /// Number of member pages.
    pub fn len(&self) -> usize {
        self.core.partition_len(self.partition)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fetch(&self, page_id: PageId, pin: bool) -> Result<CachedPage> {
        let (page, local_hit) = self.core.fetch(page_id, self.partition, pin)?;
        self.stats.record(local_hit);
        Ok(page)
    }
}

impl PageCache for SubCache {
    type Page = CachedPage;

    fn load(&self, start: PageId, count: usize) -> Result<()> {
        self.core.load(start, count, self.partition)
    }

    fn get(&self, page_id: PageId) -> Result<CachedPage> {
        self.fetch(page_id, false)
    }

    fn get_and_pin(&self, page_id: PageId) -> Result<CachedPage> {
        self.fetch(page_id, true)
    }

    /// Nested sub-caches are further partitions of the same pool.
    fn create_sub_cache(&self, capacity: usize) -> Result<Box<dyn PageCache<Page = CachedPage>>> {
        Ok(Box::new(SubCache::new(Arc::clone(&self.core), capacity)?))
    }

    fn flush(&self) -> Result<()> {
        self.core.flush(Some(self.partition))
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

impl Drop for SubCache {
    fn drop(&mut self) {
        self.core.release_partition(self.partition);
    }
}
