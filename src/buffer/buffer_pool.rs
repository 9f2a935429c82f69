use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{EngineConfig, PageId, Result, StrataError};
use crate::storage::disk::Storage;
use crate::storage::page::DiskPage;

use super::frame::Frame;
use super::page_cache::{CacheStats, PageCache, StatsCounter};
use super::{CachedPage, LruKReplacer, SubCache};

/// Identifies a capacity partition of the pool. Partition 0 is the pool itself,
/// every sub-cache owns another one.
pub(crate) type PartitionId = u32;

pub(crate) const ROOT_PARTITION: PartitionId = 0;

/// A resident page and the partition it was admitted through
struct Resident {
    frame: Arc<Frame>,
    partition: PartitionId,
}

#[derive(Debug)]
struct Partition {
    capacity: usize,
    members: usize,
}

struct PoolState {
    /// Page table: maps page IDs to resident frames
    resident: HashMap<PageId, Resident>,
    partitions: HashMap<PartitionId, Partition>,
    /// LRU-K replacer for eviction decisions
    replacer: LruKReplacer,
    next_partition: PartitionId,
}

/// Shared core of the pool, referenced by the pool and all of its sub-caches.
/// Page table mutation, admission and eviction happen under one lock.
pub(crate) struct PoolCore {
    storage: Arc<dyn Storage>,
    state: Mutex<PoolState>,
    stats: StatsCounter,
}

impl PoolCore {
    fn new(capacity: usize, k: usize, storage: Arc<dyn Storage>) -> Self {
        let mut partitions = HashMap::new();
        partitions.insert(
            ROOT_PARTITION,
            Partition {
                capacity,
                members: 0,
            },
        );
        Self {
            storage,
            state: Mutex::new(PoolState {
                resident: HashMap::new(),
                partitions,
                replacer: LruKReplacer::new(k),
                next_partition: ROOT_PARTITION + 1,
            }),
            stats: StatsCounter::default(),
        }
    }

    /// Returns the page, admitting it through `partition` on a miss.
    /// The flag is true when the page was already resident in `partition`.
    pub(crate) fn fetch(
        &self,
        page_id: PageId,
        partition: PartitionId,
        pin: bool,
    ) -> Result<(CachedPage, bool)> {
        let mut state = self.state.lock();

        if let Some(resident) = state.resident.get(&page_id) {
            let frame = Arc::clone(&resident.frame);
            let local_hit = resident.partition == partition;
            if pin {
                frame.pin();
            }
            state.replacer.record_access(page_id);
            self.stats.record(true);
            return Ok((CachedPage::new(page_id, frame, pin), local_hit));
        }

        self.stats.record(false);
        let page = self.storage.read_page(page_id)?;
        let frame = self.admit(&mut state, page, partition)?;
        if pin {
            frame.pin();
        }
        Ok((CachedPage::new(page_id, frame, pin), false))
    }

    /// Sequentially reads pages and admits the ones not yet resident.
    pub(crate) fn load(&self, start: PageId, count: usize, partition: PartitionId) -> Result<()> {
        let mut state = self.state.lock();
        self.storage.read_page_sequence(start, count, &mut |page| {
            if !state.resident.contains_key(&page.id()) {
                self.admit(&mut state, page, partition)?;
            }
            Ok(())
        })
    }

    /// Writes every resident page of `partition` (all pages when None) to storage.
    pub(crate) fn flush(&self, partition: Option<PartitionId>) -> Result<()> {
        let state = self.state.lock();
        for resident in state.resident.values() {
            if partition.map_or(false, |p| resident.partition != p) {
                continue;
            }
            let image = resident.frame.inspect(DiskPage::clone);
            self.storage.write_page(&image)?;
            resident.frame.set_dirty(false);
        }
        Ok(())
    }

    pub(crate) fn new_page(&self, partition: PartitionId) -> Result<CachedPage> {
        let mut state = self.state.lock();
        let page = self.storage.create_page()?;
        let page_id = page.id();
        let frame = self.admit(&mut state, page, partition)?;
        frame.pin();
        Ok(CachedPage::new(page_id, frame, true))
    }

    /// Overwrites the cached bytes of a page, admitting it if it is not resident.
    pub(crate) fn reset_page(&self, image: &DiskPage) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(resident) = state.resident.get(&image.id()) {
            resident.frame.overwrite(image);
            return Ok(());
        }
        let frame = self.admit(&mut state, image.clone(), ROOT_PARTITION)?;
        frame.set_dirty(true);
        Ok(())
    }

    pub(crate) fn create_partition(&self, capacity: usize) -> Result<PartitionId> {
        if capacity == 0 {
            return Err(StrataError::InvalidConfig(
                "sub-cache capacity must be greater than zero".into(),
            ));
        }
        let mut state = self.state.lock();
        let id = state.next_partition;
        state.next_partition += 1;
        state.partitions.insert(
            id,
            Partition {
                capacity,
                members: 0,
            },
        );
        Ok(id)
    }

    /// Hands the pages of a dropped partition back to the root partition.
    pub(crate) fn release_partition(&self, partition: PartitionId) {
        let mut state = self.state.lock();
        let released = match state.partitions.remove(&partition) {
            Some(p) => p.members,
            None => return,
        };
        for resident in state.resident.values_mut() {
            if resident.partition == partition {
                resident.partition = ROOT_PARTITION;
            }
        }
        if let Some(root) = state.partitions.get_mut(&ROOT_PARTITION) {
            root.members += released;
        }
        log::trace!("partition {} released {} pages", partition, released);
    }

    pub(crate) fn partition_len(&self, partition: PartitionId) -> usize {
        self.state
            .lock()
            .partitions
            .get(&partition)
            .map_or(0, |p| p.members)
    }

    pub(crate) fn partition_capacity(&self, partition: PartitionId) -> usize {
        self.state
            .lock()
            .partitions
            .get(&partition)
            .map_or(0, |p| p.capacity)
    }

    pub(crate) fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    fn admit(&self, state: &mut PoolState, page: DiskPage, partition: PartitionId) -> Result<Arc<Frame>> {
        self.make_room(state, partition)?;

        let page_id = page.id();
        let frame = Arc::new(Frame::new(page));
        state.resident.insert(
            page_id,
            Resident {
                frame: Arc::clone(&frame),
                partition,
            },
        );
        if let Some(p) = state.partitions.get_mut(&partition) {
            p.members += 1;
        }
        state.replacer.record_access(page_id);
        log::trace!("admitted {} into partition {}", page_id, partition);
        Ok(frame)
    }

    /// Evicts unpinned pages of `partition` until it has room for one more.
    fn make_room(&self, state: &mut PoolState, partition: PartitionId) -> Result<()> {
        loop {
            match state.partitions.get(&partition) {
                Some(p) if p.members >= p.capacity => {}
                _ => return Ok(()),
            }

            let PoolState {
                resident, replacer, ..
            } = &mut *state;
            let victim = replacer.victim(|page_id| {
                resident
                    .get(&page_id)
                    .map_or(false, |r| r.partition == partition && r.frame.pin_count() == 0)
            });

            match victim {
                Some(page_id) => self.evict(state, page_id)?,
                None => return Err(StrataError::AllPagesPinned),
            }
        }
    }

    /// Removes an unpinned page, writing it back first if it is dirty.
    fn evict(&self, state: &mut PoolState, page_id: PageId) -> Result<()> {
        let resident = match state.resident.remove(&page_id) {
            Some(resident) => resident,
            None => return Ok(()),
        };
        debug_assert_eq!(resident.frame.pin_count(), 0);

        if resident.frame.is_dirty() {
            let image = resident.frame.inspect(DiskPage::clone);
            if let Err(e) = self.storage.write_page(&image) {
                state.resident.insert(page_id, resident);
                state.replacer.record_access(page_id);
                return Err(e);
            }
            resident.frame.set_dirty(false);
        }

        if let Some(p) = state.partitions.get_mut(&resident.partition) {
            p.members -= 1;
        }
        log::trace!("evicted {} from partition {}", page_id, resident.partition);
        Ok(())
    }

    fn is_resident(&self, page_id: PageId) -> bool {
        self.state.lock().resident.contains_key(&page_id)
    }

    fn pin_count(&self, page_id: PageId) -> Option<u32> {
        self.state
            .lock()
            .resident
            .get(&page_id)
            .map(|r| r.frame.pin_count())
    }

    fn resident_count(&self) -> usize {
        self.state.lock().resident.len()
    }
}

/// BufferPool caches pages of a storage in memory. It holds at most `capacity`
/// pages admitted through itself; sub-caches bring their own capacity. When full,
/// it evicts the unpinned page with the largest LRU-K distance, writing it back
/// if dirty. Eviction is lazy: unpinning never evicts by itself.
///
/// Cloning a BufferPool yields another handle to the same pool.
#[derive(Clone)]
pub struct BufferPool {
    core: Arc<PoolCore>,
}

impl BufferPool {
    /// Creates a new BufferPool with the given capacity, k value for LRU-K, and storage.
    pub fn new(capacity: usize, k: usize, storage: Arc<dyn Storage>) -> Self {
        assert!(capacity > 0, "capacity must be greater than zero");
        Self {
            core: Arc::new(PoolCore::new(capacity, k, storage)),
        }
    }

    pub fn from_config(config: &EngineConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.cache_capacity, config.lru_k, storage))
    }

    pub fn capacity(&self) -> usize {
        self.core.partition_capacity(ROOT_PARTITION)
    }

    /// Number of pages counted against this pool's own capacity.
    pub fn len(&self) -> usize {
        self.core.partition_len(ROOT_PARTITION)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of resident pages including those admitted through sub-caches.
    pub fn resident_count(&self) -> usize {
        self.core.resident_count()
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.core.is_resident(page_id)
    }

    /// Returns the pin count of a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        self.core.pin_count(page_id)
    }

    /// Allocates a page in storage and admits it pinned.
    pub fn new_page(&self) -> Result<CachedPage> {
        self.core.new_page(ROOT_PARTITION)
    }

    /// Replaces the cached contents of a page with `image`. The page is admitted
    /// if needed and left dirty.
    pub fn reset_page(&self, image: &DiskPage) -> Result<()> {
        self.core.reset_page(image)
    }
}

impl PageCache for BufferPool {
    type Page = CachedPage;

    fn load(&self, start: PageId, count: usize) -> Result<()> {
        self.core.load(start, count, ROOT_PARTITION)
    }

    fn get(&self, page_id: PageId) -> Result<CachedPage> {
        Ok(self.core.fetch(page_id, ROOT_PARTITION, false)?.0)
    }

    fn get_and_pin(&self, page_id: PageId) -> Result<CachedPage> {
        Ok(self.core.fetch(page_id, ROOT_PARTITION, true)?.0)
    }

    fn create_sub_cache(&self, capacity: usize) -> Result<Box<dyn PageCache<Page = CachedPage>>> {
        Ok(Box::new(SubCache::new(Arc::clone(&self.core), capacity)?))
    }

    fn flush(&self) -> Result<()> {
        self.core.flush(None)
    }

    fn stats(&self) -> CacheStats {
        self.core.stats()
    }
}
