use std::time::Duration;

use super::error::{Result, StrataError};

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Offset of the first directory entry; the directory size header sits before it
pub const DIRECTORY_START_OFFSET: usize = 4;

/// Size of one directory entry (a signed 32-bit record offset)
pub const DIRECTORY_ENTRY_SIZE: usize = 4;

/// Synthetic cost of one random page access (seek + rotation)
pub const RANDOM_ACCESS_COST: f64 = 5.0;

/// Synthetic cost of reading or writing one page during a sequential scan.
/// 5400 rpm and 8 pages per track give 1/8 rotation per page.
pub const SEQUENTIAL_PAGE_COST: f64 = 1.3;

/// Default K value for LRU-K replacement policy
pub const DEFAULT_LRUK_K: usize = 2;

/// Default page cache capacity (number of pages)
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Runtime knobs for the buffer pool and the transaction manager.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of resident pages in the root cache partition
    pub cache_capacity: usize,
    /// K for the LRU-K replacer
    pub lru_k: usize,
    /// How long a transaction waits for a blocking transaction before it is
    /// aborted. `None` waits until notified.
    pub wait_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            lru_k: DEFAULT_LRUK_K,
            wait_timeout: None,
        }
    }
}

impl EngineConfig {
    /// Checks that the configuration can build a working engine.
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(StrataError::InvalidConfig(
                "cache_capacity must be greater than zero".into(),
            ));
        }
        if self.lru_k == 0 {
            return Err(StrataError::InvalidConfig(
                "lru_k must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = Some(wait_timeout);
        self
    }
}
