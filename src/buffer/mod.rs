mod buffer_pool;
mod cached_page;
mod frame;
mod lru_k_replacer;
mod page_cache;
mod sub_cache;

pub use buffer_pool::BufferPool;
pub use cached_page::CachedPage;
pub use frame::PageUsage;
pub use lru_k_replacer::LruKReplacer;
pub use page_cache::{CacheStats, PageCache};
pub use sub_cache::SubCache;
