//! Write-ahead logging: record framing, WAL sinks, the log manager that ties
//! transactions to the buffer pool, and replay recovery.

mod log_manager;
mod reader;
mod record;
mod recovery;
mod revertable;
mod writer;

pub use log_manager::LogManager;
pub use reader::WalReader;
pub use record::{FrameHeader, WalRecord, FRAME_HEADER_SIZE};
pub use recovery::{Recovery, RecoveryReport, ReplayRecovery};
pub use revertable::RevertableStorage;
pub use writer::{MemoryWal, StorageWal, Wal};
