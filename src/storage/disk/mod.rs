mod emulator;
mod file_storage;
mod storage;

pub use emulator::*;
pub use file_storage::*;
pub use storage::*;
