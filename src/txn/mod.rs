mod completion;
mod manager;
mod scheduler;
mod tracker;
mod txn_cache;

pub use completion::{CompletionBoard, CompletionNotifier};
pub use manager::{TransactionManager, TxnHandle};
pub use scheduler::{
    PassThroughScheduler, ReadVerdict, Scheduler, SingleWriterScheduler, VersionCallback,
    WriteVerdict,
};
pub use tracker::{NoopTracker, WriteTracker};
pub use txn_cache::{TxnPage, TxnPageCache};
