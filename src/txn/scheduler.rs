use std::collections::BTreeSet;
use std::fmt;

use parking_lot::Mutex;

use crate::common::{PageId, TxnId};

/// Verdict on a read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadVerdict {
    /// Read may proceed against the returned page, which may differ from the
    /// requested one for version-substituting protocols.
    Ok(PageId),
    /// The transaction must abort.
    Abort(String),
    /// The transaction must wait until the given transaction finishes.
    Wait(TxnId),
}

/// Invoked by the writer after the physical write so the scheduler can record
/// the new version.
pub type VersionCallback = Box<dyn FnOnce(TxnId, PageId) + Send>;

/// Verdict on a write request.
pub enum WriteVerdict {
    Ok(VersionCallback),
    Abort(String),
    Wait(TxnId),
}

impl fmt::Debug for WriteVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteVerdict::Ok(_) => write!(f, "WriteVerdict::Ok"),
            WriteVerdict::Abort(reason) => write!(f, "WriteVerdict::Abort({})", reason),
            WriteVerdict::Wait(txn) => write!(f, "WriteVerdict::Wait({})", txn),
        }
    }
}

/// Concurrency control decision point for page reads and writes.
///
/// A transaction is active until `commit` or `abort`, and may be told to wait
/// any number of times in between. `commit` and `abort` return the transactions
/// that were waiting on the finished one and should re-evaluate.
pub trait Scheduler: Send + Sync {
    fn read(&self, txn: TxnId, page_id: PageId) -> ReadVerdict;
    fn write(&self, txn: TxnId, page_id: PageId) -> WriteVerdict;
    fn commit(&self, txn: TxnId) -> Vec<TxnId>;
    fn abort(&self, txn: TxnId) -> Vec<TxnId>;
}

/// Lets every read and write through.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughScheduler;

impl Scheduler for PassThroughScheduler {
    fn read(&self, _txn: TxnId, page_id: PageId) -> ReadVerdict {
        ReadVerdict::Ok(page_id)
    }

    fn write(&self, _txn: TxnId, _page_id: PageId) -> WriteVerdict {
        WriteVerdict::Ok(Box::new(|_, _| {}))
    }

    fn commit(&self, _txn: TxnId) -> Vec<TxnId> {
        Vec::new()
    }

    fn abort(&self, _txn: TxnId) -> Vec<TxnId> {
        Vec::new()
    }
}

#[derive(Debug, Default)]
struct WriterState {
    writer: Option<TxnId>,
    waiting: BTreeSet<TxnId>,
}

/// The first transaction to write becomes the writer; every other transaction's
/// writes wait until it commits or aborts. Reads are never blocked.
#[derive(Debug, Default)]
pub struct SingleWriterScheduler {
    state: Mutex<WriterState>,
}

impl SingleWriterScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the transaction currently holding the write privilege.
    pub fn writer(&self) -> Option<TxnId> {
        self.state.lock().writer
    }

    /// Transactions currently told to wait for the writer.
    pub fn waiting(&self) -> Vec<TxnId> {
        self.state.lock().waiting.iter().copied().collect()
    }

    fn finish(&self, txn: TxnId) -> Vec<TxnId> {
        let mut state = self.state.lock();
        if state.writer != Some(txn) {
            state.waiting.remove(&txn);
            return Vec::new();
        }
        state.writer = None;
        std::mem::take(&mut state.waiting).into_iter().collect()
    }
}

impl Scheduler for SingleWriterScheduler {
    fn read(&self, _txn: TxnId, page_id: PageId) -> ReadVerdict {
        ReadVerdict::Ok(page_id)
    }

    fn write(&self, txn: TxnId, _page_id: PageId) -> WriteVerdict {
        let mut state = self.state.lock();
        match state.writer {
            None => {
                state.writer = Some(txn);
                WriteVerdict::Ok(Box::new(|_, _| {}))
            }
            Some(writer) if writer == txn => WriteVerdict::Ok(Box::new(|_, _| {})),
            Some(writer) => {
                state.waiting.insert(txn);
                WriteVerdict::Wait(writer)
            }
        }
    }

    fn commit(&self, txn: TxnId) -> Vec<TxnId> {
        self.finish(txn)
    }

    fn abort(&self, txn: TxnId) -> Vec<TxnId> {
        self.finish(txn)
    }
}
