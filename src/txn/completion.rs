use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

use crate::common::{Result, StrataError, TxnId};

/// Finished transaction ids, kept as a low-water mark plus the ids that
/// finished ahead of it. Ids are handed out in order starting at 1, so the set
/// only holds transactions that finished while an older one was still running.
#[derive(Debug, Default)]
struct Finished {
    /// Every id up to and including this one has finished
    low_water: u64,
    above: HashSet<TxnId>,
}

impl Finished {
    fn contains(&self, txn: TxnId) -> bool {
        txn.as_u64() <= self.low_water || self.above.contains(&txn)
    }

    fn insert(&mut self, txn: TxnId) {
        if txn.as_u64() <= self.low_water {
            return;
        }
        self.above.insert(txn);
        while self.above.remove(&TxnId::new(self.low_water + 1)) {
            self.low_water += 1;
        }
    }
}

/// Set of finished transactions plus a condition variable to wait on.
///
/// A waiter blocks until the specific transaction it depends on is recorded.
/// Completions recorded before the waiter arrives are seen immediately.
#[derive(Debug, Default)]
pub struct CompletionBoard {
    finished: Mutex<Finished>,
    changed: Condvar,
}

impl CompletionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `txn` as finished and wakes all waiters.
    pub fn publish(&self, txn: TxnId) {
        self.finished.lock().insert(txn);
        self.changed.notify_all();
    }

    pub fn is_finished(&self, txn: TxnId) -> bool {
        self.finished.lock().contains(txn)
    }

    /// Number of finished ids held above the low-water mark.
    pub fn retained(&self) -> usize {
        self.finished.lock().above.len()
    }

    /// Blocks until `txn` is finished. Returns false if `timeout` elapsed first.
    pub fn wait_for(&self, txn: TxnId, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut finished = self.finished.lock();
        while !finished.contains(txn) {
            match deadline {
                None => self.changed.wait(&mut finished),
                Some(deadline) => {
                    if self.changed.wait_until(&mut finished, deadline).timed_out() {
                        return finished.contains(txn);
                    }
                }
            }
        }
        true
    }
}

/// Serializes commit/abort announcements through a FIFO channel drained by a
/// single worker thread, which publishes them to a `CompletionBoard`.
pub struct CompletionNotifier {
    /// Channel sender for queuing completions
    sender: Option<Sender<TxnId>>,
    board: Arc<CompletionBoard>,
    /// Flag to signal shutdown
    shutdown: Arc<AtomicBool>,
    /// Handle to the background worker thread
    worker_handle: Option<JoinHandle<()>>,
}

impl CompletionNotifier {
    /// Creates the notifier and spawns its worker thread.
    pub fn new() -> Result<Self> {
        let (sender, receiver) = unbounded::<TxnId>();
        let board = Arc::new(CompletionBoard::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let board_clone = Arc::clone(&board);
        let shutdown_clone = Arc::clone(&shutdown);
        let worker_handle = thread::Builder::new()
            .name("txn-completion".into())
            .spawn(move || Self::run_worker(receiver, board_clone, shutdown_clone))?;

        Ok(Self {
            sender: Some(sender),
            board,
            shutdown,
            worker_handle: Some(worker_handle),
        })
    }

    fn run_worker(receiver: Receiver<TxnId>, board: Arc<CompletionBoard>, shutdown: Arc<AtomicBool>) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                while let Ok(txn) = receiver.try_recv() {
                    board.publish(txn);
                }
                break;
            }

            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(txn) => {
                    log::trace!("completion of {} published", txn);
                    board.publish(txn);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Queues a completion announcement.
    pub fn notify(&self, txn: TxnId) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| StrataError::Channel("completion notifier is shut down".into()))?;
        sender
            .send(txn)
            .map_err(|e| StrataError::Channel(format!("Failed to announce {}: {}", txn, e)))
    }

    /// Blocks until `txn` has been announced. Returns false on timeout.
    pub fn wait_for(&self, txn: TxnId, timeout: Option<Duration>) -> bool {
        self.board.wait_for(txn, timeout)
    }

    pub fn board(&self) -> &Arc<CompletionBoard> {
        &self.board
    }
}

impl Drop for CompletionNotifier {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.sender.take();

        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
