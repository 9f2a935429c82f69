use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::common::{PageId, Result, TxnId};
use crate::storage::disk::Storage;
use crate::storage::page::DiskPage;

use super::reader::WalReader;
use super::record::WalRecord;

/// Outcome of a recovery run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Transactions whose writes were redone.
    pub committed: BTreeSet<TxnId>,
    /// Aborted or unfinished transactions whose writes were rolled back.
    pub rolled_back: BTreeSet<TxnId>,
    pub pages_written: usize,
}

/// Rebuilds committed state from a log.
pub trait Recovery {
    /// Replays the log stored in `wal` against `target`.
    fn run(&self, wal: &dyn Storage, target: &dyn Storage) -> Result<RecoveryReport>;
}

/// Page-image replay.
///
/// For every logged page, the after-image of the last write by a committed
/// transaction is written to the target. Pages only ever written by aborted or
/// unfinished transactions get the before-image of their earliest logged write.
/// Only whole images are written, so running the replay twice gives the same
/// result.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayRecovery;

impl ReplayRecovery {
    pub fn new() -> Self {
        Self
    }
}

impl Recovery for ReplayRecovery {
    fn run(&self, wal: &dyn Storage, target: &dyn Storage) -> Result<RecoveryReport> {
        let records = WalReader::new(wal).collect::<Result<Vec<_>>>()?;

        let mut started = BTreeSet::new();
        let mut committed = BTreeSet::new();
        for record in &records {
            match record {
                WalRecord::Started { txn } => {
                    started.insert(*txn);
                }
                WalRecord::Committed { txn, .. } => {
                    committed.insert(*txn);
                }
                _ => {}
            }
        }

        let mut redo: HashMap<PageId, &DiskPage> = HashMap::new();
        let mut undo: HashMap<PageId, &DiskPage> = HashMap::new();
        for record in &records {
            match record {
                WalRecord::AfterWrite { txn, image } if committed.contains(txn) => {
                    redo.insert(image.id(), image);
                }
                WalRecord::BeforeWrite { image, .. } => {
                    undo.entry(image.id()).or_insert(image);
                }
                _ => {}
            }
        }

        let mut images: BTreeMap<PageId, &DiskPage> = undo.into_iter().collect();
        images.extend(redo);
        for image in images.values() {
            target.write_page(image)?;
        }

        let report = RecoveryReport {
            rolled_back: started.difference(&committed).copied().collect(),
            committed,
            pages_written: images.len(),
        };
        log::info!(
            "recovery replayed {} records: {} committed, {} rolled back, {} pages written",
            records.len(),
            report.committed.len(),
            report.rolled_back.len(),
            report.pages_written
        );
        Ok(report)
    }
}
