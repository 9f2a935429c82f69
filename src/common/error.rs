use thiserror::Error;

use super::types::{PageId, TxnId};

/// Storage engine error types.
///
/// Page-level conditions (out of space, out of range, deleted record) are not
/// errors; they are reported through `PutRecordResult` and `GetRecordResult`.
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("All pages are pinned, there is no victim for eviction")]
    AllPagesPinned,

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Transaction {txn} has been aborted: {reason}")]
    TransactionAborted { txn: TxnId, reason: String },

    #[error("Transaction {txn} timed out waiting for transaction {blocking}")]
    WaitTimeout { txn: TxnId, blocking: TxnId },

    #[error("Transaction {0} is not active")]
    UnknownTransaction(TxnId),

    #[error("Record decode error: {0}")]
    RecordDecode(String),

    #[error("WAL corrupted: {0}")]
    WalCorrupted(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Relation {0} not found")]
    RelationNotFound(String),

    #[error("Table {0} already exists")]
    DuplicateTable(String),
}

impl StrataError {
    /// Returns true for errors that end the current transaction.
    pub fn is_transaction_failure(&self) -> bool {
        matches!(
            self,
            StrataError::TransactionAborted { .. } | StrataError::WaitTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StrataError>;
