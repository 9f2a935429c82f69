use crate::buffer::CachedPage;
use crate::common::{Result, TxnId};

/// Observes the writes a transaction performs through its scoped cache.
///
/// `before_write` runs before the page is mutated (undo information) and
/// `after_write` after the mutation (redo information). `commit` and `abort`
/// settle the transaction's write set.
pub trait WriteTracker: Send + Sync {
    fn start(&self, txn: TxnId) -> Result<()>;
    fn before_write(&self, txn: TxnId, page: &CachedPage) -> Result<()>;
    fn after_write(&self, txn: TxnId, page: &CachedPage) -> Result<()>;
    fn commit(&self, txn: TxnId) -> Result<()>;
    fn abort(&self, txn: TxnId) -> Result<()>;
}

/// Tracker that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracker;

impl WriteTracker for NoopTracker {
    fn start(&self, _txn: TxnId) -> Result<()> {
        Ok(())
    }

    fn before_write(&self, _txn: TxnId, _page: &CachedPage) -> Result<()> {
        Ok(())
    }

    fn after_write(&self, _txn: TxnId, _page: &CachedPage) -> Result<()> {
        Ok(())
    }

    fn commit(&self, _txn: TxnId) -> Result<()> {
        Ok(())
    }

    fn abort(&self, _txn: TxnId) -> Result<()> {
        Ok(())
    }
}
