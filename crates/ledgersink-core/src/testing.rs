//! Fault injection for crash and atomicity tests.
//!
//! [`FailingStore`] wraps any [`LedgerStore`] and makes the next write scope
//! fail at a chosen point, as if the process had crashed or the connection
//! had dropped there. Reads are passed straight through.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::cursor::Cursor;
use crate::error::SinkError;
use crate::store::{LedgerQuery, LedgerStore, WriteScope};
use crate::types::{
    AddressResolution, BlockHeader, BlockId, BlockRecord, BurnRecord, FactId, LinkOutcome,
    MintRecord, RowCounts, TokenAmount, TransactionId, TransactionRecord, TransferRecord,
};

/// Where the next scope fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// Fail the n-th write call of the scope (0-based), reads included.
    Op(usize),
    /// Fail the commit itself; nothing of the scope becomes visible.
    Commit,
    /// Never return from the n-th write call, so the caller can cancel mid-unit.
    Hang(usize),
}

/// A store whose next scope fails once at a chosen [`FailPoint`].
pub struct FailingStore<S> {
    inner: S,
    plan: Mutex<Option<FailPoint>>,
}

impl<S: LedgerStore> FailingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            plan: Mutex::new(None),
        }
    }

    /// Arm a one-shot failure for the next scope opened.
    pub fn fail_at(&self, point: FailPoint) {
        if let Ok(mut plan) = self.plan.lock() {
            *plan = Some(point);
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

fn injected() -> SinkError {
    SinkError::TransientStorage("injected failure".into())
}

#[async_trait]
impl<S: LedgerStore> LedgerStore for FailingStore<S> {
    async fn begin(&self) -> Result<Box<dyn WriteScope>, SinkError> {
        let plan = self.plan.lock().ok().and_then(|mut p| p.take());
        let inner = self.inner.begin().await?;
        Ok(Box::new(FailingScope { inner, plan, calls: 0 }))
    }
}

#[async_trait]
impl<S: LedgerStore> LedgerQuery for FailingStore<S> {
    async fn load_cursor(&self, name: &str) -> Result<Option<Cursor>, SinkError> {
        self.inner.load_cursor(name).await
    }

    async fn resolve_address(&self, derived: &str) -> Result<AddressResolution, SinkError> {
        self.inner.resolve_address(derived).await
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<BlockRecord>, SinkError> {
        self.inner.block_by_hash(hash).await
    }

    async fn transaction_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<TransactionRecord>, SinkError> {
        self.inner.transaction_by_hash(hash).await
    }

    async fn transfers_for(
        &self,
        transaction: TransactionId,
    ) -> Result<Vec<TransferRecord>, SinkError> {
        self.inner.transfers_for(transaction).await
    }

    async fn mints_for(&self, transaction: TransactionId) -> Result<Vec<MintRecord>, SinkError> {
        self.inner.mints_for(transaction).await
    }

    async fn burns_for(&self, transaction: TransactionId) -> Result<Vec<BurnRecord>, SinkError> {
        self.inner.burns_for(transaction).await
    }

    async fn row_counts(&self) -> Result<RowCounts, SinkError> {
        self.inner.row_counts().await
    }

    async fn block_row_counts(&self, hash: &str) -> Result<RowCounts, SinkError> {
        self.inner.block_row_counts(hash).await
    }
}

struct FailingScope {
    inner: Box<dyn WriteScope>,
    plan: Option<FailPoint>,
    calls: usize,
}

impl FailingScope {
    async fn tick(&mut self) -> Result<(), SinkError> {
        let call = self.calls;
        self.calls += 1;
        match self.plan {
            Some(FailPoint::Op(n)) if n == call => Err(injected()),
            Some(FailPoint::Hang(n)) if n == call => std::future::pending().await,
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl WriteScope for FailingScope {
    async fn insert_block(&mut self, header: &BlockHeader) -> Result<BlockId, SinkError> {
        self.tick().await?;
        self.inner.insert_block(header).await
    }

    async fn find_transaction(
        &mut self,
        hash: &str,
    ) -> Result<Option<TransactionRecord>, SinkError> {
        self.tick().await?;
        self.inner.find_transaction(hash).await
    }

    async fn insert_transaction(
        &mut self,
        block: BlockId,
        hash: &str,
    ) -> Result<TransactionId, SinkError> {
        self.tick().await?;
        self.inner.insert_transaction(block, hash).await
    }

    async fn link_address(
        &mut self,
        transaction: TransactionId,
        owner: &str,
        derived: &str,
    ) -> Result<LinkOutcome, SinkError> {
        self.tick().await?;
        self.inner.link_address(transaction, owner, derived).await
    }

    async fn resolve_address(&mut self, derived: &str) -> Result<AddressResolution, SinkError> {
        self.tick().await?;
        self.inner.resolve_address(derived).await
    }

    async fn insert_transfer(
        &mut self,
        transaction: TransactionId,
        from: &str,
        to: &str,
        amount: &TokenAmount,
    ) -> Result<FactId, SinkError> {
        self.tick().await?;
        self.inner.insert_transfer(transaction, from, to, amount).await
    }

    async fn insert_mint(
        &mut self,
        transaction: TransactionId,
        to: &str,
        amount: &TokenAmount,
    ) -> Result<FactId, SinkError> {
        self.tick().await?;
        self.inner.insert_mint(transaction, to, amount).await
    }

    async fn insert_burn(
        &mut self,
        transaction: TransactionId,
        from: &str,
        amount: &TokenAmount,
    ) -> Result<FactId, SinkError> {
        self.tick().await?;
        self.inner.insert_burn(transaction, from, amount).await
    }

    async fn save_cursor(&mut self, name: &str, cursor: &Cursor) -> Result<(), SinkError> {
        self.tick().await?;
        self.inner.save_cursor(name, cursor).await
    }

    async fn delete_block(&mut self, hash: &str) -> Result<bool, SinkError> {
        self.tick().await?;
        self.inner.delete_block(hash).await
    }

    async fn commit(self: Box<Self>) -> Result<(), SinkError> {
        if self.plan == Some(FailPoint::Commit) {
            // dropping the inner scope discards its writes
            drop(self);
            return Err(injected());
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), SinkError> {
        self.inner.rollback().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLedger;
    use chrono::Utc;

    #[tokio::test]
    async fn fails_once_at_the_armed_op() {
        let store = FailingStore::new(MemoryLedger::new());
        store.fail_at(FailPoint::Op(1));

        let mut scope = store.begin().await.unwrap();
        let block = scope
            .insert_block(&BlockHeader::new(1, "0x1", Utc::now()))
            .await
            .unwrap();
        assert!(scope.insert_transaction(block, "h1").await.unwrap_err().is_retryable());
        scope.rollback().await.unwrap();

        // the plan is consumed by the first scope
        let mut scope = store.begin().await.unwrap();
        let block = scope
            .insert_block(&BlockHeader::new(1, "0x1", Utc::now()))
            .await
            .unwrap();
        scope.insert_transaction(block, "h1").await.unwrap();
        scope.commit().await.unwrap();
        assert_eq!(store.row_counts().await.unwrap().transactions, 1);
    }

    #[tokio::test]
    async fn failed_commit_discards_writes() {
        let store = FailingStore::new(MemoryLedger::new());
        store.fail_at(FailPoint::Commit);

        let mut scope = store.begin().await.unwrap();
        scope
            .insert_block(&BlockHeader::new(1, "0x1", Utc::now()))
            .await
            .unwrap();
        assert!(scope.commit().await.is_err());
        assert_eq!(store.row_counts().await.unwrap().total(), 0);
    }
}
