//! Storage seams.
//!
//! Every write goes through a [`WriteScope`]: an explicit handle on one open
//! atomic unit, obtained from [`LedgerStore::begin`] and consumed by
//! [`WriteScope::commit`] or [`WriteScope::rollback`]. Dropping a scope
//! without committing discards everything written through it, which is what
//! makes an in-flight batch abortable on cancellation.
//!
//! Implementations: `MemoryLedger` (this crate), `SqliteStorage` and
//! `PostgresStorage` (`ledgersink-storage`).

use async_trait::async_trait;

use crate::cursor::Cursor;
use crate::error::SinkError;
use crate::types::{
    AddressResolution, BlockHeader, BlockId, BlockRecord, BurnRecord, FactId, LinkOutcome,
    MintRecord, RowCounts, TokenAmount, TransactionId, TransactionRecord, TransferRecord,
};

/// A store that can open atomic write scopes.
#[async_trait]
pub trait LedgerStore: LedgerQuery {
    /// Open a new atomic unit of work.
    ///
    /// The sink is single-writer: callers must not hold two scopes at once.
    /// `LedgerQuery` reads issued while a scope is open go to committed
    /// state. A backend with a single connection (`SqliteStorage::in_memory`)
    /// cannot serve them until the scope ends, and they fail with a transient
    /// pool timeout instead.
    async fn begin(&self) -> Result<Box<dyn WriteScope>, SinkError>;
}

/// One open atomic unit of work.
#[async_trait]
pub trait WriteScope: Send {
    /// Insert a block row. Block hashes are unique.
    async fn insert_block(&mut self, header: &BlockHeader) -> Result<BlockId, SinkError>;

    /// Look up a ledger transaction by hash, including rows written earlier in this scope.
    async fn find_transaction(&mut self, hash: &str)
        -> Result<Option<TransactionRecord>, SinkError>;

    /// Insert a ledger transaction owned by `block`. Transaction hashes are unique.
    async fn insert_transaction(
        &mut self,
        block: BlockId,
        hash: &str,
    ) -> Result<TransactionId, SinkError>;

    /// Record `derived → owner` unless `derived` is already linked.
    async fn link_address(
        &mut self,
        transaction: TransactionId,
        owner: &str,
        derived: &str,
    ) -> Result<LinkOutcome, SinkError>;

    /// Resolve a derived address, seeing uncommitted links of this scope.
    async fn resolve_address(&mut self, derived: &str) -> Result<AddressResolution, SinkError>;

    async fn insert_transfer(
        &mut self,
        transaction: TransactionId,
        from: &str,
        to: &str,
        amount: &TokenAmount,
    ) -> Result<FactId, SinkError>;

    async fn insert_mint(
        &mut self,
        transaction: TransactionId,
        to: &str,
        amount: &TokenAmount,
    ) -> Result<FactId, SinkError>;

    async fn insert_burn(
        &mut self,
        transaction: TransactionId,
        from: &str,
        amount: &TokenAmount,
    ) -> Result<FactId, SinkError>;

    /// Upsert the checkpoint row called `name`.
    async fn save_cursor(&mut self, name: &str, cursor: &Cursor) -> Result<(), SinkError>;

    /// Delete the block with `hash` and every row it owns.
    ///
    /// Returns `false` if no such block exists.
    async fn delete_block(&mut self, hash: &str) -> Result<bool, SinkError>;

    /// Make every write of this scope durable.
    async fn commit(self: Box<Self>) -> Result<(), SinkError>;

    /// Discard every write of this scope.
    async fn rollback(self: Box<Self>) -> Result<(), SinkError>;
}

/// Read side over committed state.
#[async_trait]
pub trait LedgerQuery: Send + Sync {
    /// Load the checkpoint row called `name` (`None` if never saved).
    async fn load_cursor(&self, name: &str) -> Result<Option<Cursor>, SinkError>;

    async fn resolve_address(&self, derived: &str) -> Result<AddressResolution, SinkError>;

    async fn block_by_hash(&self, hash: &str) -> Result<Option<BlockRecord>, SinkError>;

    async fn transaction_by_hash(&self, hash: &str)
        -> Result<Option<TransactionRecord>, SinkError>;

    async fn transfers_for(
        &self,
        transaction: TransactionId,
    ) -> Result<Vec<TransferRecord>, SinkError>;

    async fn mints_for(&self, transaction: TransactionId) -> Result<Vec<MintRecord>, SinkError>;

    async fn burns_for(&self, transaction: TransactionId) -> Result<Vec<BurnRecord>, SinkError>;

    /// Row counts across the whole store.
    async fn row_counts(&self) -> Result<RowCounts, SinkError>;

    /// Row counts for the rows owned by the block with `hash`.
    async fn block_row_counts(&self, hash: &str) -> Result<RowCounts, SinkError>;
}

/// Roll `scope` back after `cause` and return the error to report.
///
/// A failing rollback is reported together with the original cause.
pub async fn abort_scope(scope: Box<dyn WriteScope>, cause: SinkError) -> SinkError {
    match scope.rollback().await {
        Ok(()) => {
            tracing::warn!(error = %cause, "atomic unit rolled back");
            cause
        }
        Err(rollback) => {
            tracing::error!(error = %cause, rollback = %rollback, "rollback failed");
            SinkError::RollbackFailed {
                rollback: rollback.to_string(),
                cause: Box::new(cause),
            }
        }
    }
}
