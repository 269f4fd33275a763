//! In-memory ledger store.
//!
//! Keeps every table in RAM. A write scope holds the writer mutex for its
//! whole lifetime (single writer) and works on a private copy of the
//! committed state; `commit` publishes the copy, anything else throws it
//! away. Reads only take the committed state's read lock, so they never wait
//! on an open scope.
//! Uniqueness, foreign keys and cascading block deletion are checked the way
//! the SQL backends enforce them, so it doubles as the reference backend in
//! tests. All data is lost when the process exits.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::cursor::Cursor;
use crate::error::SinkError;
use crate::store::{LedgerQuery, LedgerStore, WriteScope};
use crate::types::{
    AddressResolution, BlockHeader, BlockId, BlockRecord, BurnRecord, FactId, LinkOutcome,
    MintRecord, RowCounts, TokenAmount, TransactionId, TransactionRecord, TransferRecord,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct LinkRow {
    transaction_id: TransactionId,
    owner: String,
}

/// Every table of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerState {
    next_id: i64,
    cursors: BTreeMap<String, Cursor>,
    blocks: BTreeMap<BlockId, BlockRecord>,
    transactions: BTreeMap<TransactionId, TransactionRecord>,
    /// Keyed by derived address.
    links: BTreeMap<String, LinkRow>,
    transfers: BTreeMap<FactId, TransferRecord>,
    mints: BTreeMap<FactId, MintRecord>,
    burns: BTreeMap<FactId, BurnRecord>,
}

impl LedgerState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn require_transaction(&self, id: TransactionId) -> Result<(), SinkError> {
        if self.transactions.contains_key(&id) {
            Ok(())
        } else {
            Err(SinkError::IntegrityViolation(format!(
                "foreign key violation: transaction {} does not exist",
                id.0
            )))
        }
    }

    fn block_by_hash(&self, hash: &str) -> Option<&BlockRecord> {
        self.blocks.values().find(|b| b.hash == hash)
    }

    fn transactions_of(&self, block: BlockId) -> BTreeSet<TransactionId> {
        self.transactions
            .values()
            .filter(|t| t.block_id == block)
            .map(|t| t.id)
            .collect()
    }

    fn counts_for(&self, txs: &BTreeSet<TransactionId>) -> RowCounts {
        RowCounts {
            blocks: 0,
            transactions: txs.len() as u64,
            address_links: self.links.values().filter(|l| txs.contains(&l.transaction_id)).count() as u64,
            transfers: self.transfers.values().filter(|f| txs.contains(&f.transaction_id)).count() as u64,
            mints: self.mints.values().filter(|f| txs.contains(&f.transaction_id)).count() as u64,
            burns: self.burns.values().filter(|f| txs.contains(&f.transaction_id)).count() as u64,
        }
    }

    /// Row counts across every table.
    pub fn row_counts(&self) -> RowCounts {
        RowCounts {
            blocks: self.blocks.len() as u64,
            transactions: self.transactions.len() as u64,
            address_links: self.links.len() as u64,
            transfers: self.transfers.len() as u64,
            mints: self.mints.len() as u64,
            burns: self.burns.len() as u64,
        }
    }
}

/// In-memory [`LedgerStore`]. Cheap to clone; clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    committed: Arc<RwLock<LedgerState>>,
    writer: Arc<Mutex<()>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the committed state.
    pub async fn snapshot(&self) -> LedgerState {
        self.committed.read().await.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn begin(&self) -> Result<Box<dyn WriteScope>, SinkError> {
        let writer = Arc::clone(&self.writer).lock_owned().await;
        let working = self.committed.read().await.clone();
        Ok(Box::new(MemoryScope {
            _writer: writer,
            committed: Arc::clone(&self.committed),
            working,
        }))
    }
}

#[async_trait]
impl LedgerQuery for MemoryLedger {
    async fn load_cursor(&self, name: &str) -> Result<Option<Cursor>, SinkError> {
        Ok(self.committed.read().await.cursors.get(name).cloned())
    }

    async fn resolve_address(&self, derived: &str) -> Result<AddressResolution, SinkError> {
        let state = self.committed.read().await;
        Ok(state.links.get(derived).map(|l| l.owner.clone()).into())
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<BlockRecord>, SinkError> {
        Ok(self.committed.read().await.block_by_hash(hash).cloned())
    }

    async fn transaction_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<TransactionRecord>, SinkError> {
        let state = self.committed.read().await;
        Ok(state.transactions.values().find(|t| t.hash == hash).cloned())
    }

    async fn transfers_for(
        &self,
        transaction: TransactionId,
    ) -> Result<Vec<TransferRecord>, SinkError> {
        let state = self.committed.read().await;
        Ok(state
            .transfers
            .values()
            .filter(|f| f.transaction_id == transaction)
            .cloned()
            .collect())
    }

    async fn mints_for(&self, transaction: TransactionId) -> Result<Vec<MintRecord>, SinkError> {
        let state = self.committed.read().await;
        Ok(state
            .mints
            .values()
            .filter(|f| f.transaction_id == transaction)
            .cloned()
            .collect())
    }

    async fn burns_for(&self, transaction: TransactionId) -> Result<Vec<BurnRecord>, SinkError> {
        let state = self.committed.read().await;
        Ok(state
            .burns
            .values()
            .filter(|f| f.transaction_id == transaction)
            .cloned()
            .collect())
    }

    async fn row_counts(&self) -> Result<RowCounts, SinkError> {
        Ok(self.committed.read().await.row_counts())
    }

    async fn block_row_counts(&self, hash: &str) -> Result<RowCounts, SinkError> {
        let state = self.committed.read().await;
        let Some(block) = state.block_by_hash(hash) else {
            return Ok(RowCounts::default());
        };
        let mut counts = state.counts_for(&state.transactions_of(block.id));
        counts.blocks = 1;
        Ok(counts)
    }
}

/// Write scope over a private copy of the ledger.
struct MemoryScope {
    _writer: OwnedMutexGuard<()>,
    committed: Arc<RwLock<LedgerState>>,
    working: LedgerState,
}

#[async_trait]
impl WriteScope for MemoryScope {
    async fn insert_block(&mut self, header: &BlockHeader) -> Result<BlockId, SinkError> {
        if self.working.block_by_hash(&header.hash).is_some() {
            return Err(SinkError::IntegrityViolation(format!(
                "duplicate block hash {}",
                header.hash
            )));
        }
        let id = BlockId(self.working.next_id());
        self.working.blocks.insert(
            id,
            BlockRecord {
                id,
                number: header.number,
                hash: header.hash.clone(),
                timestamp: header.timestamp,
            },
        );
        Ok(id)
    }

    async fn find_transaction(
        &mut self,
        hash: &str,
    ) -> Result<Option<TransactionRecord>, SinkError> {
        Ok(self
            .working
            .transactions
            .values()
            .find(|t| t.hash == hash)
            .cloned())
    }

    async fn insert_transaction(
        &mut self,
        block: BlockId,
        hash: &str,
    ) -> Result<TransactionId, SinkError> {
        if !self.working.blocks.contains_key(&block) {
            return Err(SinkError::IntegrityViolation(format!(
                "foreign key violation: block {} does not exist",
                block.0
            )));
        }
        if self.working.transactions.values().any(|t| t.hash == hash) {
            return Err(SinkError::IntegrityViolation(format!(
                "duplicate transaction hash {hash}"
            )));
        }
        let id = TransactionId(self.working.next_id());
        self.working.transactions.insert(
            id,
            TransactionRecord {
                id,
                block_id: block,
                hash: hash.to_string(),
            },
        );
        Ok(id)
    }

    async fn link_address(
        &mut self,
        transaction: TransactionId,
        owner: &str,
        derived: &str,
    ) -> Result<LinkOutcome, SinkError> {
        self.working.require_transaction(transaction)?;
        if let Some(existing) = self.working.links.get(derived) {
            return Ok(if existing.owner == owner {
                LinkOutcome::AlreadyLinked
            } else {
                LinkOutcome::Conflict {
                    existing_owner: existing.owner.clone(),
                }
            });
        }
        self.working.links.insert(
            derived.to_string(),
            LinkRow {
                transaction_id: transaction,
                owner: owner.to_string(),
            },
        );
        Ok(LinkOutcome::Inserted)
    }

    async fn resolve_address(&mut self, derived: &str) -> Result<AddressResolution, SinkError> {
        Ok(self.working.links.get(derived).map(|l| l.owner.clone()).into())
    }

    async fn insert_transfer(
        &mut self,
        transaction: TransactionId,
        from: &str,
        to: &str,
        amount: &TokenAmount,
    ) -> Result<FactId, SinkError> {
        self.working.require_transaction(transaction)?;
        let id = FactId(self.working.next_id());
        self.working.transfers.insert(
            id,
            TransferRecord {
                id,
                transaction_id: transaction,
                from: from.to_string(),
                to: to.to_string(),
                amount: amount.clone(),
            },
        );
        Ok(id)
    }

    async fn insert_mint(
        &mut self,
        transaction: TransactionId,
        to: &str,
        amount: &TokenAmount,
    ) -> Result<FactId, SinkError> {
        self.working.require_transaction(transaction)?;
        let id = FactId(self.working.next_id());
        self.working.mints.insert(
            id,
            MintRecord {
                id,
                transaction_id: transaction,
                to: to.to_string(),
                amount: amount.clone(),
            },
        );
        Ok(id)
    }

    async fn insert_burn(
        &mut self,
        transaction: TransactionId,
        from: &str,
        amount: &TokenAmount,
    ) -> Result<FactId, SinkError> {
        self.working.require_transaction(transaction)?;
        let id = FactId(self.working.next_id());
        self.working.burns.insert(
            id,
            BurnRecord {
                id,
                transaction_id: transaction,
                from: from.to_string(),
                amount: amount.clone(),
            },
        );
        Ok(id)
    }

    async fn save_cursor(&mut self, name: &str, cursor: &Cursor) -> Result<(), SinkError> {
        self.working.cursors.insert(name.to_string(), cursor.clone());
        Ok(())
    }

    async fn delete_block(&mut self, hash: &str) -> Result<bool, SinkError> {
        let Some(block) = self.working.block_by_hash(hash).map(|b| b.id) else {
            return Ok(false);
        };
        let txs = self.working.transactions_of(block);
        let state = &mut self.working;
        state.links.retain(|_, l| !txs.contains(&l.transaction_id));
        state.transfers.retain(|_, f| !txs.contains(&f.transaction_id));
        state.mints.retain(|_, f| !txs.contains(&f.transaction_id));
        state.burns.retain(|_, f| !txs.contains(&f.transaction_id));
        state.transactions.retain(|id, _| !txs.contains(id));
        state.blocks.remove(&block);
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<(), SinkError> {
        let MemoryScope {
            _writer,
            committed,
            working,
        } = *self;
        *committed.write().await = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), SinkError> {
        Ok(())
    }
}
