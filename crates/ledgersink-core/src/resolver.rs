//! Transaction identity resolver.
//!
//! Collapses the events of a block into logical ledger transactions: the
//! first event carrying a hash creates the row, every later event with the
//! same hash reuses its id. Ids already resolved in the current batch are
//! served from a cache that lives exactly as long as the batch.

use std::collections::HashMap;

use tracing::debug;

use crate::error::SinkError;
use crate::store::WriteScope;
use crate::types::{BlockId, TransactionId};

/// Lookup-or-create of transaction ids for one batch.
#[derive(Debug, Default)]
pub struct TransactionResolver {
    cache: HashMap<String, TransactionId>,
}

impl TransactionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `hash` to a transaction id, inserting a row owned by `block`
    /// if the hash has never been seen.
    ///
    /// A transaction belongs to exactly one block, so a hash already stored
    /// under another block is an integrity violation. A uniqueness violation
    /// on insert is returned unchanged; under a single writer it means
    /// another process is writing to the same store.
    pub async fn resolve(
        &mut self,
        scope: &mut dyn WriteScope,
        block: BlockId,
        hash: &str,
    ) -> Result<TransactionId, SinkError> {
        if let Some(id) = self.cache.get(hash) {
            return Ok(*id);
        }

        debug!(trx_hash = hash, "handling transaction");
        let id = match scope.find_transaction(hash).await? {
            Some(existing) if existing.block_id == block => existing.id,
            Some(existing) => {
                return Err(SinkError::IntegrityViolation(format!(
                    "transaction {hash} already belongs to block {}, not block {}",
                    existing.block_id.0, block.0
                )))
            }
            None => scope.insert_transaction(block, hash).await?,
        };
        self.cache.insert(hash.to_string(), id);
        Ok(id)
    }

    /// Number of distinct transactions resolved so far in this batch.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLedger;
    use crate::store::{LedgerQuery, LedgerStore};
    use crate::types::BlockHeader;
    use chrono::Utc;

    #[tokio::test]
    async fn same_hash_same_identity() {
        let store = MemoryLedger::new();
        let mut scope = store.begin().await.unwrap();
        let block = scope
            .insert_block(&BlockHeader::new(100, "0xa", Utc::now()))
            .await
            .unwrap();

        let mut resolver = TransactionResolver::new();
        let first = resolver.resolve(scope.as_mut(), block, "h1").await.unwrap();
        let again = resolver.resolve(scope.as_mut(), block, "h1").await.unwrap();
        let other = resolver.resolve(scope.as_mut(), block, "h2").await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(resolver.len(), 2);

        scope.commit().await.unwrap();
        assert_eq!(store.row_counts().await.unwrap().transactions, 2);
    }

    #[tokio::test]
    async fn lookup_path_finds_rows_of_the_same_block() {
        let store = MemoryLedger::new();
        let mut scope = store.begin().await.unwrap();
        let block = scope
            .insert_block(&BlockHeader::new(100, "0xa", Utc::now()))
            .await
            .unwrap();

        let first = TransactionResolver::new()
            .resolve(scope.as_mut(), block, "h1")
            .await
            .unwrap();
        // a fresh resolver has an empty cache and goes through find_transaction
        let again = TransactionResolver::new()
            .resolve(scope.as_mut(), block, "h1")
            .await
            .unwrap();
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn hash_owned_by_earlier_block_is_rejected() {
        let store = MemoryLedger::new();

        let mut scope = store.begin().await.unwrap();
        let b1 = scope
            .insert_block(&BlockHeader::new(100, "0xa", Utc::now()))
            .await
            .unwrap();
        TransactionResolver::new()
            .resolve(scope.as_mut(), b1, "h1")
            .await
            .unwrap();
        scope.commit().await.unwrap();

        let mut scope = store.begin().await.unwrap();
        let b2 = scope
            .insert_block(&BlockHeader::new(101, "0xb", Utc::now()))
            .await
            .unwrap();
        let err = TransactionResolver::new()
            .resolve(scope.as_mut(), b2, "h1")
            .await
            .unwrap_err();
        assert!(err.is_integrity_violation());
        scope.rollback().await.unwrap();

        let record = store.transaction_by_hash("h1").await.unwrap().unwrap();
        assert_eq!(record.block_id, b1);
        assert_eq!(store.row_counts().await.unwrap().blocks, 1);
    }
}
