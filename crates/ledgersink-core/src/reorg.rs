//! Reorg handling: retracting a previously committed block.
//!
//! A block row moves through three states:
//!
//! ```text
//! Absent ──insert+commit──▶ Committed ──undo──▶ Retracting ──commit──▶ Absent
//! ```
//!
//! `Retracting` only exists inside the open scope. If that scope is rolled
//! back the block stays `Committed` with every row it owns.

use std::fmt;

use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::cursor::Cursor;
use crate::error::SinkError;
use crate::store::{abort_scope, LedgerQuery, LedgerStore};
use crate::types::RowCounts;

/// Lifecycle state of one block row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Absent,
    Committed,
    /// Deleted inside an open scope, not yet committed.
    Retracting,
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Committed => write!(f, "committed"),
            Self::Retracting => write!(f, "retracting"),
        }
    }
}

/// Result of an undo request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetractOutcome {
    /// The block and the listed rows were deleted.
    Retracted { rows: RowCounts },
    /// No block with that hash was stored. The cursor, if any, was still saved.
    Absent,
}

/// Deletes a block and everything it owns in one atomic unit.
#[derive(Debug, Clone, Default)]
pub struct ReorgHandler {
    checkpoints: CheckpointStore,
}

impl ReorgHandler {
    pub fn new(checkpoints: CheckpointStore) -> Self {
        Self { checkpoints }
    }

    /// Current committed state of the block with `hash`.
    pub async fn state<Q>(&self, store: &Q, hash: &str) -> Result<BlockState, SinkError>
    where
        Q: LedgerQuery + ?Sized,
    {
        Ok(match store.block_by_hash(hash).await? {
            Some(_) => BlockState::Committed,
            None => BlockState::Absent,
        })
    }

    /// Retract the block with `hash`, saving `cursor` in the same unit when given.
    ///
    /// Blocks that are not the one named are never touched.
    pub async fn retract<S>(
        &self,
        store: &S,
        hash: &str,
        cursor: Option<&Cursor>,
    ) -> Result<RetractOutcome, SinkError>
    where
        S: LedgerStore + ?Sized,
    {
        let rows = store.block_row_counts(hash).await?;
        let mut scope = store.begin().await?;

        let deleted = match scope.delete_block(hash).await {
            Ok(deleted) => deleted,
            Err(e) => return Err(abort_scope(scope, e).await),
        };
        if deleted {
            debug!(block_hash = hash, state = %BlockState::Retracting, "block deleted in scope");
        }

        if let Some(cursor) = cursor {
            if let Err(e) = self.checkpoints.save(scope.as_mut(), cursor).await {
                return Err(abort_scope(scope, e).await);
            }
        }
        scope.commit().await?;

        if deleted {
            info!(
                block_hash = hash,
                transactions = rows.transactions,
                facts = rows.transfers + rows.mints + rows.burns,
                links = rows.address_links,
                "block retracted"
            );
            Ok(RetractOutcome::Retracted { rows })
        } else {
            warn!(block_hash = hash, "undo signal for unknown block, nothing retracted");
            Ok(RetractOutcome::Absent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLedger;
    use crate::store::WriteScope;
    use crate::types::{BlockHeader, TokenAmount};
    use chrono::Utc;

    async fn commit_block(store: &MemoryLedger, number: u64, hash: &str, trx: &str) {
        let mut scope = store.begin().await.unwrap();
        let block = scope
            .insert_block(&BlockHeader::new(number, hash, Utc::now()))
            .await
            .unwrap();
        let tx = scope.insert_transaction(block, trx).await.unwrap();
        scope.link_address(tx, "owner", &format!("derived-{trx}")).await.unwrap();
        scope.insert_transfer(tx, "x", "y", &TokenAmount::from(1)).await.unwrap();
        scope.insert_mint(tx, "y", &TokenAmount::from(2)).await.unwrap();
        scope.commit().await.unwrap();
    }

    #[tokio::test]
    async fn retract_removes_only_the_named_block() {
        let store = MemoryLedger::new();
        let reorg = ReorgHandler::default();
        commit_block(&store, 100, "0xa", "h1").await;
        commit_block(&store, 101, "0xb", "h2").await;
        let before_b = store.block_row_counts("0xb").await.unwrap();

        let outcome = reorg.retract(&store, "0xb", Some(&Cursor::new("c100"))).await.unwrap();
        match outcome {
            RetractOutcome::Retracted { rows } => {
                assert_eq!(rows.transactions, 1);
                assert_eq!(rows.transfers, 1);
                assert_eq!(rows.mints, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        assert_eq!(reorg.state(&store, "0xb").await.unwrap(), BlockState::Absent);
        assert_eq!(reorg.state(&store, "0xa").await.unwrap(), BlockState::Committed);
        assert_eq!(store.block_row_counts("0xb").await.unwrap(), RowCounts::default());
        assert_ne!(before_b, RowCounts::default());
        assert!(store.transaction_by_hash("h2").await.unwrap().is_none());
        assert!(store.transaction_by_hash("h1").await.unwrap().is_some());
        assert!(!store.resolve_address("derived-h2").await.unwrap().is_found());
        assert!(store.resolve_address("derived-h1").await.unwrap().is_found());
        assert_eq!(
            store.load_cursor("token_tracker").await.unwrap(),
            Some(Cursor::new("c100"))
        );
    }

    #[tokio::test]
    async fn unknown_block_still_saves_cursor() {
        let store = MemoryLedger::new();
        let reorg = ReorgHandler::default();
        let outcome = reorg.retract(&store, "0xdead", Some(&Cursor::new("c9"))).await.unwrap();
        assert_eq!(outcome, RetractOutcome::Absent);
        assert_eq!(
            store.load_cursor("token_tracker").await.unwrap(),
            Some(Cursor::new("c9"))
        );
    }

    #[tokio::test]
    async fn retract_without_cursor_keeps_checkpoint() {
        let store = MemoryLedger::new();
        let reorg = ReorgHandler::default();
        commit_block(&store, 1, "0x1", "h1").await;
        let mut scope = store.begin().await.unwrap();
        scope.save_cursor("token_tracker", &Cursor::new("c1")).await.unwrap();
        scope.commit().await.unwrap();

        reorg.retract(&store, "0x1", None).await.unwrap();
        assert_eq!(
            store.load_cursor("token_tracker").await.unwrap(),
            Some(Cursor::new("c1"))
        );
        assert_eq!(store.row_counts().await.unwrap().total(), 0);
    }
}
