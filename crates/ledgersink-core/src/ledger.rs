//! Ledger writer: appends transfer, mint and burn facts.
//!
//! Facts are strictly additive: no row is ever updated in place, and a
//! transaction may own any number of facts of each kind.

use tracing::debug;

use crate::error::SinkError;
use crate::store::WriteScope;
use crate::types::{Burn, FactId, Mint, TransactionId, Transfer};

/// Stateless writer for token movement facts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerWriter;

impl LedgerWriter {
    pub fn new() -> Self {
        Self
    }

    pub async fn record_transfer(
        &self,
        scope: &mut dyn WriteScope,
        transaction: TransactionId,
        transfer: &Transfer,
    ) -> Result<FactId, SinkError> {
        let id = scope
            .insert_transfer(transaction, &transfer.from, &transfer.to, &transfer.amount)
            .await?;
        debug!(
            trx_hash = %transfer.trx_hash,
            from = %transfer.from,
            to = %transfer.to,
            amount = %transfer.amount,
            "transfer recorded"
        );
        Ok(id)
    }

    pub async fn record_mint(
        &self,
        scope: &mut dyn WriteScope,
        transaction: TransactionId,
        mint: &Mint,
    ) -> Result<FactId, SinkError> {
        let id = scope.insert_mint(transaction, &mint.to, &mint.amount).await?;
        debug!(trx_hash = %mint.trx_hash, to = %mint.to, amount = %mint.amount, "mint recorded");
        Ok(id)
    }

    pub async fn record_burn(
        &self,
        scope: &mut dyn WriteScope,
        transaction: TransactionId,
        burn: &Burn,
    ) -> Result<FactId, SinkError> {
        let id = scope.insert_burn(transaction, &burn.from, &burn.amount).await?;
        debug!(trx_hash = %burn.trx_hash, from = %burn.from, amount = %burn.amount, "burn recorded");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLedger;
    use crate::store::{LedgerQuery, LedgerStore};
    use crate::types::{BlockHeader, TokenAmount};
    use chrono::Utc;

    #[tokio::test]
    async fn several_facts_per_transaction() {
        let store = MemoryLedger::new();
        let writer = LedgerWriter::new();
        let mut scope = store.begin().await.unwrap();
        let block = scope
            .insert_block(&BlockHeader::new(7, "0x7", Utc::now()))
            .await
            .unwrap();
        let tx = scope.insert_transaction(block, "h7").await.unwrap();

        let big: TokenAmount = "18446744073709551616000".parse().unwrap();
        for to in ["B", "C"] {
            let transfer = Transfer {
                trx_hash: "h7".into(),
                from: "A".into(),
                to: to.into(),
                amount: big.clone(),
            };
            writer.record_transfer(scope.as_mut(), tx, &transfer).await.unwrap();
        }
        let mint = Mint { trx_hash: "h7".into(), to: "B".into(), amount: TokenAmount::from(3) };
        let burn = Burn { trx_hash: "h7".into(), from: "C".into(), amount: TokenAmount::from(2) };
        let m = writer.record_mint(scope.as_mut(), tx, &mint).await.unwrap();
        let b = writer.record_burn(scope.as_mut(), tx, &burn).await.unwrap();
        assert_ne!(m, b);
        scope.commit().await.unwrap();

        let transfers = store.transfers_for(tx).await.unwrap();
        assert_eq!(transfers.len(), 2);
        assert!(transfers.iter().all(|t| t.amount == big));
        assert_eq!(store.mints_for(tx).await.unwrap()[0].to, "B");
        assert_eq!(store.burns_for(tx).await.unwrap()[0].amount, TokenAmount::from(2));
    }
}
