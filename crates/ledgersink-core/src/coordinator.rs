//! Block transaction coordinator.
//!
//! Turns one delivered block into exactly one atomic unit: the block row,
//! its ledger transactions, address links, transfers, mints and burns, and
//! the checkpoint. Either all of them become visible or none do.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::address::AddressBook;
use crate::checkpoint::CheckpointStore;
use crate::config::{EmptyBatchPolicy, SinkConfig};
use crate::cursor::Cursor;
use crate::decoder::{JsonPayloadDecoder, PayloadDecoder};
use crate::error::SinkError;
use crate::handler::{BlockScopedData, BlockUndoSignal, SinkHandler};
use crate::ledger::LedgerWriter;
use crate::progress::ProgressStats;
use crate::reorg::{ReorgHandler, RetractOutcome};
use crate::resolver::TransactionResolver;
use crate::store::{abort_scope, LedgerStore, WriteScope};
use crate::types::{BlockHeader, BlockOutput, LinkOutcome};

/// Rows written by one committed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub transactions: usize,
    pub links: usize,
    pub transfers: usize,
    pub mints: usize,
    pub burns: usize,
}

/// What happened to one delivered block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Everything, checkpoint included, was committed.
    Committed(BatchSummary),
    /// The block had no events; only the checkpoint was committed.
    CheckpointOnly,
    /// The block had no events and nothing was written.
    Skipped,
}

fn step(block_number: u64, context: &'static str) -> impl FnOnce(SinkError) -> SinkError {
    move |e| e.in_block(block_number, context)
}

/// Writes blocks into a [`LedgerStore`], one atomic unit per block.
pub struct BlockCoordinator<S: LedgerStore> {
    store: Arc<S>,
    config: SinkConfig,
    decoder: Box<dyn PayloadDecoder>,
    checkpoints: CheckpointStore,
    addresses: AddressBook,
    ledger: LedgerWriter,
    reorg: ReorgHandler,
    stats: Arc<ProgressStats>,
}

impl<S: LedgerStore> BlockCoordinator<S> {
    pub fn new(store: Arc<S>, config: SinkConfig) -> Self {
        let checkpoints = CheckpointStore::new(config.checkpoint_name.clone());
        Self {
            store,
            decoder: Box::new(JsonPayloadDecoder),
            addresses: AddressBook::new(config.address_conflicts),
            ledger: LedgerWriter::new(),
            reorg: ReorgHandler::new(checkpoints.clone()),
            checkpoints,
            stats: Arc::new(ProgressStats::new()),
            config,
        }
    }

    /// Replace the payload decoder (JSON by default).
    pub fn with_decoder(mut self, decoder: impl PayloadDecoder + 'static) -> Self {
        self.decoder = Box::new(decoder);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Counters for a [`ProgressReporter`](crate::progress::ProgressReporter).
    pub fn stats(&self) -> Arc<ProgressStats> {
        Arc::clone(&self.stats)
    }

    /// The cursor to resume the stream from, `None` for a fresh start.
    pub async fn start_cursor(&self) -> Result<Option<Cursor>, SinkError> {
        let cursor = self.checkpoints.load(self.store.as_ref()).await?;
        match &cursor {
            Some(c) => info!(checkpoint = self.checkpoints.name(), cursor = %c, "resuming from checkpoint"),
            None => info!(checkpoint = self.checkpoints.name(), "no checkpoint, starting fresh"),
        }
        Ok(cursor)
    }

    /// Write one block and its checkpoint in a single atomic unit.
    ///
    /// On failure the unit is rolled back and the error names the block and
    /// the step that failed.
    #[instrument(skip_all, fields(block = header.number))]
    pub async fn process_batch(
        &mut self,
        header: &BlockHeader,
        output: &BlockOutput,
        cursor: &Cursor,
    ) -> Result<BatchOutcome, SinkError> {
        let n = header.number;

        if output.is_empty() {
            return match self.config.empty_batches {
                EmptyBatchPolicy::Skip => {
                    debug!("empty block, skipped");
                    Ok(BatchOutcome::Skipped)
                }
                EmptyBatchPolicy::Checkpoint => {
                    let mut scope = self.store.begin().await.map_err(step(n, "begin transaction"))?;
                    if let Err(e) = self.checkpoints.save(scope.as_mut(), cursor).await {
                        return Err(abort_scope(scope, e.in_block(n, "store cursor")).await);
                    }
                    scope.commit().await.map_err(step(n, "commit transaction"))?;
                    debug!(cursor = %cursor, "empty block, checkpoint advanced");
                    Ok(BatchOutcome::CheckpointOnly)
                }
            };
        }

        let mut scope = self.store.begin().await.map_err(step(n, "begin transaction"))?;
        let summary = match self.write_batch(scope.as_mut(), header, output, cursor).await {
            Ok(summary) => summary,
            Err(e) => return Err(abort_scope(scope, e).await),
        };
        scope.commit().await.map_err(step(n, "commit transaction"))?;

        info!(
            hash = %header.hash,
            transactions = summary.transactions,
            links = summary.links,
            transfers = summary.transfers,
            mints = summary.mints,
            burns = summary.burns,
            "block committed"
        );
        Ok(BatchOutcome::Committed(summary))
    }

    async fn write_batch(
        &self,
        scope: &mut dyn WriteScope,
        header: &BlockHeader,
        output: &BlockOutput,
        cursor: &Cursor,
    ) -> Result<BatchSummary, SinkError> {
        let n = header.number;
        let block = scope.insert_block(header).await.map_err(step(n, "handle block clock"))?;
        let mut transactions = TransactionResolver::new();
        let mut summary = BatchSummary::default();

        for account in &output.initialized_accounts {
            let tx = transactions
                .resolve(scope, block, &account.trx_hash)
                .await
                .map_err(step(n, "handle initialized accounts"))?;
            let outcome = self
                .addresses
                .link_once(scope, tx, &account.owner, &account.account)
                .await
                .map_err(step(n, "handle initialized accounts"))?;
            if outcome == LinkOutcome::Inserted {
                summary.links += 1;
            }
        }

        for transfer in &output.transfers {
            let tx = transactions
                .resolve(scope, block, &transfer.trx_hash)
                .await
                .map_err(step(n, "handle transfers"))?;
            self.ledger
                .record_transfer(scope, tx, transfer)
                .await
                .map_err(step(n, "handle transfers"))?;
            summary.transfers += 1;
        }

        for mint in &output.mints {
            let tx = transactions
                .resolve(scope, block, &mint.trx_hash)
                .await
                .map_err(step(n, "handle mints"))?;
            self.ledger
                .record_mint(scope, tx, mint)
                .await
                .map_err(step(n, "handle mints"))?;
            summary.mints += 1;
        }

        for burn in &output.burns {
            let tx = transactions
                .resolve(scope, block, &burn.trx_hash)
                .await
                .map_err(step(n, "handle burns"))?;
            self.ledger
                .record_burn(scope, tx, burn)
                .await
                .map_err(step(n, "handle burns"))?;
            summary.burns += 1;
        }

        self.checkpoints
            .save(scope, cursor)
            .await
            .map_err(step(n, "store cursor"))?;

        summary.transactions = transactions.len();
        Ok(summary)
    }

    /// Retract a block and everything it owns, saving `cursor` in the same unit.
    pub async fn retract(
        &mut self,
        block_hash: &str,
        cursor: Option<&Cursor>,
    ) -> Result<RetractOutcome, SinkError> {
        self.reorg.retract(self.store.as_ref(), block_hash, cursor).await
    }
}

#[async_trait]
impl<S: LedgerStore + 'static> SinkHandler for BlockCoordinator<S> {
    async fn handle_block_scoped_data(&mut self, data: BlockScopedData) -> Result<(), SinkError> {
        if data.output_module != self.config.output_module {
            return Err(SinkError::ProtocolMismatch {
                expected: self.config.output_module.clone(),
                actual: data.output_module,
            });
        }

        let started = Instant::now();
        let n = data.clock.number;
        let result = if data.payload.is_empty() {
            self.process_batch(&data.clock, &BlockOutput::default(), &data.cursor)
                .await
        } else {
            match self.decoder.decode(&data.payload) {
                Ok(output) => self.process_batch(&data.clock, &output, &data.cursor).await,
                Err(e) => Err(e.in_block(n, "unmarshal module output")),
            }
        };
        self.stats.record_block(n, started.elapsed());
        result.map(|_| ())
    }

    async fn handle_block_undo_signal(&mut self, signal: BlockUndoSignal) -> Result<(), SinkError> {
        self.retract(&signal.block_hash, signal.cursor.as_ref())
            .await
            .map(|_| ())
    }

    async fn resume_cursor(&self) -> Result<Option<Cursor>, SinkError> {
        self.start_cursor().await
    }
}
