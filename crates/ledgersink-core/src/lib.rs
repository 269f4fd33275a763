//! ledgersink-core: transactional ingestion of block-scoped token events.
//!
//! # Architecture
//!
//! ```text
//! stream ─▶ SinkRunner ─▶ BlockCoordinator (SinkHandler)
//!                              ├── PayloadDecoder      (module output → BlockOutput)
//!                              ├── TransactionResolver (lookup-or-create, per-batch cache)
//!                              ├── AddressBook         (first-write-wins owner links)
//!                              ├── LedgerWriter        (transfers / mints / burns)
//!                              ├── CheckpointStore     (cursor, same unit as the facts)
//!                              ├── ReorgHandler        (undo: cascading block delete)
//!                              └── LedgerStore ─▶ WriteScope (memory / SQLite / Postgres)
//! ```
//!
//! Every delivered block becomes one atomic unit. A crash at any point leaves
//! the store at the last fully committed block, and the saved cursor always
//! names that block.

pub mod address;
pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod cursor;
pub mod decoder;
pub mod error;
pub mod handler;
pub mod ledger;
pub mod memory;
pub mod progress;
pub mod reorg;
pub mod resolver;
pub mod runner;
pub mod store;
pub mod testing;
pub mod types;

pub use address::{AddressBook, AddressConflictPolicy};
pub use checkpoint::{CheckpointStore, DEFAULT_CHECKPOINT_NAME};
pub use config::{EmptyBatchPolicy, ProgressConfig, SinkConfig, SinkConfigBuilder};
pub use coordinator::{BatchOutcome, BatchSummary, BlockCoordinator};
pub use cursor::Cursor;
pub use decoder::{JsonPayloadDecoder, PayloadDecoder};
pub use error::SinkError;
pub use handler::{BlockScopedData, BlockUndoSignal, SinkHandler, StreamMessage};
pub use ledger::LedgerWriter;
pub use memory::MemoryLedger;
pub use progress::{ProgressReporter, ProgressStats};
pub use reorg::{BlockState, ReorgHandler, RetractOutcome};
pub use resolver::TransactionResolver;
pub use runner::{RunSummary, SinkRunner, StopReason};
pub use store::{LedgerQuery, LedgerStore, WriteScope};
pub use types::{
    AddressResolution, BlockHeader, BlockOutput, Burn, InitializedAccount, LinkOutcome, Mint,
    RowCounts, TokenAmount, Transfer,
};
