//! SQLite storage backend for ledgersink.
//!
//! Every table lives in one SQLite file (or in memory for tests). Block
//! ownership is expressed with `ON DELETE CASCADE` foreign keys, so retracting
//! a block is a single `DELETE`. Amounts are stored as decimal text.
//!
//! # Usage
//! ```rust,no_run
//! use ledgersink_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./ledger.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Executor, Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use ledgersink_core::cursor::Cursor;
use ledgersink_core::error::SinkError;
use ledgersink_core::store::{LedgerQuery, LedgerStore, WriteScope};
use ledgersink_core::types::{
    AddressResolution, BlockHeader, BlockId, BlockRecord, BurnRecord, FactId, LinkOutcome,
    MintRecord, RowCounts, TokenAmount, TransactionId, TransactionRecord, TransferRecord,
};

use crate::error::classify;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS cursors (
        id     TEXT NOT NULL PRIMARY KEY,
        cursor TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS blocks (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        number     INTEGER NOT NULL,
        hash       TEXT    NOT NULL UNIQUE,
        block_time TEXT    NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS transactions (
        id       INTEGER PRIMARY KEY AUTOINCREMENT,
        block_id INTEGER NOT NULL REFERENCES blocks (id) ON DELETE CASCADE,
        hash     TEXT    NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS derived_addresses (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        transaction_id  INTEGER NOT NULL REFERENCES transactions (id) ON DELETE CASCADE,
        address         TEXT    NOT NULL,
        derived_address TEXT    NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS transfers (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        transaction_id INTEGER NOT NULL REFERENCES transactions (id) ON DELETE CASCADE,
        from_address   TEXT    NOT NULL,
        to_address     TEXT    NOT NULL,
        amount         TEXT    NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS mints (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        transaction_id INTEGER NOT NULL REFERENCES transactions (id) ON DELETE CASCADE,
        to_address     TEXT    NOT NULL,
        amount         TEXT    NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS burns (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        transaction_id INTEGER NOT NULL REFERENCES transactions (id) ON DELETE CASCADE,
        from_address   TEXT    NOT NULL,
        amount         TEXT    NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_transactions_block ON transactions (block_id)",
    "CREATE INDEX IF NOT EXISTS idx_derived_addresses_tx ON derived_addresses (transaction_id)",
    "CREATE INDEX IF NOT EXISTS idx_transfers_tx ON transfers (transaction_id)",
    "CREATE INDEX IF NOT EXISTS idx_mints_tx ON mints (transaction_id)",
    "CREATE INDEX IF NOT EXISTS idx_burns_tx ON burns (transaction_id)",
];

/// SQLite-backed ledger store.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./ledger.db"`) or a full
    /// SQLite URL (`"sqlite:./ledger.db"`).
    pub async fn open(path: &str) -> Result<Self, SinkError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}")
        };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(classify)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(classify)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// The pool keeps exactly one connection alive for its whole lifetime,
    /// since every new connection would see a fresh, empty database.
    /// An open scope owns that connection, so committed-state reads made
    /// before the scope ends wait for the pool and then time out.
    pub async fn in_memory() -> Result<Self, SinkError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(classify)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(classify)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), SinkError> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(classify)?;
        }
        debug!("sqlite schema initialized");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ─── Shared queries ──────────────────────────────────────────────────────────
//
// Generic over the executor so the same SQL runs on the pool (committed
// reads) and inside an open transaction (reads that see its own writes).

fn parse_amount(row: &SqliteRow) -> Result<TokenAmount, SinkError> {
    row.get::<String, _>("amount").parse()
}

async fn resolve_address<'e, E>(exec: E, derived: &str) -> Result<AddressResolution, SinkError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let owner: Option<String> =
        sqlx::query_scalar("SELECT address FROM derived_addresses WHERE derived_address = ?")
            .bind(derived)
            .fetch_optional(exec)
            .await
            .map_err(classify)?;
    Ok(owner.into())
}

async fn find_transaction<'e, E>(
    exec: E,
    hash: &str,
) -> Result<Option<TransactionRecord>, SinkError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT id, block_id, hash FROM transactions WHERE hash = ?")
        .bind(hash)
        .fetch_optional(exec)
        .await
        .map_err(classify)?;

    Ok(row.map(|r| TransactionRecord {
        id: TransactionId(r.get("id")),
        block_id: BlockId(r.get("block_id")),
        hash: r.get("hash"),
    }))
}

// ─── LedgerStore / LedgerQuery impl ──────────────────────────────────────────

#[async_trait]
impl LedgerStore for SqliteStorage {
    async fn begin(&self) -> Result<Box<dyn WriteScope>, SinkError> {
        let tx = self.pool.begin().await.map_err(classify)?;
        Ok(Box::new(SqliteScope { tx }))
    }
}

#[async_trait]
impl LedgerQuery for SqliteStorage {
    async fn load_cursor(&self, name: &str) -> Result<Option<Cursor>, SinkError> {
        let cursor: Option<String> = sqlx::query_scalar("SELECT cursor FROM cursors WHERE id = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        Ok(cursor.map(Cursor::new))
    }

    async fn resolve_address(&self, derived: &str) -> Result<AddressResolution, SinkError> {
        resolve_address(&self.pool, derived).await
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<BlockRecord>, SinkError> {
        let row = sqlx::query("SELECT id, number, hash, block_time FROM blocks WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        Ok(row.map(|r| BlockRecord {
            id: BlockId(r.get("id")),
            number: r.get::<i64, _>("number") as u64,
            hash: r.get("hash"),
            timestamp: r.get::<DateTime<Utc>, _>("block_time"),
        }))
    }

    async fn transaction_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<TransactionRecord>, SinkError> {
        find_transaction(&self.pool, hash).await
    }

    async fn transfers_for(
        &self,
        transaction: TransactionId,
    ) -> Result<Vec<TransferRecord>, SinkError> {
        let rows = sqlx::query(
            "SELECT id, transaction_id, from_address, to_address, amount
             FROM transfers WHERE transaction_id = ? ORDER BY id",
        )
        .bind(transaction.0)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.iter()
            .map(|r| {
                Ok(TransferRecord {
                    id: FactId(r.get("id")),
                    transaction_id: TransactionId(r.get("transaction_id")),
                    from: r.get("from_address"),
                    to: r.get("to_address"),
                    amount: parse_amount(r)?,
                })
            })
            .collect()
    }

    async fn mints_for(&self, transaction: TransactionId) -> Result<Vec<MintRecord>, SinkError> {
        let rows = sqlx::query(
            "SELECT id, transaction_id, to_address, amount
             FROM mints WHERE transaction_id = ? ORDER BY id",
        )
        .bind(transaction.0)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.iter()
            .map(|r| {
                Ok(MintRecord {
                    id: FactId(r.get("id")),
                    transaction_id: TransactionId(r.get("transaction_id")),
                    to: r.get("to_address"),
                    amount: parse_amount(r)?,
                })
            })
            .collect()
    }

    async fn burns_for(&self, transaction: TransactionId) -> Result<Vec<BurnRecord>, SinkError> {
        let rows = sqlx::query(
            "SELECT id, transaction_id, from_address, amount
             FROM burns WHERE transaction_id = ? ORDER BY id",
        )
        .bind(transaction.0)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.iter()
            .map(|r| {
                Ok(BurnRecord {
                    id: FactId(r.get("id")),
                    transaction_id: TransactionId(r.get("transaction_id")),
                    from: r.get("from_address"),
                    amount: parse_amount(r)?,
                })
            })
            .collect()
    }

    async fn row_counts(&self) -> Result<RowCounts, SinkError> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM blocks)            AS blocks,
                (SELECT COUNT(*) FROM transactions)      AS transactions,
                (SELECT COUNT(*) FROM derived_addresses) AS address_links,
                (SELECT COUNT(*) FROM transfers)         AS transfers,
                (SELECT COUNT(*) FROM mints)             AS mints,
                (SELECT COUNT(*) FROM burns)             AS burns",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        Ok(counts_from_row(&row))
    }

    async fn block_row_counts(&self, hash: &str) -> Result<RowCounts, SinkError> {
        let row = sqlx::query(
            "WITH b AS (SELECT id FROM blocks WHERE hash = ?1),
                  t AS (SELECT id FROM transactions WHERE block_id IN (SELECT id FROM b))
             SELECT
                (SELECT COUNT(*) FROM b) AS blocks,
                (SELECT COUNT(*) FROM t) AS transactions,
                (SELECT COUNT(*) FROM derived_addresses WHERE transaction_id IN (SELECT id FROM t)) AS address_links,
                (SELECT COUNT(*) FROM transfers WHERE transaction_id IN (SELECT id FROM t)) AS transfers,
                (SELECT COUNT(*) FROM mints WHERE transaction_id IN (SELECT id FROM t)) AS mints,
                (SELECT COUNT(*) FROM burns WHERE transaction_id IN (SELECT id FROM t)) AS burns",
        )
        .bind(hash)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        Ok(counts_from_row(&row))
    }
}

fn counts_from_row(row: &SqliteRow) -> RowCounts {
    let count = |col: &str| row.get::<i64, _>(col) as u64;
    RowCounts {
        blocks: count("blocks"),
        transactions: count("transactions"),
        address_links: count("address_links"),
        transfers: count("transfers"),
        mints: count("mints"),
        burns: count("burns"),
    }
}

// ─── WriteScope impl ─────────────────────────────────────────────────────────

/// One open SQLite transaction. Dropping it rolls back.
struct SqliteScope {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl WriteScope for SqliteScope {
    async fn insert_block(&mut self, header: &BlockHeader) -> Result<BlockId, SinkError> {
        let result = sqlx::query("INSERT INTO blocks (number, hash, block_time) VALUES (?, ?, ?)")
            .bind(header.number as i64)
            .bind(&header.hash)
            .bind(header.timestamp)
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?;

        debug!(block = header.number, hash = %header.hash, "block row inserted");
        Ok(BlockId(result.last_insert_rowid()))
    }

    async fn find_transaction(
        &mut self,
        hash: &str,
    ) -> Result<Option<TransactionRecord>, SinkError> {
        find_transaction(&mut *self.tx, hash).await
    }

    async fn insert_transaction(
        &mut self,
        block: BlockId,
        hash: &str,
    ) -> Result<TransactionId, SinkError> {
        let result = sqlx::query("INSERT INTO transactions (block_id, hash) VALUES (?, ?)")
            .bind(block.0)
            .bind(hash)
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?;
        Ok(TransactionId(result.last_insert_rowid()))
    }

    async fn link_address(
        &mut self,
        transaction: TransactionId,
        owner: &str,
        derived: &str,
    ) -> Result<LinkOutcome, SinkError> {
        let result = sqlx::query(
            "INSERT INTO derived_addresses (transaction_id, address, derived_address)
             VALUES (?, ?, ?)
             ON CONFLICT (derived_address) DO NOTHING",
        )
        .bind(transaction.0)
        .bind(owner)
        .bind(derived)
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?;

        if result.rows_affected() == 1 {
            return Ok(LinkOutcome::Inserted);
        }
        Ok(match resolve_address(&mut *self.tx, derived).await? {
            AddressResolution::Resolved(existing) if existing == owner => LinkOutcome::AlreadyLinked,
            AddressResolution::Resolved(existing) => LinkOutcome::Conflict {
                existing_owner: existing,
            },
            AddressResolution::NotFound => {
                return Err(SinkError::Storage(format!(
                    "derived address {derived} neither inserted nor found"
                )))
            }
        })
    }

    async fn resolve_address(&mut self, derived: &str) -> Result<AddressResolution, SinkError> {
        resolve_address(&mut *self.tx, derived).await
    }

    async fn insert_transfer(
        &mut self,
        transaction: TransactionId,
        from: &str,
        to: &str,
        amount: &TokenAmount,
    ) -> Result<FactId, SinkError> {
        let result = sqlx::query(
            "INSERT INTO transfers (transaction_id, from_address, to_address, amount)
             VALUES (?, ?, ?, ?)",
        )
        .bind(transaction.0)
        .bind(from)
        .bind(to)
        .bind(amount.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?;
        Ok(FactId(result.last_insert_rowid()))
    }

    async fn insert_mint(
        &mut self,
        transaction: TransactionId,
        to: &str,
        amount: &TokenAmount,
    ) -> Result<FactId, SinkError> {
        let result =
            sqlx::query("INSERT INTO mints (transaction_id, to_address, amount) VALUES (?, ?, ?)")
                .bind(transaction.0)
                .bind(to)
                .bind(amount.to_string())
                .execute(&mut *self.tx)
                .await
                .map_err(classify)?;
        Ok(FactId(result.last_insert_rowid()))
    }

    async fn insert_burn(
        &mut self,
        transaction: TransactionId,
        from: &str,
        amount: &TokenAmount,
    ) -> Result<FactId, SinkError> {
        let result = sqlx::query(
            "INSERT INTO burns (transaction_id, from_address, amount) VALUES (?, ?, ?)",
        )
        .bind(transaction.0)
        .bind(from)
        .bind(amount.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?;
        Ok(FactId(result.last_insert_rowid()))
    }

    async fn save_cursor(&mut self, name: &str, cursor: &Cursor) -> Result<(), SinkError> {
        sqlx::query(
            "INSERT INTO cursors (id, cursor) VALUES (?, ?)
             ON CONFLICT (id) DO UPDATE SET cursor = excluded.cursor",
        )
        .bind(name)
        .bind(cursor.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?;
        Ok(())
    }

    async fn delete_block(&mut self, hash: &str) -> Result<bool, SinkError> {
        let result = sqlx::query("DELETE FROM blocks WHERE hash = ?")
            .bind(hash)
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), SinkError> {
        self.tx.commit().await.map_err(classify)
    }

    async fn rollback(self: Box<Self>) -> Result<(), SinkError> {
        self.tx.rollback().await.map_err(classify)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
