//! PostgreSQL storage backend for ledgersink.
//!
//! All tables live in one Postgres schema (`solana_tokens` by default).
//! Amounts are `NUMERIC`, block times `TIMESTAMPTZ`, and block ownership is
//! expressed with `ON DELETE CASCADE` foreign keys.
//!
//! # Feature Flag
//! Requires the `postgres` feature:
//! ```toml
//! ledgersink-storage = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! # Usage
//! ```rust,no_run
//! use ledgersink_storage::postgres::{PostgresConfig, PostgresStorage};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PostgresConfig {
//!     host: "localhost".into(),
//!     user: "sink".into(),
//!     password: "secret".into(),
//!     dbname: "tokens".into(),
//!     ..Default::default()
//! };
//! let store = PostgresStorage::connect(&config).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Writers take a transaction-scoped advisory lock keyed on the schema name,
//! so two sinks pointed at the same schema never interleave their units.

use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Executor, PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};

use ledgersink_core::cursor::Cursor;
use ledgersink_core::error::SinkError;
use ledgersink_core::store::{LedgerQuery, LedgerStore, WriteScope};
use ledgersink_core::types::{
    AddressResolution, BlockHeader, BlockId, BlockRecord, BurnRecord, FactId, LinkOutcome,
    MintRecord, RowCounts, TokenAmount, TransactionId, TransactionRecord, TransferRecord,
};

use crate::error::classify;

// ─── Connection options ──────────────────────────────────────────────────────

/// Where to connect and which schema to use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub dbname: String,
    /// libpq `sslmode` value (`disable`, `prefer`, `require`, ...).
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default = "default_schema")]
    pub schema: String,
}

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "disable".into()
}

fn default_schema() -> String {
    "solana_tokens".into()
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: "postgres".into(),
            password: String::new(),
            dbname: "postgres".into(),
            ssl_mode: default_ssl_mode(),
            schema: default_schema(),
        }
    }
}

impl PostgresConfig {
    /// Build `sqlx` connect options from the individual fields.
    pub fn connect_options(&self) -> Result<PgConnectOptions, SinkError> {
        let ssl_mode: PgSslMode = self
            .ssl_mode
            .parse()
            .map_err(|e| SinkError::Storage(format!("invalid ssl_mode {:?}: {e}", self.ssl_mode)))?;
        Ok(PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.dbname)
            .ssl_mode(ssl_mode))
    }
}

/// Pool settings for the Postgres backend.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    /// Maximum number of connections in the pool (default: 5)
    pub max_connections: u32,
    /// Minimum number of idle connections to keep open (default: 1)
    pub min_connections: u32,
    /// Connection timeout in seconds (default: 30)
    pub connect_timeout_secs: u64,
    /// Statement cache size per connection (default: 100)
    pub statement_cache_capacity: usize,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            connect_timeout_secs: 30,
            statement_cache_capacity: 100,
        }
    }
}

fn validate_schema(schema: &str) -> Result<(), SinkError> {
    let valid = !schema.is_empty()
        && schema.len() <= 63
        && schema.starts_with(|c: char| c.is_ascii_lowercase() || c == '_')
        && schema
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SinkError::Storage(format!("invalid schema name {schema:?}")))
    }
}

// ─── PostgresStorage ─────────────────────────────────────────────────────────

/// PostgreSQL-backed ledger store. Cheap to clone; wraps a connection pool.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
    schema: String,
}

impl PostgresStorage {
    /// Connect with default pool options and initialize the schema.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, SinkError> {
        Self::connect_with_options(config, PostgresOptions::default()).await
    }

    /// Connect with custom pool options.
    pub async fn connect_with_options(
        config: &PostgresConfig,
        opts: PostgresOptions,
    ) -> Result<Self, SinkError> {
        validate_schema(&config.schema)?;
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .min_connections(opts.min_connections)
            .acquire_timeout(Duration::from_secs(opts.connect_timeout_secs))
            .connect_with(
                config
                    .connect_options()?
                    .statement_cache_capacity(opts.statement_cache_capacity),
            )
            .await
            .map_err(classify)?;

        Self::from_pool(pool, &config.schema).await
    }

    /// Use an existing pool, creating `schema` and its tables if needed.
    pub async fn from_pool(pool: PgPool, schema: &str) -> Result<Self, SinkError> {
        validate_schema(schema)?;
        let storage = Self {
            pool,
            schema: schema.to_string(),
        };
        storage.init_schema().await?;
        info!(schema, "postgres storage connected and schema initialized");
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), SinkError> {
        let s = &self.schema;
        let statements = [
            format!("CREATE SCHEMA IF NOT EXISTS {s}"),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.cursors (
                    id     TEXT NOT NULL PRIMARY KEY,
                    cursor TEXT NOT NULL
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.blocks (
                    id         BIGSERIAL   PRIMARY KEY,
                    number     BIGINT      NOT NULL,
                    hash       TEXT        NOT NULL UNIQUE,
                    block_time TIMESTAMPTZ NOT NULL
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.transactions (
                    id       BIGSERIAL PRIMARY KEY,
                    block_id BIGINT    NOT NULL REFERENCES {s}.blocks (id) ON DELETE CASCADE,
                    hash     TEXT      NOT NULL UNIQUE
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.derived_addresses (
                    id              BIGSERIAL PRIMARY KEY,
                    transaction_id  BIGINT    NOT NULL REFERENCES {s}.transactions (id) ON DELETE CASCADE,
                    address         TEXT      NOT NULL,
                    derived_address TEXT      NOT NULL UNIQUE
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.transfers (
                    id             BIGSERIAL PRIMARY KEY,
                    transaction_id BIGINT    NOT NULL REFERENCES {s}.transactions (id) ON DELETE CASCADE,
                    from_address   TEXT      NOT NULL,
                    to_address     TEXT      NOT NULL,
                    amount         NUMERIC   NOT NULL
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.mints (
                    id             BIGSERIAL PRIMARY KEY,
                    transaction_id BIGINT    NOT NULL REFERENCES {s}.transactions (id) ON DELETE CASCADE,
                    to_address     TEXT      NOT NULL,
                    amount         NUMERIC   NOT NULL
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.burns (
                    id             BIGSERIAL PRIMARY KEY,
                    transaction_id BIGINT    NOT NULL REFERENCES {s}.transactions (id) ON DELETE CASCADE,
                    from_address   TEXT      NOT NULL,
                    amount         NUMERIC   NOT NULL
                )"
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_transactions_block ON {s}.transactions (block_id)"),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_derived_addresses_tx ON {s}.derived_addresses (transaction_id)"
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_transfers_tx ON {s}.transfers (transaction_id)"),
            format!("CREATE INDEX IF NOT EXISTS idx_mints_tx ON {s}.mints (transaction_id)"),
            format!("CREATE INDEX IF NOT EXISTS idx_burns_tx ON {s}.burns (transaction_id)"),
        ];

        for stmt in &statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(classify)?;
        }
        debug!(schema = %self.schema, "postgres schema initialized");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }
}

// ─── Shared queries ──────────────────────────────────────────────────────────

fn amount(row: &PgRow) -> TokenAmount {
    TokenAmount::from(row.get::<BigDecimal, _>("amount"))
}

async fn resolve_address<'e, E>(
    exec: E,
    schema: &str,
    derived: &str,
) -> Result<AddressResolution, SinkError>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!("SELECT address FROM {schema}.derived_addresses WHERE derived_address = $1");
    let owner: Option<String> = sqlx::query_scalar(&sql)
        .bind(derived)
        .fetch_optional(exec)
        .await
        .map_err(classify)?;
    Ok(owner.into())
}

async fn find_transaction<'e, E>(
    exec: E,
    schema: &str,
    hash: &str,
) -> Result<Option<TransactionRecord>, SinkError>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!("SELECT id, block_id, hash FROM {schema}.transactions WHERE hash = $1");
    let row = sqlx::query(&sql)
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

async fn insert_returning_id<'e, E>(exec: E, sql: &str, binds: Binds<'_>) -> Result<i64, SinkError>
where
    E: Executor<'e, Database = Postgres>,
{
    let mut query = sqlx::query_scalar::<_, i64>(sql).bind(binds.parent);
    for text in binds.texts {
        query = query.bind(*text);
    }
    if let Some(amount) = binds.amount {
        query = query.bind(amount.as_decimal());
    }
    query.fetch_one(exec).await.map_err(classify)
}

/// Parameters of a child-row insert: `$1` parent id, then the texts, then the amount.
struct Binds<'a> {
    parent: i64,
    texts: &'a [&'a str],
    amount: Option<&'a TokenAmount>,
}

fn counts_from_row(row: &PgRow) -> RowCounts {
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

// ─── LedgerStore / LedgerQuery impl ──────────────────────────────────────────

#[async_trait]
impl LedgerStore for PostgresStorage {
    async fn begin(&self) -> Result<Box<dyn WriteScope>, SinkError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&self.schema)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        Ok(Box::new(PgScope {
            tx,
            schema: self.schema.clone(),
        }))
    }
}

#[async_trait]
impl LedgerQuery for PostgresStorage {
    async fn load_cursor(&self, name: &str) -> Result<Option<Cursor>, SinkError> {
        let sql = format!("SELECT cursor FROM {}.cursors WHERE id = $1", self.schema);
        let cursor: Option<String> = sqlx::query_scalar(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        Ok(cursor.map(Cursor::new))
    }

    async fn resolve_address(&self, derived: &str) -> Result<AddressResolution, SinkError> {
        resolve_address(&self.pool, &self.schema, derived).await
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<BlockRecord>, SinkError> {
        let sql = format!(
            "SELECT id, number, hash, block_time FROM {}.blocks WHERE hash = $1",
            self.schema
        );
        let row = sqlx::query(&sql)
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
        find_transaction(&self.pool, &self.schema, hash).await
    }

    async fn transfers_for(
        &self,
        transaction: TransactionId,
    ) -> Result<Vec<TransferRecord>, SinkError> {
        let sql = format!(
            "SELECT id, transaction_id, from_address, to_address, amount
             FROM {}.transfers WHERE transaction_id = $1 ORDER BY id",
            self.schema
        );
        let rows = sqlx::query(&sql)
            .bind(transaction.0)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        Ok(rows
            .iter()
            .map(|r| TransferRecord {
                id: FactId(r.get("id")),
                transaction_id: TransactionId(r.get("transaction_id")),
                from: r.get("from_address"),
                to: r.get("to_address"),
                amount: amount(r),
            })
            .collect())
    }

    async fn mints_for(&self, transaction: TransactionId) -> Result<Vec<MintRecord>, SinkError> {
        let sql = format!(
            "SELECT id, transaction_id, to_address, amount
             FROM {}.mints WHERE transaction_id = $1 ORDER BY id",
            self.schema
        );
        let rows = sqlx::query(&sql)
            .bind(transaction.0)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        Ok(rows
            .iter()
            .map(|r| MintRecord {
                id: FactId(r.get("id")),
                transaction_id: TransactionId(r.get("transaction_id")),
                to: r.get("to_address"),
                amount: amount(r),
            })
            .collect())
    }

    async fn burns_for(&self, transaction: TransactionId) -> Result<Vec<BurnRecord>, SinkError> {
        let sql = format!(
            "SELECT id, transaction_id, from_address, amount
             FROM {}.burns WHERE transaction_id = $1 ORDER BY id",
            self.schema
        );
        let rows = sqlx::query(&sql)
            .bind(transaction.0)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        Ok(rows
            .iter()
            .map(|r| BurnRecord {
                id: FactId(r.get("id")),
                transaction_id: TransactionId(r.get("transaction_id")),
                from: r.get("from_address"),
                amount: amount(r),
            })
            .collect())
    }

    async fn row_counts(&self) -> Result<RowCounts, SinkError> {
        let s = &self.schema;
        let sql = format!(
            "SELECT
                (SELECT COUNT(*) FROM {s}.blocks)            AS blocks,
                (SELECT COUNT(*) FROM {s}.transactions)      AS transactions,
                (SELECT COUNT(*) FROM {s}.derived_addresses) AS address_links,
                (SELECT COUNT(*) FROM {s}.transfers)         AS transfers,
                (SELECT COUNT(*) FROM {s}.mints)             AS mints,
                (SELECT COUNT(*) FROM {s}.burns)             AS burns"
        );
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
        Ok(counts_from_row(&row))
    }

    async fn block_row_counts(&self, hash: &str) -> Result<RowCounts, SinkError> {
        let s = &self.schema;
        let sql = format!(
            "WITH b AS (SELECT id FROM {s}.blocks WHERE hash = $1),
                  t AS (SELECT id FROM {s}.transactions WHERE block_id IN (SELECT id FROM b))
             SELECT
                (SELECT COUNT(*) FROM b) AS blocks,
                (SELECT COUNT(*) FROM t) AS transactions,
                (SELECT COUNT(*) FROM {s}.derived_addresses WHERE transaction_id IN (SELECT id FROM t)) AS address_links,
                (SELECT COUNT(*) FROM {s}.transfers WHERE transaction_id IN (SELECT id FROM t)) AS transfers,
                (SELECT COUNT(*) FROM {s}.mints WHERE transaction_id IN (SELECT id FROM t)) AS mints,
                (SELECT COUNT(*) FROM {s}.burns WHERE transaction_id IN (SELECT id FROM t)) AS burns"
        );
        let row = sqlx::query(&sql)
            .bind(hash)
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
        Ok(counts_from_row(&row))
    }
}

// ─── WriteScope impl ─────────────────────────────────────────────────────────

/// One open Postgres transaction holding the writer lock. Dropping it rolls back.
struct PgScope {
    tx: Transaction<'static, Postgres>,
    schema: String,
}

#[async_trait]
impl WriteScope for PgScope {
    async fn insert_block(&mut self, header: &BlockHeader) -> Result<BlockId, SinkError> {
        let sql = format!(
            "INSERT INTO {}.blocks (number, hash, block_time) VALUES ($1, $2, $3) RETURNING id",
            self.schema
        );
        let id: i64 = sqlx::query_scalar(&sql)
            .bind(header.number as i64)
            .bind(&header.hash)
            .bind(header.timestamp)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(classify)?;

        debug!(block = header.number, hash = %header.hash, "block row inserted");
        Ok(BlockId(id))
    }

    async fn find_transaction(
        &mut self,
        hash: &str,
    ) -> Result<Option<TransactionRecord>, SinkError> {
        find_transaction(&mut *self.tx, &self.schema, hash).await
    }

    async fn insert_transaction(
        &mut self,
        block: BlockId,
        hash: &str,
    ) -> Result<TransactionId, SinkError> {
        let sql = format!(
            "INSERT INTO {}.transactions (block_id, hash) VALUES ($1, $2) RETURNING id",
            self.schema
        );
        let id = insert_returning_id(
            &mut *self.tx,
            &sql,
            Binds {
                parent: block.0,
                texts: &[hash],
                amount: None,
            },
        )
        .await?;
        Ok(TransactionId(id))
    }

    async fn link_address(
        &mut self,
        transaction: TransactionId,
        owner: &str,
        derived: &str,
    ) -> Result<LinkOutcome, SinkError> {
        let sql = format!(
            "INSERT INTO {}.derived_addresses (transaction_id, address, derived_address)
             VALUES ($1, $2, $3)
             ON CONFLICT (derived_address) DO NOTHING",
            self.schema
        );
        let result = sqlx::query(&sql)
            .bind(transaction.0)
            .bind(owner)
            .bind(derived)
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?;

        if result.rows_affected() == 1 {
            return Ok(LinkOutcome::Inserted);
        }
        Ok(match resolve_address(&mut *self.tx, &self.schema, derived).await? {
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
        resolve_address(&mut *self.tx, &self.schema, derived).await
    }

    async fn insert_transfer(
        &mut self,
        transaction: TransactionId,
        from: &str,
        to: &str,
        amount: &TokenAmount,
    ) -> Result<FactId, SinkError> {
        let sql = format!(
            "INSERT INTO {}.transfers (transaction_id, from_address, to_address, amount)
             VALUES ($1, $2, $3, $4) RETURNING id",
            self.schema
        );
        let id = insert_returning_id(
            &mut *self.tx,
            &sql,
            Binds {
                parent: transaction.0,
                texts: &[from, to],
                amount: Some(amount),
            },
        )
        .await?;
        Ok(FactId(id))
    }

    async fn insert_mint(
        &mut self,
        transaction: TransactionId,
        to: &str,
        amount: &TokenAmount,
    ) -> Result<FactId, SinkError> {
        let sql = format!(
            "INSERT INTO {}.mints (transaction_id, to_address, amount) VALUES ($1, $2, $3) RETURNING id",
            self.schema
        );
        let id = insert_returning_id(
            &mut *self.tx,
            &sql,
            Binds {
                parent: transaction.0,
                texts: &[to],
                amount: Some(amount),
            },
        )
        .await?;
        Ok(FactId(id))
    }

    async fn insert_burn(
        &mut self,
        transaction: TransactionId,
        from: &str,
        amount: &TokenAmount,
    ) -> Result<FactId, SinkError> {
        let sql = format!(
            "INSERT INTO {}.burns (transaction_id, from_address, amount) VALUES ($1, $2, $3) RETURNING id",
            self.schema
        );
        let id = insert_returning_id(
            &mut *self.tx,
            &sql,
            Binds {
                parent: transaction.0,
                texts: &[from],
                amount: Some(amount),
            },
        )
        .await?;
        Ok(FactId(id))
    }

    async fn save_cursor(&mut self, name: &str, cursor: &Cursor) -> Result<(), SinkError> {
        let sql = format!(
            "INSERT INTO {}.cursors (id, cursor) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET cursor = EXCLUDED.cursor",
            self.schema
        );
        sqlx::query(&sql)
            .bind(name)
            .bind(cursor.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_block(&mut self, hash: &str) -> Result<bool, SinkError> {
        let sql = format!("DELETE FROM {}.blocks WHERE hash = $1", self.schema);
        let result = sqlx::query(&sql)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_names_are_validated() {
        assert!(validate_schema("solana_tokens").is_ok());
        assert!(validate_schema("_t1").is_ok());
        assert!(validate_schema("").is_err());
        assert!(validate_schema("1tokens").is_err());
        assert!(validate_schema("tokens; DROP TABLE x").is_err());
        assert!(validate_schema("Tokens").is_err());
    }

    #[test]
    fn config_defaults_and_connect_options() {
        let cfg: PostgresConfig =
            serde_json::from_str(r#"{"user":"sink","dbname":"tokens"}"#).unwrap();
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.port, 5432);
        assert_eq!(cfg.schema, "solana_tokens");
        assert!(cfg.connect_options().is_ok());

        let bad = PostgresConfig {
            ssl_mode: "sometimes".into(),
            ..Default::default()
        };
        assert!(bad.connect_options().is_err());
    }

    async fn connect(schema: &str) -> PostgresStorage {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
        let pool = PgPool::connect(&url).await.unwrap();
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"))
            .execute(&pool)
            .await
            .unwrap();
        PostgresStorage::from_pool(pool, schema).await.unwrap()
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn test_postgres_commit_and_cascade() {
        let store = connect("ledgersink_test_cascade").await;
        let mut scope = store.begin().await.unwrap();
        let block = scope
            .insert_block(&BlockHeader::new(100, "0x100", Utc::now()))
            .await
            .unwrap();
        let tx = scope.insert_transaction(block, "h1").await.unwrap();
        assert_eq!(scope.link_address(tx, "A", "D1").await.unwrap(), LinkOutcome::Inserted);
        assert_eq!(
            scope.link_address(tx, "Z", "D1").await.unwrap(),
            LinkOutcome::Conflict { existing_owner: "A".into() }
        );
        let big: TokenAmount = "340282366920938463463374607431768211456".parse().unwrap();
        scope.insert_transfer(tx, "D1", "B", &big).await.unwrap();
        scope.save_cursor("token_tracker", &Cursor::new("c100")).await.unwrap();
        scope.commit().await.unwrap();

        assert_eq!(store.transfers_for(tx).await.unwrap()[0].amount, big);
        assert_eq!(store.block_row_counts("0x100").await.unwrap().total(), 4);

        let mut scope = store.begin().await.unwrap();
        assert!(scope.delete_block("0x100").await.unwrap());
        scope.commit().await.unwrap();
        assert_eq!(store.row_counts().await.unwrap().total(), 0);
        assert_eq!(
            store.load_cursor("token_tracker").await.unwrap(),
            Some(Cursor::new("c100"))
        );
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn test_postgres_rollback_and_integrity() {
        let store = connect("ledgersink_test_rollback").await;
        let mut scope = store.begin().await.unwrap();
        scope
            .insert_block(&BlockHeader::new(1, "0x1", Utc::now()))
            .await
            .unwrap();
        scope.rollback().await.unwrap();
        assert_eq!(store.row_counts().await.unwrap().total(), 0);

        let mut scope = store.begin().await.unwrap();
        let err = scope
            .insert_mint(TransactionId(42), "B", &TokenAmount::from(1))
            .await
            .unwrap_err();
        assert!(err.is_integrity_violation());
    }
}
