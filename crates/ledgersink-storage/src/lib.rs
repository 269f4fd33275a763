//! ledgersink-storage: SQL backends for the ledgersink write path.
//!
//! Backends:
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single file or in-memory)
//! - [`postgres`]: PostgreSQL via `sqlx` (production), behind the `postgres` feature
//!
//! The in-memory reference backend lives in `ledgersink_core::memory`.

#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod error;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresOptions, PostgresStorage};
