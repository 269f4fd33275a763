//! Mapping of `sqlx` errors onto the sink's error taxonomy.

use std::borrow::Cow;

use ledgersink_core::error::SinkError;
use sqlx::error::ErrorKind;

/// Database codes that mean "try again later".
///
/// Postgres: serialization failure, deadlock, lock not available, admin
/// shutdown. SQLite: busy, locked and their extended codes.
const TRANSIENT_CODES: &[&str] = &["40001", "40P01", "55P03", "57P01", "5", "6", "261", "262", "517"];

/// Classify a `sqlx` error.
pub fn classify(err: sqlx::Error) -> SinkError {
    match &err {
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::CheckViolation => SinkError::IntegrityViolation(err.to_string()),
            _ if is_transient_code(db.code()) => SinkError::TransientStorage(err.to_string()),
            _ => SinkError::Storage(err.to_string()),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => SinkError::TransientStorage(err.to_string()),
        _ => SinkError::Storage(err.to_string()),
    }
}

fn is_transient_code(code: Option<Cow<'_, str>>) -> bool {
    code.map_or(false, |c| TRANSIENT_CODES.contains(&&*c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_and_io_errors_are_retryable() {
        assert!(classify(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(classify(sqlx::Error::PoolClosed).is_retryable());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(classify(sqlx::Error::Io(io)).is_retryable());
    }

    #[test]
    fn other_errors_are_plain_storage_errors() {
        let err = classify(sqlx::Error::RowNotFound);
        assert!(matches!(err, SinkError::Storage(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_codes() {
        assert!(is_transient_code(Some(Cow::Borrowed("40001"))));
        assert!(is_transient_code(Some(Cow::Borrowed("5"))));
        assert!(!is_transient_code(Some(Cow::Borrowed("23505"))));
        assert!(!is_transient_code(None));
    }
}
