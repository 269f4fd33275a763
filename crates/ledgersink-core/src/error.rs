//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Errors that can occur while sinking block data into the ledger store.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Connection drop, lock timeout, pool exhaustion. The open unit is
    /// aborted and the driver may retry the same batch from the last checkpoint.
    #[error("transient storage error: {0}")]
    TransientStorage(String),

    /// Uniqueness or foreign-key violation. Fatal for the current batch.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// Any other storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// The batch was produced by a different output module than the one
    /// this sink is bound to. Raised before any write begins.
    #[error("received data from wrong output module, expected {expected:?} but got {actual:?}")]
    ProtocolMismatch { expected: String, actual: String },

    /// The block payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A failure while processing one block, with the originating cause.
    #[error("block {block_number}: {context}: {source}")]
    Batch {
        block_number: u64,
        context: &'static str,
        #[source]
        source: Box<SinkError>,
    },

    /// The rollback issued after `cause` failed as well.
    #[error("rollback failed: {rollback}: while handling: {cause}")]
    RollbackFailed {
        rollback: String,
        #[source]
        cause: Box<SinkError>,
    },

    /// Processing was cancelled before the unit could commit.
    #[error("aborted: {reason}")]
    Aborted { reason: String },
}

impl SinkError {
    /// Wrap `self` with the block number and the step that failed.
    pub fn in_block(self, block_number: u64, context: &'static str) -> Self {
        Self::Batch {
            block_number,
            context,
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through `Batch` and `RollbackFailed` wrappers.
    pub fn root_cause(&self) -> &SinkError {
        match self {
            Self::Batch { source, .. } => source.root_cause(),
            Self::RollbackFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Returns `true` if the driver may retry the same batch.
    pub fn is_retryable(&self) -> bool {
        matches!(self.root_cause(), Self::TransientStorage(_))
    }

    /// Returns `true` if a store constraint was violated.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self.root_cause(), Self::IntegrityViolation(_))
    }

    /// Returns `true` if the batch was addressed to the wrong output module.
    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(self.root_cause(), Self::ProtocolMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_looks_through_wrappers() {
        let err = SinkError::TransientStorage("connection reset".into())
            .in_block(100, "handle transfers");
        assert!(err.is_retryable());
        assert!(!err.is_integrity_violation());

        let err = SinkError::RollbackFailed {
            rollback: "broken pipe".into(),
            cause: Box::new(
                SinkError::IntegrityViolation("duplicate hash".into()).in_block(7, "handle mints"),
            ),
        };
        assert!(err.is_integrity_violation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn batch_message_keeps_cause() {
        let err = SinkError::Storage("boom".into()).in_block(42, "store cursor");
        assert_eq!(err.to_string(), "block 42: store cursor: storage error: boom");
    }
}
