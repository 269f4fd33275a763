//! Checkpoint store: persists the sink's resumption cursor for crash recovery.
//!
//! A checkpoint is a single named row holding the latest cursor. It is
//! written inside the same scope as the facts of the batch it covers, so the
//! cursor can never run ahead of (or fall behind) what is durably committed.
//! On restart, the stream resumes from the loaded cursor.

use tracing::debug;

use crate::cursor::Cursor;
use crate::error::SinkError;
use crate::store::{LedgerQuery, WriteScope};

/// Checkpoint name used by default.
pub const DEFAULT_CHECKPOINT_NAME: &str = "token_tracker";

/// Reads and writes the checkpoint row for one sink.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    name: String,
}

impl CheckpointStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upsert the cursor inside the open scope.
    ///
    /// A blank cursor is never written: the stored checkpoint stays where it was.
    pub async fn save(&self, scope: &mut dyn WriteScope, cursor: &Cursor) -> Result<(), SinkError> {
        if cursor.is_blank() {
            debug!(name = %self.name, "blank cursor, checkpoint left unchanged");
            return Ok(());
        }
        scope.save_cursor(&self.name, cursor).await?;
        debug!(name = %self.name, cursor = %cursor, "cursor staged");
        Ok(())
    }

    /// Load the committed cursor. `None` means start from the stream's beginning.
    pub async fn load(&self, store: &dyn LedgerQuery) -> Result<Option<Cursor>, SinkError> {
        store.load_cursor(&self.name).await
    }
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHECKPOINT_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLedger;
    use crate::store::LedgerStore;

    #[tokio::test]
    async fn load_without_checkpoint_is_empty() {
        let store = MemoryLedger::new();
        let checkpoints = CheckpointStore::default();
        assert!(checkpoints.load(&store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let store = MemoryLedger::new();
        let checkpoints = CheckpointStore::default();

        for token in ["c1", "c2"] {
            let mut scope = store.begin().await.unwrap();
            checkpoints.save(scope.as_mut(), &Cursor::new(token)).await.unwrap();
            scope.commit().await.unwrap();
        }

        assert_eq!(checkpoints.load(&store).await.unwrap(), Some(Cursor::new("c2")));
    }

    #[tokio::test]
    async fn blank_cursor_keeps_previous_checkpoint() {
        let store = MemoryLedger::new();
        let checkpoints = CheckpointStore::default();

        for token in ["c1", "", "   "] {
            let mut scope = store.begin().await.unwrap();
            checkpoints.save(scope.as_mut(), &Cursor::new(token)).await.unwrap();
            scope.commit().await.unwrap();
        }

        assert_eq!(checkpoints.load(&store).await.unwrap(), Some(Cursor::new("c1")));
    }

    #[tokio::test]
    async fn names_are_isolated() {
        let store = MemoryLedger::new();
        let a = CheckpointStore::new("sink-a");
        let b = CheckpointStore::new("sink-b");

        let mut scope = store.begin().await.unwrap();
        a.save(scope.as_mut(), &Cursor::new("a1")).await.unwrap();
        scope.commit().await.unwrap();

        assert_eq!(a.load(&store).await.unwrap(), Some(Cursor::new("a1")));
        assert!(b.load(&store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn uncommitted_save_is_invisible() {
        let store = MemoryLedger::new();
        let checkpoints = CheckpointStore::default();

        let mut scope = store.begin().await.unwrap();
        checkpoints.save(scope.as_mut(), &Cursor::new("c1")).await.unwrap();
        scope.rollback().await.unwrap();

        assert!(checkpoints.load(&store).await.unwrap().is_none());
    }
}
