//! Callback surface consumed by the upstream stream driver.
//!
//! The driver pushes block data and undo signals, strictly in order, and
//! waits for each call to return. On `Err` it decides whether to retry the
//! same message or stop.

use async_trait::async_trait;

use crate::cursor::Cursor;
use crate::error::SinkError;
use crate::types::BlockHeader;

/// Module output for one block, as delivered by the stream.
#[derive(Debug, Clone)]
pub struct BlockScopedData {
    pub clock: BlockHeader,
    /// Name of the module that produced `payload`.
    pub output_module: String,
    /// Encoded module output. Empty when the block produced nothing.
    pub payload: Vec<u8>,
    /// Cursor to persist once this block is committed.
    pub cursor: Cursor,
    /// `true` once the stream has caught up with the chain head.
    pub is_live: bool,
}

/// Request to retract a previously delivered block.
#[derive(Debug, Clone)]
pub struct BlockUndoSignal {
    pub block_hash: String,
    /// Cursor to persist together with the retraction, if the stream sent one.
    pub cursor: Option<Cursor>,
}

/// One message of the upstream stream.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    Data(BlockScopedData),
    Undo(BlockUndoSignal),
}

/// Receiver of stream messages.
///
/// Methods take `&mut self`: one message is handled at a time.
#[async_trait]
pub trait SinkHandler: Send + Sync {
    async fn handle_block_scoped_data(&mut self, data: BlockScopedData) -> Result<(), SinkError>;

    async fn handle_block_undo_signal(&mut self, signal: BlockUndoSignal)
        -> Result<(), SinkError>;

    /// Cursor the stream should resume from. `None` means from the beginning.
    async fn resume_cursor(&self) -> Result<Option<Cursor>, SinkError> {
        Ok(None)
    }

    /// Dispatch a stream message to the matching callback.
    async fn handle(&mut self, message: StreamMessage) -> Result<(), SinkError> {
        match message {
            StreamMessage::Data(data) => self.handle_block_scoped_data(data).await,
            StreamMessage::Undo(signal) => self.handle_block_undo_signal(signal).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[derive(Default)]
    struct Recorder {
        data: Vec<u64>,
        undos: Vec<String>,
    }

    #[async_trait]
    impl SinkHandler for Recorder {
        async fn handle_block_scoped_data(&mut self, data: BlockScopedData) -> Result<(), SinkError> {
            self.data.push(data.clock.number);
            Ok(())
        }

        async fn handle_block_undo_signal(
            &mut self,
            signal: BlockUndoSignal,
        ) -> Result<(), SinkError> {
            self.undos.push(signal.block_hash);
            Ok(())
        }
    }

    #[tokio::test]
    async fn handle_dispatches_by_kind() {
        let mut recorder = Recorder::default();
        recorder
            .handle(StreamMessage::Data(BlockScopedData {
                clock: BlockHeader::new(5, "0x5", Utc::now()),
                output_module: "m".into(),
                payload: vec![],
                cursor: Cursor::new("c5"),
                is_live: false,
            }))
            .await
            .unwrap();
        recorder
            .handle(StreamMessage::Undo(BlockUndoSignal {
                block_hash: "0x5".into(),
                cursor: None,
            }))
            .await
            .unwrap();

        assert_eq!(recorder.data, vec![5]);
        assert_eq!(recorder.undos, vec!["0x5".to_string()]);
    }
}
