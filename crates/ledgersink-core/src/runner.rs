//! Stream runner: feeds stream messages to a [`SinkHandler`] one at a time.
//!
//! The run starts by asking the handler for its resume cursor and opening
//! the stream from there.
//!
//! The runner never retries. The first error stops the run and is returned
//! to the caller, which restarts from the last checkpoint if it wants to.
//! A shutdown signal, or a batch that exceeds the configured timeout, drops
//! the in-flight batch future, which rolls its atomic unit back.

use std::future::Future;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tracing::{info, warn};

use crate::cursor::Cursor;
use crate::error::SinkError;
use crate::handler::{SinkHandler, StreamMessage};

/// Why a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stream returned `None`.
    StreamEnded,
    /// Shutdown was requested between two messages.
    Shutdown,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub messages: u64,
    pub stop: StopReason,
}

/// Drives one handler from one stream.
pub struct SinkRunner<H> {
    handler: H,
    batch_timeout: Option<Duration>,
}

impl<H: SinkHandler> SinkRunner<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            batch_timeout: None,
        }
    }

    /// Abort any single message that takes longer than `timeout`.
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = Some(timeout);
        self
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Open the stream at the handler's resume cursor and consume it until
    /// it ends, `shutdown` resolves, or a message fails.
    pub async fn run<C, St, F>(&mut self, connect: C, shutdown: F) -> Result<RunSummary, SinkError>
    where
        C: FnOnce(Option<Cursor>) -> St,
        St: Stream<Item = StreamMessage> + Unpin,
        F: Future<Output = ()>,
    {
        let cursor = self.handler.resume_cursor().await?;
        match &cursor {
            Some(c) => info!(cursor = %c, "starting stream from checkpoint"),
            None => info!("starting stream from the beginning"),
        }
        let mut stream = connect(cursor);

        tokio::pin!(shutdown);
        let mut messages = 0u64;

        loop {
            let message = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(messages, "shutdown requested, stopping");
                    return Ok(RunSummary { messages, stop: StopReason::Shutdown });
                }
                next = stream.next() => match next {
                    Some(message) => message,
                    None => {
                        info!(messages, "stream ended");
                        return Ok(RunSummary { messages, stop: StopReason::StreamEnded });
                    }
                },
            };

            let handled = async {
                match self.batch_timeout {
                    Some(limit) => match tokio::time::timeout(limit, self.handler.handle(message)).await {
                        Ok(result) => result,
                        Err(_) => Err(SinkError::Aborted {
                            reason: format!("batch exceeded {}ms", limit.as_millis()),
                        }),
                    },
                    None => self.handler.handle(message).await,
                }
            };

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!(messages, "shutdown during batch, in-flight unit rolled back");
                    return Err(SinkError::Aborted { reason: "shutdown requested".into() });
                }
                result = handled => {
                    if let Err(e) = result {
                        warn!(error = %e, retryable = e.is_retryable(), "stopping on error");
                        return Err(e);
                    }
                }
            }
            messages += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;

    use crate::config::SinkConfig;
    use crate::coordinator::BlockCoordinator;
    use crate::cursor::Cursor;
    use crate::handler::{BlockScopedData, BlockUndoSignal};
    use crate::memory::MemoryLedger;
    use crate::store::LedgerQuery;
    use crate::types::{BlockHeader, BlockOutput, InitializedAccount};

    fn data(number: u64, module: &str, trx: &str) -> StreamMessage {
        let output = BlockOutput {
            initialized_accounts: vec![InitializedAccount {
                trx_hash: trx.into(),
                owner: "A".into(),
                account: format!("D{number}"),
            }],
            ..Default::default()
        };
        StreamMessage::Data(BlockScopedData {
            clock: BlockHeader::new(number, format!("0x{number}"), Utc::now()),
            output_module: module.into(),
            payload: serde_json::to_vec(&output).unwrap(),
            cursor: Cursor::new(format!("c{number}")),
            is_live: false,
        })
    }

    fn coordinator(store: &MemoryLedger) -> BlockCoordinator<MemoryLedger> {
        BlockCoordinator::new(
            Arc::new(store.clone()),
            SinkConfig::builder().output_module("map_tokens").build(),
        )
    }

    #[tokio::test]
    async fn runs_until_stream_ends() {
        let store = MemoryLedger::new();
        let mut runner = SinkRunner::new(coordinator(&store));
        let stream = futures::stream::iter(vec![
            data(1, "map_tokens", "h1"),
            data(2, "map_tokens", "h2"),
            StreamMessage::Undo(BlockUndoSignal {
                block_hash: "0x2".into(),
                cursor: Some(Cursor::new("c1")),
            }),
        ]);

        let summary = runner
            .run(|cursor| {
                assert_eq!(cursor, None);
                stream
            }, futures::future::pending())
            .await
            .unwrap();
        assert_eq!(summary, RunSummary { messages: 3, stop: StopReason::StreamEnded });

        // a second run resumes from the saved checkpoint
        let mut runner = SinkRunner::new(coordinator(&store));
        let summary = runner
            .run(|cursor| {
                assert_eq!(cursor, Some(Cursor::new("c1")));
                futures::stream::iter(Vec::new())
            }, futures::future::pending())
            .await
            .unwrap();
        assert_eq!(summary.messages, 0);
        assert_eq!(runner.into_handler().stats().blocks_received(), 0);
        assert_eq!(store.row_counts().await.unwrap().blocks, 1);
        assert_eq!(store.load_cursor("token_tracker").await.unwrap(), Some(Cursor::new("c1")));
    }

    #[tokio::test]
    async fn stops_on_first_error() {
        let store = MemoryLedger::new();
        let mut runner = SinkRunner::new(coordinator(&store));
        let stream = futures::stream::iter(vec![
            data(1, "map_tokens", "h1"),
            data(2, "map_elsewhere", "h2"),
            data(3, "map_tokens", "h3"),
        ]);

        let err = runner.run(|_| stream, futures::future::pending()).await.unwrap_err();
        assert!(err.is_protocol_mismatch());
        assert_eq!(store.row_counts().await.unwrap().blocks, 1);
        assert_eq!(store.load_cursor("token_tracker").await.unwrap(), Some(Cursor::new("c1")));
    }

    #[tokio::test]
    async fn shutdown_before_next_message() {
        let store = MemoryLedger::new();
        let mut runner = SinkRunner::new(coordinator(&store));
        let stream = futures::stream::iter(vec![data(1, "map_tokens", "h1")]);

        let summary = runner.run(|_| stream, async {}).await.unwrap();
        assert_eq!(summary.stop, StopReason::Shutdown);
        assert_eq!(summary.messages, 0);
        assert_eq!(store.row_counts().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn timed_out_batch_rolls_back() {
        use crate::testing::{FailPoint, FailingStore};

        let store = Arc::new(FailingStore::new(MemoryLedger::new()));
        store.fail_at(FailPoint::Hang(2));
        let coordinator = BlockCoordinator::new(
            Arc::clone(&store),
            SinkConfig::builder().output_module("map_tokens").build(),
        );
        let mut runner = SinkRunner::new(coordinator).with_batch_timeout(Duration::from_millis(20));
        let stream = futures::stream::iter(vec![data(1, "map_tokens", "h1")]);

        let err = runner.run(|_| stream, futures::future::pending()).await.unwrap_err();
        assert!(matches!(err, SinkError::Aborted { .. }));
        assert_eq!(store.row_counts().await.unwrap().total(), 0);
        assert_eq!(store.load_cursor("token_tracker").await.unwrap(), None);
    }
}
