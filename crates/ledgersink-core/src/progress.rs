//! Advisory progress reporting.
//!
//! [`ProgressStats`] is updated on the hot path with relaxed atomics.
//! [`ProgressReporter`] runs two background tasks: one samples the block
//! count into a rolling window, the other logs throughput. Neither task
//! touches storage and neither affects correctness.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ProgressConfig;

/// Counters shared between the coordinator and the reporter.
#[derive(Debug, Default)]
pub struct ProgressStats {
    blocks: AtomicU64,
    /// Last block number plus one; zero means no block yet.
    last_block: AtomicU64,
    processing_micros: AtomicU64,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one received block and the time spent handling it.
    pub fn record_block(&self, number: u64, elapsed: Duration) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
        self.last_block.store(number.saturating_add(1), Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.processing_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn blocks_received(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    pub fn last_block(&self) -> Option<u64> {
        match self.last_block.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n - 1),
        }
    }

    /// Mean handling time per block, in milliseconds.
    pub fn average_processing_ms(&self) -> f64 {
        let blocks = self.blocks_received();
        if blocks == 0 {
            return 0.0;
        }
        self.processing_micros.load(Ordering::Relaxed) as f64 / blocks as f64 / 1_000.0
    }
}

/// Fixed-size window of per-interval block counts.
#[derive(Debug, Clone)]
pub struct RateWindow {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl RateWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, count: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(count);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean count per sample (0 when empty).
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64
    }
}

/// Handle on the sampling and logging tasks. Dropping it stops both.
pub struct ProgressReporter {
    window: Arc<Mutex<RateWindow>>,
    sample_interval: Duration,
    sampler: JoinHandle<()>,
    logger: JoinHandle<()>,
}

impl ProgressReporter {
    /// Spawn both tasks on the current tokio runtime.
    pub fn spawn(stats: Arc<ProgressStats>, config: &ProgressConfig) -> Self {
        let window = Arc::new(Mutex::new(RateWindow::new(config.window)));
        let sample_interval = config.sample_interval();

        let sampler = {
            let stats = Arc::clone(&stats);
            let window = Arc::clone(&window);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(sample_interval);
                ticker.tick().await;
                let mut previous = stats.blocks_received();
                loop {
                    ticker.tick().await;
                    let current = stats.blocks_received();
                    if let Ok(mut w) = window.lock() {
                        w.push(current.saturating_sub(previous));
                    }
                    previous = current;
                }
            })
        };

        let logger = {
            let window = Arc::clone(&window);
            let log_interval = config.log_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(log_interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let per_sample = window.lock().map(|w| w.average()).unwrap_or(0.0);
                    info!(
                        last_block = ?stats.last_block(),
                        blocks = stats.blocks_received(),
                        blocks_per_sec = per_sample / sample_interval.as_secs_f64(),
                        avg_processing_ms = stats.average_processing_ms(),
                        "progress"
                    );
                }
            })
        };

        Self {
            window,
            sample_interval,
            sampler,
            logger,
        }
    }

    /// Rolling average of received blocks per second.
    pub fn blocks_per_sec(&self) -> f64 {
        let per_sample = self.window.lock().map(|w| w.average()).unwrap_or(0.0);
        per_sample / self.sample_interval.as_secs_f64()
    }

    /// Number of rate samples taken so far (capped by the window size).
    pub fn samples(&self) -> usize {
        self.window.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn stop(self) {}
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.sampler.abort();
        self.logger.abort();
    }
}
