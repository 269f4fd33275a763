//! Sink configuration and its fluent builder.
//!
//! # Example
//!
//! ```rust
//! use ledgersink_core::config::{EmptyBatchPolicy, SinkConfig};
//!
//! let config = SinkConfig::builder()
//!     .output_module("map_token_events")
//!     .checkpoint_name("token_tracker")
//!     .empty_batches(EmptyBatchPolicy::Checkpoint)
//!     .build();
//! assert_eq!(config.output_module, "map_token_events");
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::AddressConflictPolicy;
use crate::checkpoint::DEFAULT_CHECKPOINT_NAME;

/// What to do with a delivered block that produced no events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyBatchPolicy {
    /// Write nothing, not even the cursor. A long run of empty blocks is
    /// replayed after a restart.
    #[default]
    Skip,
    /// Advance the checkpoint on its own, without a block row.
    Checkpoint,
}

/// Intervals of the advisory progress tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// How often the block rate is sampled.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    /// How often progress is logged.
    #[serde(default = "default_log_interval_ms")]
    pub log_interval_ms: u64,
    /// Number of rate samples in the rolling average.
    #[serde(default = "default_window")]
    pub window: usize,
}

fn default_sample_interval_ms() -> u64 {
    1_000
}

fn default_log_interval_ms() -> u64 {
    5_000
}

fn default_window() -> usize {
    30
}

impl ProgressConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_interval_ms.max(1))
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            log_interval_ms: default_log_interval_ms(),
            window: default_window(),
        }
    }
}

/// Configuration of one sink instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Name of the upstream output module this sink accepts batches from.
    pub output_module: String,
    /// Name of the checkpoint row.
    #[serde(default = "default_checkpoint_name")]
    pub checkpoint_name: String,
    #[serde(default)]
    pub empty_batches: EmptyBatchPolicy,
    #[serde(default)]
    pub address_conflicts: AddressConflictPolicy,
    #[serde(default)]
    pub progress: ProgressConfig,
}

fn default_checkpoint_name() -> String {
    DEFAULT_CHECKPOINT_NAME.to_string()
}

impl SinkConfig {
    pub fn builder() -> SinkConfigBuilder {
        SinkConfigBuilder::new()
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            output_module: "map_outputs".into(),
            checkpoint_name: default_checkpoint_name(),
            empty_batches: EmptyBatchPolicy::default(),
            address_conflicts: AddressConflictPolicy::default(),
            progress: ProgressConfig::default(),
        }
    }
}

/// Fluent builder for [`SinkConfig`].
#[derive(Default)]
pub struct SinkConfigBuilder {
    config: SinkConfig,
}

impl SinkConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SinkConfig::default(),
        }
    }

    /// Set the output module batches must come from.
    pub fn output_module(mut self, name: impl Into<String>) -> Self {
        self.config.output_module = name.into();
        self
    }

    /// Set the checkpoint row name.
    pub fn checkpoint_name(mut self, name: impl Into<String>) -> Self {
        self.config.checkpoint_name = name.into();
        self
    }

    pub fn empty_batches(mut self, policy: EmptyBatchPolicy) -> Self {
        self.config.empty_batches = policy;
        self
    }

    pub fn address_conflicts(mut self, policy: AddressConflictPolicy) -> Self {
        self.config.address_conflicts = policy;
        self
    }

    pub fn progress(mut self, progress: ProgressConfig) -> Self {
        self.config.progress = progress;
        self
    }

    pub fn build(self) -> SinkConfig {
        self.config
    }
}
