use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Batching and flush policy of the query executor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutorConfig {
    /// Name of the replicated stream. Keys the checkpoint row in the storage.
    pub stream_name: String,
    /// Number of buffered row operations that triggers a flush at the next transaction end.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Interval, in milliseconds, between timer signals.
    #[serde(default = "default_timer_interval_ms")]
    pub timer_interval_ms: u64,
    /// Minimum time, in milliseconds, since the last commit before a timer signal may flush.
    #[serde(default = "default_min_flush_spacing_ms")]
    pub min_flush_spacing_ms: u64,
    /// Whether the pipeline flushes the remaining buffer after the queue is drained on shutdown.
    #[serde(default)]
    pub flush_on_shutdown: bool,
}

impl ExecutorConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 1000;

    pub const DEFAULT_TIMER_INTERVAL_MS: u64 = 15_000;

    pub const DEFAULT_MIN_FLUSH_SPACING_MS: u64 = 15_000;

    /// Creates a configuration for `stream_name` with default batching.
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            batch_size: default_batch_size(),
            timer_interval_ms: default_timer_interval_ms(),
            min_flush_spacing_ms: default_min_flush_spacing_ms(),
            flush_on_shutdown: false,
        }
    }

    pub fn timer_interval(&self) -> Duration {
        Duration::from_millis(self.timer_interval_ms)
    }

    pub fn min_flush_spacing(&self) -> Duration {
        Duration::from_millis(self.min_flush_spacing_ms)
    }

    /// Validates the executor settings.
    ///
    /// The stream name must be non-empty, and both `batch_size` and `timer_interval_ms` must be
    /// greater than zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.stream_name.trim().is_empty() {
            return Err(ValidationError::EmptyStreamName);
        }

        if self.batch_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "executor.batch_size".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.timer_interval_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "executor.timer_interval_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

fn default_batch_size() -> usize {
    ExecutorConfig::DEFAULT_BATCH_SIZE
}

fn default_timer_interval_ms() -> u64 {
    ExecutorConfig::DEFAULT_TIMER_INTERVAL_MS
}

fn default_min_flush_spacing_ms() -> u64 {
    ExecutorConfig::DEFAULT_MIN_FLUSH_SPACING_MS
}
