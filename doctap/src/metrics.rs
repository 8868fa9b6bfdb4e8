//! Metrics definitions for doctap executors.
//!
//! Counters are emitted through the [`metrics`] facade, labeled with the stream name, and reach
//! whatever recorder the embedding process installed. [`Metrics`] additionally keeps their values
//! in a local registry so pre-transaction callbacks can read them back.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use metrics::{Key, counter};
use metrics_util::registry::{AtomicStorage, Registry};

/// Label for the replicated stream name in metrics.
pub const STREAM_NAME_LABEL: &str = "stream_name";

/// Counter for operations taken from the queue, timer signals excluded.
pub const OPERATIONS_RECEIVED: &str = "doctap_operations_received_total";

/// Counter for timer signals taken from the queue.
pub const TIMER_SIGNALS_RECEIVED: &str = "doctap_timer_signals_received_total";

/// Counter for timer signals that did not lead to a flush.
pub const TIMER_FLUSHES_SKIPPED: &str = "doctap_timer_flushes_skipped_total";

/// Counter for committed flushes.
pub const FLUSHES_TOTAL: &str = "doctap_flushes_total";

/// Counter for row operations applied by committed flushes.
pub const FLUSHED_OPERATIONS_TOTAL: &str = "doctap_flushed_operations_total";

/// Counter for rows inserted by committed flushes.
pub const ROWS_INSERTED_TOTAL: &str = "doctap_rows_inserted_total";

/// Counter for rows deleted by committed flushes, upsert replacements included.
pub const ROWS_DELETED_TOTAL: &str = "doctap_rows_deleted_total";

/// Counter for flushes that were rolled back or aborted by a callback.
pub const FLUSH_FAILURES_TOTAL: &str = "doctap_flush_failures_total";

/// Histogram of committed flush durations, in seconds.
pub const FLUSH_DURATION_SECONDS: &str = "doctap_flush_duration_seconds";

/// Gauge for the last committed seq.
pub const COMMITTED_SEQ: &str = "doctap_committed_seq";

/// Counters of one stream.
///
/// Cloning returns a handle to the same counters.
#[derive(Clone)]
pub struct Metrics {
    stream_name: Arc<str>,
    registry: Arc<Registry<Key, AtomicStorage>>,
}

impl Metrics {
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: Arc::from(stream_name.into()),
            registry: Arc::new(Registry::atomic()),
        }
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    /// Adds `value` to the counter `name`.
    pub fn add(&self, name: &str, value: u64) {
        counter!(
            name.to_string(),
            STREAM_NAME_LABEL => self.stream_name.to_string()
        )
        .increment(value);

        self.registry
            .get_or_create_counter(&Key::from_name(name.to_string()), |counter| {
                counter.fetch_add(value, Ordering::Relaxed);
            });
    }

    /// Returns the value of `name`, `0` if it was never recorded.
    pub fn get(&self, name: &str) -> u64 {
        self.registry
            .get_counter(&Key::from_name(name.to_string()))
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.registry
            .get_counter_handles()
            .into_iter()
            .map(|(key, counter)| (key.name().to_string(), counter.load(Ordering::Relaxed)))
            .collect()
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("stream_name", &self.stream_name)
            .field("counters", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    use super::*;

    #[test]
    fn counters_are_shared_between_clones() {
        let metrics = Metrics::new("items");
        let handle = metrics.clone();

        metrics.increment(FLUSHES_TOTAL);
        handle.add(FLUSHES_TOTAL, 2);
        handle.increment("custom");

        assert_eq!(metrics.get(FLUSHES_TOTAL), 3);
        assert_eq!(metrics.get(ROWS_DELETED_TOTAL), 0);
        assert_eq!(
            metrics.snapshot(),
            BTreeMap::from([("custom".to_string(), 1), (FLUSHES_TOTAL.to_string(), 3)])
        );
    }

    #[test]
    fn counters_reach_the_installed_recorder_with_the_stream_label() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let metrics = Metrics::new("items");

        metrics::with_local_recorder(&recorder, || {
            metrics.add(ROWS_INSERTED_TOTAL, 4);
            metrics.increment(ROWS_INSERTED_TOTAL);
        });

        let (key, _, _, value) = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find(|(key, ..)| key.key().name() == ROWS_INSERTED_TOTAL)
            .unwrap();

        assert!(matches!(value, DebugValue::Counter(5)));
        assert!(
            key.key()
                .labels()
                .any(|label| label.key() == STREAM_NAME_LABEL && label.value() == "items")
        );
        assert_eq!(metrics.get(ROWS_INSERTED_TOTAL), 5);
    }
}
