use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use config::shared::ExecutorConfig;
use metrics::{gauge, histogram};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, warn};

use crate::concurrency::queue::OperationsQueue;
use crate::error::{ErrorKind, TapError, TapResult};
use crate::executor::buffer::OperationsBuffer;
use crate::executor::callback::{BoxedPreTransactionCallback, PreTransactionCallback};
use crate::failpoints::{FLUSH_BEFORE_CHECKPOINT, tap_fail_point};
use crate::metrics::{
    COMMITTED_SEQ, FLUSH_DURATION_SECONDS, FLUSH_FAILURES_TOTAL, FLUSHED_OPERATIONS_TOTAL,
    FLUSHES_TOTAL, Metrics, OPERATIONS_RECEIVED, ROWS_DELETED_TOTAL, ROWS_INSERTED_TOTAL,
    STREAM_NAME_LABEL, TIMER_FLUSHES_SKIPPED, TIMER_SIGNALS_RECEIVED,
};
use crate::store::{Storage, StorageTransaction};
use crate::tap_error;
use crate::types::{Checkpoint, Operation, RowOperation, Seq};

/// Rows written by a single flush.
#[derive(Debug, Default, Clone, Copy)]
struct FlushStats {
    rows_inserted: u64,
    rows_deleted: u64,
}

/// Applies `operations` in order and writes `checkpoint`, all inside `tx`.
async fn apply_operations<T>(
    tx: &mut T,
    operations: &[RowOperation],
    checkpoint: &Checkpoint,
) -> TapResult<FlushStats>
where
    T: StorageTransaction,
{
    let mut stats = FlushStats::default();

    for operation in operations {
        match operation {
            RowOperation::Insert(insert) => {
                if insert.upsert {
                    stats.rows_deleted += tx
                        .delete_rows(&insert.table, &insert.key_column, &insert.key)
                        .await?;
                }

                tx.insert_row(&insert.table, &insert.row()).await?;
                stats.rows_inserted += 1;
            }
            RowOperation::Delete(delete) => {
                let deleted = tx
                    .delete_rows(&delete.table, &delete.key_column, &delete.key_value)
                    .await?;
                debug!(
                    table = %delete.table,
                    cascade = delete.cascade,
                    deleted,
                    "applied delete"
                );

                stats.rows_deleted += deleted;
            }
        }
    }

    tap_fail_point(FLUSH_BEFORE_CHECKPOINT)?;

    tx.store_checkpoint(checkpoint).await?;

    Ok(stats)
}

/// Consumes the operations queue and applies buffered row operations in atomic batches.
///
/// Row operations are buffered until a flush is due:
///
/// - at a transaction end, once at least `batch_size` operations are buffered;
/// - on a timer signal, when the buffer is not empty and no flush was committed during the last
///   `min_flush_spacing`. A signal received inside an open transaction is honored at that
///   transaction's end, so a document change is never committed partially.
///
/// Each flush applies the whole buffer and advances the stream [`Checkpoint`] to the seq of the
/// last transaction end in a single storage transaction. On failure everything is rolled back and
/// the buffer is kept as is.
pub struct QueryExecutor<S> {
    config: Arc<ExecutorConfig>,
    queue: OperationsQueue,
    storage: S,
    metrics: Metrics,
    buffer: OperationsBuffer,
    /// Seq of the last transaction end buffered since the last flush.
    pending_seq: Option<Seq>,
    /// Last committed checkpoint.
    checkpoint: Checkpoint,
    /// Monotonic time of the last commit, `None` if it lies further back than the clock reaches.
    last_flush_at: Option<Instant>,
    /// Whether row operations or a begin marker were received after the last transaction end.
    transaction_open: bool,
    /// Set when a timer flush was deferred to the end of the open transaction.
    flush_requested: bool,
    callbacks: Vec<BoxedPreTransactionCallback>,
    seq_tx: watch::Sender<Seq>,
}

impl<S> QueryExecutor<S>
where
    S: Storage,
{
    /// Creates an executor and loads the checkpoint of the configured stream.
    pub async fn new(
        config: Arc<ExecutorConfig>,
        queue: OperationsQueue,
        storage: S,
        metrics: Metrics,
    ) -> TapResult<Self> {
        let checkpoint = storage.load_checkpoint(&config.stream_name).await?;
        info!(
            stream_name = %config.stream_name,
            seq = checkpoint.seq,
            "loaded stream checkpoint"
        );

        // Flush spacing is measured on the monotonic clock. A persisted commit time in the future
        // counts as a commit made now.
        let last_flush_at = checkpoint.last_transaction_at.and_then(|committed_at| {
            let elapsed = (Utc::now() - committed_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            Instant::now().checked_sub(elapsed)
        });

        let (seq_tx, _) = watch::channel(checkpoint.seq);

        Ok(Self {
            config,
            queue,
            storage,
            metrics,
            buffer: OperationsBuffer::new(),
            pending_seq: None,
            checkpoint,
            last_flush_at,
            transaction_open: false,
            flush_requested: false,
            callbacks: Vec::new(),
            seq_tx,
        })
    }

    /// Seq of the last committed flush. Feed consumption resumes after it.
    pub fn current_seq(&self) -> Seq {
        self.checkpoint.seq
    }

    pub fn last_transaction_at(&self) -> Option<DateTime<Utc>> {
        self.checkpoint.last_transaction_at
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Returns a receiver that observes the committed seq.
    pub fn subscribe_seq(&self) -> watch::Receiver<Seq> {
        self.seq_tx.subscribe()
    }

    pub fn buffered_operations(&self) -> &[RowOperation] {
        self.buffer.as_slice()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Registers a callback run before every non-empty flush, after the ones already registered.
    pub fn add_pre_transaction_callback<C>(&mut self, callback: C)
    where
        C: PreTransactionCallback + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    pub(crate) fn add_boxed_pre_transaction_callback(
        &mut self,
        callback: BoxedPreTransactionCallback,
    ) {
        self.callbacks.push(callback);
    }

    /// Processes operations until the queue is closed and drained.
    ///
    /// Operations still buffered when the queue ends are not flushed. On error the queue is closed
    /// so producers stop enqueueing.
    pub async fn start(&mut self) -> TapResult<()> {
        info!("starting query executor");

        while let Some(operation) = self.queue.next().await {
            if let Err(err) = self.handle_operation(operation).await {
                error!(error = %err, "query executor failed, closing the operations queue");
                self.queue.close();

                return Err(err);
            }
        }

        if !self.buffer.is_empty() {
            warn!(
                unflushed_operations = self.buffer.len(),
                "operations queue ended with unflushed operations"
            );
        }

        info!(seq = self.checkpoint.seq, "query executor stopped");

        Ok(())
    }

    async fn handle_operation(&mut self, operation: Operation) -> TapResult<()> {
        match operation {
            Operation::BeginTransaction => {
                self.metrics.increment(OPERATIONS_RECEIVED);
                self.transaction_open = true;
            }
            Operation::Insert(insert) => {
                self.metrics.increment(OPERATIONS_RECEIVED);
                self.transaction_open = true;
                self.buffer.push(insert);
            }
            Operation::Delete(delete) => {
                self.metrics.increment(OPERATIONS_RECEIVED);
                self.transaction_open = true;
                self.buffer.push(delete);
            }
            Operation::EndTransaction(end) => {
                self.metrics.increment(OPERATIONS_RECEIVED);
                self.pending_seq = Some(end.seq);
                self.transaction_open = false;

                if self.buffer.len() >= self.config.batch_size {
                    debug!(
                        buffered = self.buffer.len(),
                        batch_size = self.config.batch_size,
                        "batch size reached"
                    );
                    self.flush().await?;
                } else if self.flush_requested {
                    debug!("running deferred timer flush");
                    self.flush().await?;
                }
            }
            Operation::TimerFired => self.handle_timer().await?,
        }

        Ok(())
    }

    async fn handle_timer(&mut self) -> TapResult<()> {
        self.metrics.increment(TIMER_SIGNALS_RECEIVED);

        if self.buffer.is_empty() {
            debug!("timer signal skipped, nothing buffered");
            self.metrics.increment(TIMER_FLUSHES_SKIPPED);

            return Ok(());
        }

        if !self.min_flush_spacing_elapsed() {
            debug!("timer signal skipped, last flush is too recent");
            self.metrics.increment(TIMER_FLUSHES_SKIPPED);

            return Ok(());
        }

        if self.transaction_open {
            debug!("timer flush deferred to the end of the open transaction");
            self.flush_requested = true;

            return Ok(());
        }

        self.flush().await
    }

    fn min_flush_spacing_elapsed(&self) -> bool {
        self.last_flush_at
            .is_none_or(|last_flush_at| last_flush_at.elapsed() >= self.config.min_flush_spacing())
    }

    /// Applies all buffered operations and advances the checkpoint in one storage transaction.
    ///
    /// Does nothing when the buffer is empty. Registered callbacks run first and may append
    /// operations. Any failure rolls the transaction back and restores the buffer to what it was
    /// before the callbacks ran, so a retry runs them again on the same operations. The checkpoint
    /// is left unchanged.
    pub async fn flush(&mut self) -> TapResult<()> {
        self.flush_requested = false;

        if self.buffer.is_empty() {
            debug!("nothing to flush");

            return Ok(());
        }

        let flush_span = tracing::info_span!(
            "flush",
            stream_name = %self.config.stream_name,
            operations = self.buffer.len()
        );

        let buffered = self.buffer.len();

        for callback in &self.callbacks {
            if let Err(err) = callback.execute(&mut self.buffer, &self.metrics, &flush_span) {
                self.buffer.truncate(buffered);
                self.metrics.increment(FLUSH_FAILURES_TOTAL);

                return Err(tap_error!(
                    ErrorKind::CallbackFailed,
                    "Pre-transaction callback failed",
                    source: err
                ));
            }
        }

        let started_at = Instant::now();
        let checkpoint = self.checkpoint.advance(self.pending_seq, Utc::now());
        let operations = self.buffer.len();

        let result = self
            .apply(&checkpoint)
            .instrument(flush_span.clone())
            .await;

        let stats = match result {
            Ok(stats) => stats,
            Err(err) => {
                self.buffer.truncate(buffered);
                self.metrics.increment(FLUSH_FAILURES_TOTAL);
                flush_span.in_scope(|| {
                    error!(error = %err, "flush failed, transaction rolled back");
                });

                return Err(tap_error!(
                    ErrorKind::ApplyFailed,
                    "Flushing buffered operations failed",
                    format!("{operations} operations were rolled back"),
                    source: err
                ));
            }
        };

        self.buffer.clear();
        self.pending_seq = None;
        self.checkpoint = checkpoint;
        self.last_flush_at = Some(Instant::now());
        self.seq_tx.send_replace(self.checkpoint.seq);

        self.metrics.increment(FLUSHES_TOTAL);
        self.metrics
            .add(FLUSHED_OPERATIONS_TOTAL, operations as u64);
        self.metrics.add(ROWS_INSERTED_TOTAL, stats.rows_inserted);
        self.metrics.add(ROWS_DELETED_TOTAL, stats.rows_deleted);
        histogram!(
            FLUSH_DURATION_SECONDS,
            STREAM_NAME_LABEL => self.config.stream_name.clone()
        )
        .record(started_at.elapsed().as_secs_f64());
        gauge!(
            COMMITTED_SEQ,
            STREAM_NAME_LABEL => self.config.stream_name.clone()
        )
        .set(self.checkpoint.seq as f64);

        flush_span.in_scope(|| {
            info!(
                seq = self.checkpoint.seq,
                rows_inserted = stats.rows_inserted,
                rows_deleted = stats.rows_deleted,
                "flush committed"
            );
        });

        Ok(())
    }

    /// Runs the storage transaction of a flush, rolling it back on failure.
    async fn apply(&self, checkpoint: &Checkpoint) -> Result<FlushStats, TapError> {
        let mut tx = self.storage.begin().await?;

        match apply_operations(&mut tx, self.buffer.as_slice(), checkpoint).await {
            Ok(stats) => {
                tx.commit().await?;

                Ok(stats)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rolling back the flush transaction failed");
                }

                Err(err)
            }
        }
    }
}
