mod common;

use std::time::Duration;

use config::shared::ExecutorConfig;
use doctap::error::{ErrorKind, TapResult};
use doctap::executor::OperationsBuffer;
use doctap::metrics::{FLUSHES_TOTAL, Metrics, TIMER_SIGNALS_RECEIVED};
use doctap::pipeline::Pipeline;
use doctap::store::memory::MemoryStorage;
use doctap::types::Operation;
use telemetry::tracing::init_test_tracing;
use tracing::Span;

use crate::common::*;

fn pipeline_config(batch_size: usize) -> ExecutorConfig {
    ExecutorConfig {
        timer_interval_ms: 1_000,
        min_flush_spacing_ms: 0,
        ..executor_config(batch_size)
    }
}

#[tokio::test(start_paused = true)]
async fn timer_flushes_transactions_below_batch_size() {
    init_test_tracing();
    let storage = create_storage().await;
    let mut pipeline = Pipeline::new(pipeline_config(100), storage.clone());

    assert_eq!(pipeline.current_seq(), None);
    pipeline.start().await.unwrap();
    assert_eq!(pipeline.current_seq(), Some(0));

    pipeline
        .queue()
        .add_all(transaction(vec![upsert_item("1", "first", 1).into()], 7))
        .unwrap();

    // We let the first timer signal fire, the batch size alone would never trigger a flush.
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    assert_eq!(pipeline.current_seq(), Some(7));
    assert_eq!(item_ids(&storage, ITEMS_TABLE).await, vec!["1"]);

    let metrics = pipeline.metrics();
    assert_eq!(metrics.get(FLUSHES_TOTAL), 1);
    assert!(metrics.get(TIMER_SIGNALS_RECEIVED) >= 1);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_flushes_remaining_operations_when_configured() {
    init_test_tracing();
    let storage = create_storage().await;
    let config = ExecutorConfig {
        flush_on_shutdown: true,
        timer_interval_ms: 60_000,
        ..executor_config(100)
    };
    let mut pipeline = Pipeline::new(config, storage.clone());
    pipeline.start().await.unwrap();

    pipeline
        .queue()
        .add_all(transaction(vec![upsert_item("1", "first", 1).into()], 5))
        .unwrap();

    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(item_ids(&storage, ITEMS_TABLE).await, vec!["1"]);
    assert_eq!(stored_seq(&storage).await, Some(5));
}

#[tokio::test(start_paused = true)]
async fn shutdown_leaves_remaining_operations_unflushed_by_default() {
    init_test_tracing();
    let storage = create_storage().await;
    let config = ExecutorConfig {
        timer_interval_ms: 60_000,
        ..executor_config(100)
    };
    let mut pipeline = Pipeline::new(config, storage.clone());
    pipeline.start().await.unwrap();

    let queue = pipeline.queue();
    queue
        .add_all(transaction(vec![upsert_item("1", "first", 1).into()], 5))
        .unwrap();

    pipeline.shutdown_and_wait().await.unwrap();

    assert!(storage.rows(ITEMS_TABLE).await.is_empty());
    assert_eq!(stored_seq(&storage).await, Some(0));
    assert_eq!(
        queue.add(Operation::TimerFired).unwrap_err().kind(),
        ErrorKind::QueueClosed
    );
}

#[tokio::test(start_paused = true)]
async fn executor_failure_is_reported_by_wait() {
    init_test_tracing();
    let storage = create_storage().await;
    let mut pipeline = Pipeline::new(pipeline_config(1), storage.clone());
    pipeline.start().await.unwrap();

    let queue = pipeline.queue();
    queue
        .add_all(transaction(
            vec![
                insert_item("1", "first", 1).into(),
                insert_item("1", "duplicate", 1).into(),
            ],
            3,
        ))
        .unwrap();

    let err = pipeline.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ApplyFailed);
    assert_eq!(err.root_kind(), ErrorKind::UniqueViolation);
    assert!(queue.is_closed());
    assert_eq!(stored_seq(&storage).await, Some(0));
}

#[tokio::test(start_paused = true)]
async fn callbacks_must_be_registered_before_start() {
    init_test_tracing();
    let storage = create_storage().await;
    let mut pipeline = Pipeline::new(pipeline_config(1), storage.clone());

    pipeline
        .add_pre_transaction_callback(
            |buffer: &mut OperationsBuffer, metrics: &Metrics, _span: &Span| -> TapResult<()> {
                metrics.add("callback_operations", buffer.len() as u64);

                Ok(())
            },
        )
        .unwrap();
    pipeline.start().await.unwrap();

    let err = pipeline
        .add_pre_transaction_callback(
            |_buffer: &mut OperationsBuffer, _metrics: &Metrics, _span: &Span| -> TapResult<()> {
                Ok(())
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    pipeline
        .queue()
        .add_all(transaction(vec![upsert_item("1", "first", 1).into()], 1))
        .unwrap();
    let metrics = pipeline.metrics();
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(metrics.get("callback_operations"), 1);
    assert_eq!(stored_seq(&storage).await, Some(1));
}

#[tokio::test]
async fn pipeline_cannot_be_started_twice() {
    init_test_tracing();
    let mut pipeline = Pipeline::new(pipeline_config(1), MemoryStorage::new());

    pipeline.start().await.unwrap();
    let err = pipeline.start().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidState);
    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test]
async fn invalid_configuration_is_rejected_on_start() {
    init_test_tracing();
    let mut pipeline = Pipeline::new(pipeline_config(0), MemoryStorage::new());

    let err = pipeline.start().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert_eq!(pipeline.current_seq(), None);
    pipeline.wait().await.unwrap();
}
