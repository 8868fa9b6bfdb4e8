#![allow(dead_code)]

use std::sync::Arc;

use config::shared::ExecutorConfig;
use doctap::concurrency::queue::OperationsQueue;
use doctap::error::TapResult;
use doctap::executor::QueryExecutor;
use doctap::metrics::Metrics;
use doctap::store::Storage;
use doctap::store::memory::MemoryStorage;
use doctap::types::{
    Attributes, Cell, DeleteOperation, InsertOperation, Operation, RowOperation, Seq,
};

pub const STREAM_NAME: &str = "items";

pub const ITEMS_TABLE: &str = "items";

pub const ITEM_CHILDREN_TABLE: &str = "item_children";

/// Creates a storage with an `items` table keyed by a unique `item_id` and an `item_children`
/// table without constraints.
pub async fn create_storage() -> MemoryStorage {
    let storage = MemoryStorage::new();
    storage.create_table(ITEMS_TABLE, ["item_id"]).await;
    storage
        .create_table(ITEM_CHILDREN_TABLE, Vec::<String>::new())
        .await;

    storage
}

pub fn executor_config(batch_size: usize) -> ExecutorConfig {
    ExecutorConfig {
        batch_size,
        ..ExecutorConfig::new(STREAM_NAME)
    }
}

pub async fn create_executor<S>(
    config: ExecutorConfig,
    storage: &S,
) -> (QueryExecutor<S>, OperationsQueue)
where
    S: Storage + Clone,
{
    let queue = OperationsQueue::new();
    let metrics = Metrics::new(config.stream_name.clone());
    let executor = QueryExecutor::new(Arc::new(config), queue.clone(), storage.clone(), metrics)
        .await
        .unwrap();

    (executor, queue)
}

/// Enqueues `operations`, closes the queue and runs the executor until it is drained.
pub async fn run_operations<S>(
    executor: &mut QueryExecutor<S>,
    queue: &OperationsQueue,
    operations: Vec<Operation>,
) -> TapResult<()>
where
    S: Storage,
{
    queue.add_all(operations).unwrap();
    queue.close();

    executor.start().await
}

pub fn item_attributes(item_id: &str, name: &str, amount: i64) -> Attributes {
    Attributes::from([
        ("item_id".to_string(), Cell::from(item_id)),
        ("name".to_string(), Cell::from(name)),
        ("amount".to_string(), Cell::from(amount)),
    ])
}

pub fn upsert_item(item_id: &str, name: &str, amount: i64) -> InsertOperation {
    InsertOperation::new(
        ITEMS_TABLE,
        true,
        "item_id",
        item_id,
        item_attributes(item_id, name, amount),
    )
}

pub fn insert_item(item_id: &str, name: &str, amount: i64) -> InsertOperation {
    InsertOperation {
        upsert: false,
        ..upsert_item(item_id, name, amount)
    }
}

pub fn append_child(item_id: &str, position: i64) -> InsertOperation {
    InsertOperation::new(
        ITEM_CHILDREN_TABLE,
        false,
        "item_id",
        item_id,
        Attributes::from([("position".to_string(), Cell::from(position))]),
    )
}

pub fn delete_item(item_id: &str) -> DeleteOperation {
    DeleteOperation::new(ITEMS_TABLE, true, "item_id", item_id)
}

pub fn delete_children(item_id: &str) -> DeleteOperation {
    DeleteOperation::new(ITEM_CHILDREN_TABLE, false, "item_id", item_id)
}

/// Frames `operations` as one document change ending at `seq`.
pub fn transaction(operations: Vec<RowOperation>, seq: Seq) -> Vec<Operation> {
    let mut framed = vec![Operation::BeginTransaction];
    framed.extend(operations.into_iter().map(Operation::from));
    framed.push(Operation::end_transaction(seq));

    framed
}

/// Returns the sorted `item_id`s of the rows in `table`.
pub async fn item_ids(storage: &MemoryStorage, table: &str) -> Vec<String> {
    let mut ids: Vec<String> = storage
        .rows(table)
        .await
        .iter()
        .filter_map(|row| match row.get("item_id") {
            Some(Cell::String(id)) => Some(id.clone()),
            _ => None,
        })
        .collect();
    ids.sort();

    ids
}

pub async fn item_amount(storage: &MemoryStorage, item_id: &str) -> Option<i64> {
    storage
        .rows(ITEMS_TABLE)
        .await
        .iter()
        .find(|row| row.get("item_id") == Some(&Cell::from(item_id)))
        .and_then(|row| match row.get("amount") {
            Some(Cell::I64(amount)) => Some(*amount),
            _ => None,
        })
}

pub async fn stored_seq(storage: &MemoryStorage) -> Option<Seq> {
    storage
        .checkpoint(STREAM_NAME)
        .await
        .map(|checkpoint| checkpoint.seq)
}
