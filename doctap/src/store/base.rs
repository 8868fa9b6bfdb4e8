use std::future::Future;

use crate::error::TapResult;
use crate::types::{Attributes, Cell, Checkpoint};

/// Relational storage the executor writes to.
///
/// Every flush runs inside a single [`StorageTransaction`]: the buffered row operations and the
/// new [`Checkpoint`] become visible together on commit, or not at all.
pub trait Storage {
    type Transaction: StorageTransaction + Send;

    /// Opens a new atomic transaction.
    fn begin(&self) -> impl Future<Output = TapResult<Self::Transaction>> + Send;

    /// Returns the checkpoint of `stream_name`.
    ///
    /// A stream without a checkpoint gets one persisted with seq `0` and no last transaction time.
    fn load_checkpoint(
        &self,
        stream_name: &str,
    ) -> impl Future<Output = TapResult<Checkpoint>> + Send;
}

/// An open storage transaction.
///
/// Dropping a transaction without calling [`StorageTransaction::commit`] discards its writes.
pub trait StorageTransaction {
    /// Inserts `row` into `table`.
    fn insert_row(
        &mut self,
        table: &str,
        row: &Attributes,
    ) -> impl Future<Output = TapResult<()>> + Send;

    /// Deletes every row of `table` whose `column` equals `value` and returns how many were
    /// removed.
    fn delete_rows(
        &mut self,
        table: &str,
        column: &str,
        value: &Cell,
    ) -> impl Future<Output = TapResult<u64>> + Send;

    /// Writes `checkpoint`, replacing the stored checkpoint of the same stream.
    fn store_checkpoint(
        &mut self,
        checkpoint: &Checkpoint,
    ) -> impl Future<Output = TapResult<()>> + Send;

    fn commit(self) -> impl Future<Output = TapResult<()>> + Send;

    fn rollback(self) -> impl Future<Output = TapResult<()>> + Send;
}
