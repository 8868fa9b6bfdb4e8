use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, TapResult};
use crate::store::base::{Storage, StorageTransaction};
use crate::types::{Attributes, Cell, Checkpoint};

/// A table kept in memory.
#[derive(Debug, Clone, Default)]
struct MemoryTable {
    /// Columns whose non-null values must be distinct across rows.
    unique_columns: BTreeSet<String>,
    rows: Vec<Attributes>,
}

impl MemoryTable {
    fn insert(&mut self, table: &str, row: &Attributes) -> TapResult<()> {
        for column in &self.unique_columns {
            let Some(value) = row.get(column).filter(|value| !value.is_null()) else {
                continue;
            };

            if self.rows.iter().any(|existing| existing.get(column) == Some(value)) {
                bail!(
                    ErrorKind::UniqueViolation,
                    "Memory table unique constraint violation",
                    format!("Table '{table}' already has a row with {column} = {value}")
                );
            }
        }

        self.rows.push(row.clone());

        Ok(())
    }

    fn delete(&mut self, column: &str, value: &Cell) -> u64 {
        let before = self.rows.len();
        self.rows
            .retain(|row| row.get(column).unwrap_or(&Cell::Null) != value);

        (before - self.rows.len()) as u64
    }
}

/// Inner state of [`MemoryStorage`].
#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<String, MemoryTable>,
    checkpoints: BTreeMap<String, Checkpoint>,
    transactions_begun: u64,
    transactions_committed: u64,
    transactions_rolled_back: u64,
}

/// In-memory [`Storage`] for tests and development.
///
/// Tables must be registered with [`MemoryStorage::create_table`] before rows are written to them.
/// An open transaction holds the storage lock until it is committed or dropped, so transactions
/// are serialized.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty table, replacing any table with the same name.
    pub async fn create_table<I, C>(&self, name: impl Into<String>, unique_columns: I)
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        let table = MemoryTable {
            unique_columns: unique_columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        };

        let mut inner = self.inner.lock().await;
        inner.tables.insert(name.into(), table);
    }

    /// Returns the committed rows of `table`, in insertion order.
    pub async fn rows(&self, table: &str) -> Vec<Attributes> {
        let inner = self.inner.lock().await;

        inner
            .tables
            .get(table)
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    /// Returns the committed checkpoint of `stream_name`, without creating it.
    pub async fn checkpoint(&self, stream_name: &str) -> Option<Checkpoint> {
        let inner = self.inner.lock().await;

        inner.checkpoints.get(stream_name).cloned()
    }

    /// Replaces the checkpoint of its stream outside of any transaction.
    pub async fn set_checkpoint(&self, checkpoint: Checkpoint) {
        let mut inner = self.inner.lock().await;
        inner
            .checkpoints
            .insert(checkpoint.stream_name.clone(), checkpoint);
    }

    pub async fn transactions_begun(&self) -> u64 {
        self.inner.lock().await.transactions_begun
    }

    pub async fn transactions_committed(&self) -> u64 {
        self.inner.lock().await.transactions_committed
    }

    pub async fn transactions_rolled_back(&self) -> u64 {
        self.inner.lock().await.transactions_rolled_back
    }
}

impl Storage for MemoryStorage {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> TapResult<MemoryTransaction> {
        let mut guard = self.inner.clone().lock_owned().await;
        guard.transactions_begun += 1;

        let tables = guard.tables.clone();
        let checkpoints = guard.checkpoints.clone();

        Ok(MemoryTransaction {
            guard,
            tables,
            checkpoints,
            finished: false,
        })
    }

    async fn load_checkpoint(&self, stream_name: &str) -> TapResult<Checkpoint> {
        let mut inner = self.inner.lock().await;

        let checkpoint = inner
            .checkpoints
            .entry(stream_name.to_string())
            .or_insert_with(|| {
                debug!(stream_name, "creating initial checkpoint");
                Checkpoint::initial(stream_name)
            });

        Ok(checkpoint.clone())
    }
}

/// Transaction of a [`MemoryStorage`].
///
/// Writes go to a private copy of the tables and checkpoints which replaces the shared state on
/// commit.
#[derive(Debug)]
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Inner>,
    tables: BTreeMap<String, MemoryTable>,
    checkpoints: BTreeMap<String, Checkpoint>,
    finished: bool,
}

impl MemoryTransaction {
    fn table_mut(&mut self, table: &str) -> TapResult<&mut MemoryTable> {
        match self.tables.get_mut(table) {
            Some(memory_table) => Ok(memory_table),
            None => bail!(
                ErrorKind::DestinationTableMissing,
                "Memory table does not exist",
                format!("Table '{table}' was not created")
            ),
        }
    }
}

impl StorageTransaction for MemoryTransaction {
    async fn insert_row(&mut self, table: &str, row: &Attributes) -> TapResult<()> {
        self.table_mut(table)?.insert(table, row)
    }

    async fn delete_rows(&mut self, table: &str, column: &str, value: &Cell) -> TapResult<u64> {
        Ok(self.table_mut(table)?.delete(column, value))
    }

    async fn store_checkpoint(&mut self, checkpoint: &Checkpoint) -> TapResult<()> {
        self.checkpoints
            .insert(checkpoint.stream_name.clone(), checkpoint.clone());

        Ok(())
    }

    async fn commit(mut self) -> TapResult<()> {
        self.guard.tables = std::mem::take(&mut self.tables);
        self.guard.checkpoints = std::mem::take(&mut self.checkpoints);
        self.guard.transactions_committed += 1;
        self.finished = true;

        Ok(())
    }

    async fn rollback(self) -> TapResult<()> {
        // Dropping discards the staged writes.
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.guard.transactions_rolled_back += 1;
        }
    }
}
