use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Attributes, Cell, Seq};

/// An operation flowing through the [`crate::concurrency::queue::OperationsQueue`].
///
/// Operations arrive in the order the mapping layer produced them. A document change is
/// usually framed by [`Operation::BeginTransaction`] and [`Operation::EndTransaction`]; only the
/// end marker is required since it carries the feed position that becomes the checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Operation {
    BeginTransaction,
    EndTransaction(EndTransactionOperation),
    Insert(InsertOperation),
    Delete(DeleteOperation),
    /// Emitted by the timer, never persisted.
    TimerFired,
}

impl Operation {
    pub fn end_transaction(seq: Seq) -> Self {
        Operation::EndTransaction(EndTransactionOperation { seq })
    }
}

impl From<RowOperation> for Operation {
    fn from(operation: RowOperation) -> Self {
        match operation {
            RowOperation::Insert(insert) => Operation::Insert(insert),
            RowOperation::Delete(delete) => Operation::Delete(delete),
        }
    }
}

impl From<InsertOperation> for Operation {
    fn from(operation: InsertOperation) -> Self {
        Operation::Insert(operation)
    }
}

impl From<DeleteOperation> for Operation {
    fn from(operation: DeleteOperation) -> Self {
        Operation::Delete(operation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndTransactionOperation {
    /// Feed position reached once this transaction is applied.
    pub seq: Seq,
}

/// Inserts one row.
///
/// With `upsert` set, rows of `table` whose `key_column` equals `key` are removed first, which
/// makes the insert replace the previous version of a document's primary row. Without it the row
/// is appended, which is how non-unique child rows are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertOperation {
    pub table: String,
    pub upsert: bool,
    pub key_column: String,
    pub key: Cell,
    pub attributes: Attributes,
}

impl InsertOperation {
    pub fn new(
        table: impl Into<String>,
        upsert: bool,
        key_column: impl Into<String>,
        key: impl Into<Cell>,
        attributes: Attributes,
    ) -> Self {
        Self {
            table: table.into(),
            upsert,
            key_column: key_column.into(),
            key: key.into(),
            attributes,
        }
    }

    /// Returns the row to write. The key is added under `key_column` when the attributes do not
    /// carry it.
    pub fn row(&self) -> Attributes {
        let mut row = self.attributes.clone();
        row.entry(self.key_column.clone())
            .or_insert_with(|| self.key.clone());

        row
    }
}

/// Deletes every row of `table` where `key_column` equals `key_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteOperation {
    pub table: String,
    /// Set by the mapping layer when the delete removes a document together with its children.
    pub cascade: bool,
    pub key_column: String,
    pub key_value: Cell,
}

impl DeleteOperation {
    pub fn new(
        table: impl Into<String>,
        cascade: bool,
        key_column: impl Into<String>,
        key_value: impl Into<Cell>,
    ) -> Self {
        Self {
            table: table.into(),
            cascade,
            key_column: key_column.into(),
            key_value: key_value.into(),
        }
    }
}

/// A row mutation, the only kind of operation that is ever buffered and applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RowOperation {
    Insert(InsertOperation),
    Delete(DeleteOperation),
}

impl RowOperation {
    pub fn table(&self) -> &str {
        match self {
            RowOperation::Insert(insert) => &insert.table,
            RowOperation::Delete(delete) => &delete.table,
        }
    }
}

impl From<InsertOperation> for RowOperation {
    fn from(operation: InsertOperation) -> Self {
        RowOperation::Insert(operation)
    }
}

impl From<DeleteOperation> for RowOperation {
    fn from(operation: DeleteOperation) -> Self {
        RowOperation::Delete(operation)
    }
}

impl fmt::Display for RowOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowOperation::Insert(insert) => write!(
                f,
                "{} into {} ({} = {})",
                if insert.upsert { "upsert" } else { "insert" },
                insert.table,
                insert.key_column,
                insert.key
            ),
            RowOperation::Delete(delete) => write!(
                f,
                "delete from {} where {} = {}",
                delete.table, delete.key_column, delete.key_value
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_row_adds_missing_key_column() {
        let insert = InsertOperation::new(
            "items",
            true,
            "item_id",
            "123",
            Attributes::from([("name".to_string(), Cell::from("dummy"))]),
        );

        let row = insert.row();

        assert_eq!(row.get("item_id"), Some(&Cell::from("123")));
        assert_eq!(row.get("name"), Some(&Cell::from("dummy")));
    }

    #[test]
    fn insert_row_keeps_explicit_key_column() {
        let insert = InsertOperation::new(
            "item_children",
            false,
            "item_id",
            "123",
            Attributes::from([("item_id".to_string(), Cell::from(123))]),
        );

        assert_eq!(insert.row().get("item_id"), Some(&Cell::I64(123)));
    }

    #[test]
    fn operations_round_trip_through_json() {
        let operation = Operation::from(DeleteOperation::new("items", true, "item_id", "123"));

        let json = serde_json::to_string(&operation).unwrap();
        let decoded: Operation = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, operation);
        assert!(json.contains(r#""type":"delete""#));
    }
}
