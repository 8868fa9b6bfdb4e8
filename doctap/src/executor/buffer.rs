use std::slice;

use crate::types::RowOperation;

/// Row operations received since the last successful flush, in arrival order.
///
/// Only the executor removes operations, and only after they were committed. Pre-transaction
/// callbacks can append operations but never drop or reorder buffered ones.
#[derive(Debug, Clone, Default)]
pub struct OperationsBuffer {
    operations: Vec<RowOperation>,
}

impl OperationsBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `operation` to the end of the buffer.
    pub fn push(&mut self, operation: impl Into<RowOperation>) {
        self.operations.push(operation.into());
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, RowOperation> {
        self.operations.iter()
    }

    pub fn as_slice(&self) -> &[RowOperation] {
        &self.operations
    }

    pub(crate) fn clear(&mut self) {
        self.operations.clear();
    }

    /// Drops the operations appended after the first `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.operations.truncate(len);
    }
}

impl<'a> IntoIterator for &'a OperationsBuffer {
    type Item = &'a RowOperation;
    type IntoIter = slice::Iter<'a, RowOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
