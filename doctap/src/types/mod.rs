//! Value types flowing from the mapping layer through the executor into storage.

mod cell;
mod checkpoint;
mod operation;

pub use cell::{Attributes, Cell};
pub use checkpoint::{Checkpoint, Seq};
pub use operation::{
    DeleteOperation, EndTransactionOperation, InsertOperation, Operation, RowOperation,
};
