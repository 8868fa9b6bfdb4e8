//! The consumer side of the operations queue: buffering, flush policy and atomic application.

pub mod buffer;
pub mod callback;
pub mod query;

pub use buffer::OperationsBuffer;
pub use callback::{BoxedPreTransactionCallback, PreTransactionCallback};
pub use query::QueryExecutor;
