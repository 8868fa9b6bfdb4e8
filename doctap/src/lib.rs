//! Checkpointed replication of document changes into relational tables.
//!
//! A mapping layer turns every document change into a span of [`types::Operation`]s and enqueues
//! it on the [`concurrency::queue::OperationsQueue`]. The [`executor::QueryExecutor`] consumes the
//! queue, buffers row operations and applies them in batches. Each batch is written to a
//! [`store::Storage`] together with the stream [`types::Checkpoint`] in one transaction, so after a
//! restart the change feed resumes exactly after the last committed batch.
//!
//! [`pipeline::Pipeline`] wires the queue, the flush timer and the executor for embedding
//! processes.

mod macros;

pub mod concurrency;
pub mod error;
pub mod executor;
pub mod failpoints;
pub mod metrics;
pub mod migrations;
pub mod pipeline;
pub mod store;
#[cfg(feature = "test-utils")]
pub mod test_utils;
pub mod types;
