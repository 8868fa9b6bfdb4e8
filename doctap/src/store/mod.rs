//! Storage backends for replicated rows and stream checkpoints.

mod base;
pub mod memory;
pub mod postgres;

pub use base::{Storage, StorageTransaction};
