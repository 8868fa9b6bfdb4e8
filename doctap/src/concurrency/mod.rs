//! Concurrency primitives connecting producers, the timer and the query executor.
//!
//! The [`queue`] is the only channel into the executor: the mapping layer and the [`timer`] both
//! enqueue into it, the executor is its single consumer. The [`shutdown`] channel stops background
//! tasks that are not driven by the queue.

pub mod queue;
pub mod shutdown;
pub mod timer;
