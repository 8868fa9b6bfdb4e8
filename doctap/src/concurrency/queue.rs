use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::bail;
use crate::error::{ErrorKind, TapResult};
use crate::types::Operation;

#[derive(Debug, Default)]
struct QueueState {
    operations: VecDeque<Operation>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// Unbounded FIFO of [`Operation`]s between any number of producers and a single consumer.
///
/// Cloning returns a new handle to the same queue. After [`OperationsQueue::close`] producers get
/// [`ErrorKind::QueueClosed`], while operations already enqueued stay deliverable until
/// [`OperationsQueue::next`] has drained them.
#[derive(Debug, Clone, Default)]
pub struct OperationsQueue {
    inner: Arc<Inner>,
}

impl OperationsQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `operation` to the tail of the queue.
    pub fn add(&self, operation: Operation) -> TapResult<()> {
        {
            let mut state = self.lock();
            if state.closed {
                bail!(
                    ErrorKind::QueueClosed,
                    "Operations queue is closed",
                    "Cannot enqueue an operation after the queue was closed"
                );
            }

            state.operations.push_back(operation);
        }

        self.inner.notify.notify_one();

        Ok(())
    }

    /// Appends all `operations` contiguously, so they are never interleaved with operations of
    /// another producer. Nothing is enqueued if the queue is closed.
    pub fn add_all<I>(&self, operations: I) -> TapResult<()>
    where
        I: IntoIterator<Item = Operation>,
    {
        {
            let mut state = self.lock();
            if state.closed {
                bail!(
                    ErrorKind::QueueClosed,
                    "Operations queue is closed",
                    "Cannot enqueue operations after the queue was closed"
                );
            }

            state.operations.extend(operations);
        }

        self.inner.notify.notify_one();

        Ok(())
    }

    /// Waits for the next operation.
    ///
    /// Returns `None` once the queue is closed and every enqueued operation was handed out. Only a
    /// single task is expected to consume the queue.
    pub async fn next(&self) -> Option<Operation> {
        loop {
            // Registered before checking the state so a notification sent in between is not lost.
            let notified = self.inner.notify.notified();

            {
                let mut state = self.lock();
                if let Some(operation) = state.operations.pop_front() {
                    return Some(operation);
                }

                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Closes the queue. Calling it more than once has no further effect.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }

            state.closed = true;
        }

        self.inner.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().operations.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // The state stays consistent even if a holder panicked, every update is a single call.
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::{DeleteOperation, Seq};

    fn delete(key: &str) -> Operation {
        DeleteOperation::new("items", false, "item_id", key).into()
    }

    fn end(seq: Seq) -> Operation {
        Operation::end_transaction(seq)
    }

    #[tokio::test]
    async fn operations_are_delivered_in_fifo_order() {
        let queue = OperationsQueue::new();
        queue.add(Operation::BeginTransaction).unwrap();
        queue.add(delete("1")).unwrap();
        queue.add(end(1)).unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.next().await, Some(Operation::BeginTransaction));
        assert_eq!(queue.next().await, Some(delete("1")));
        assert_eq!(queue.next().await, Some(end(1)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn close_drains_remaining_operations() {
        let queue = OperationsQueue::new();
        queue.add(end(1)).unwrap();
        queue.close();
        queue.close();

        assert!(queue.is_closed());
        assert_eq!(queue.next().await, Some(end(1)));
        assert_eq!(queue.next().await, None);
        assert_eq!(queue.next().await, None);
    }

    #[tokio::test]
    async fn add_after_close_fails() {
        let queue = OperationsQueue::new();
        queue.close();

        let err = queue.add(Operation::TimerFired).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueueClosed);

        let err = queue.add_all(vec![end(1), end(2)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueueClosed);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn next_waits_for_a_producer() {
        let queue = OperationsQueue::new();

        let consumer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.next().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.add(end(7)).unwrap();

        assert_eq!(consumer.await.unwrap(), Some(end(7)));
    }

    #[tokio::test]
    async fn close_wakes_a_waiting_consumer() {
        let queue = OperationsQueue::new();

        let consumer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.next().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        assert_eq!(consumer.await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn add_all_is_not_interleaved_with_other_producers() {
        let queue = OperationsQueue::new();

        let producers: Vec<_> = (0..8)
            .map(|producer| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for document in 0..50 {
                        let seq = producer * 1000 + document;
                        queue
                            .add_all(vec![
                                Operation::BeginTransaction,
                                delete(&seq.to_string()),
                                end(seq),
                            ])
                            .unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }
        queue.close();

        let mut received = Vec::new();
        while let Some(operation) = queue.next().await {
            received.push(operation);
        }

        assert_eq!(received.len(), 8 * 50 * 3);
        for span in received.chunks(3) {
            let Operation::EndTransaction(end) = &span[2] else {
                panic!("expected a transaction end, got {:?}", span[2]);
            };
            assert_eq!(span[0], Operation::BeginTransaction);
            assert_eq!(span[1], delete(&end.seq.to_string()));
        }
    }
}
