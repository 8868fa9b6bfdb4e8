//! Periodic [`Operation::TimerFired`] signals.
//!
//! The timer is the second producer of the operations queue. It never flushes anything itself:
//! the query executor decides on each signal whether a time-based flush is due.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{Instrument, debug, info};

use crate::bail;
use crate::concurrency::queue::OperationsQueue;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, TapResult};
use crate::tap_error;
use crate::types::Operation;

/// Handle of a spawned [`Timer`].
#[derive(Debug)]
pub struct TimerHandle {
    handle: Option<JoinHandle<TapResult<()>>>,
}

impl TimerHandle {
    /// Waits for the timer task to stop.
    pub async fn wait(mut self) -> TapResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.await.map_err(|err| {
            if err.is_cancelled() {
                tap_error!(ErrorKind::TimerPanic, "Timer was cancelled", err)
            } else {
                tap_error!(ErrorKind::TimerPanic, "Timer panicked", err)
            }
        })?
    }
}

/// Enqueues [`Operation::TimerFired`] every `interval`.
///
/// The first signal is sent one interval after the timer is spawned. The timer stops when the
/// shutdown signal fires or when the queue rejects a signal because it was closed.
#[derive(Debug)]
pub struct Timer {
    interval: Duration,
    queue: OperationsQueue,
    shutdown_rx: ShutdownRx,
}

impl Timer {
    pub fn new(
        interval: Duration,
        queue: OperationsQueue,
        shutdown_rx: ShutdownRx,
    ) -> TapResult<Self> {
        if interval.is_zero() {
            bail!(
                ErrorKind::ConfigError,
                "Invalid timer interval",
                "The timer interval must be greater than zero"
            );
        }

        Ok(Self {
            interval,
            queue,
            shutdown_rx,
        })
    }

    pub fn spawn(self) -> TimerHandle {
        let timer_span = tracing::info_span!(
            "timer",
            interval_ms = self.interval.as_millis() as u64
        );

        let handle = tokio::spawn(self.run().instrument(timer_span.or_current()));

        TimerHandle {
            handle: Some(handle),
        }
    }

    async fn run(mut self) -> TapResult<()> {
        info!("starting timer");

        let mut ticks = interval_at(Instant::now() + self.interval, self.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                result = self.shutdown_rx.changed() => {
                    // A dropped sender is treated like a shutdown request.
                    if result.is_err() {
                        debug!("shutdown sender dropped");
                    }
                    info!("shutting down timer");

                    return Ok(());
                }

                _ = ticks.tick() => {
                    if let Err(err) = self.queue.add(Operation::TimerFired) {
                        if err.kind() == ErrorKind::QueueClosed {
                            info!("operations queue closed, stopping timer");

                            return Ok(());
                        }

                        return Err(err);
                    }

                    debug!("timer signal enqueued");
                }
            }
        }
    }
}
