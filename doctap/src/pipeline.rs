use std::sync::Arc;

use config::load_config;
use config::shared::{ExecutorConfig, TapConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, info};

use crate::bail;
use crate::concurrency::queue::OperationsQueue;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::concurrency::timer::{Timer, TimerHandle};
use crate::error::{ErrorKind, TapError, TapResult};
use crate::executor::{BoxedPreTransactionCallback, PreTransactionCallback, QueryExecutor};
use crate::metrics::Metrics;
use crate::migrations::apply_doctap_migrations;
use crate::store::Storage;
use crate::store::postgres::PostgresStorage;
use crate::tap_error;
use crate::types::Seq;

/// Join handle of the executor task. The executor is returned so its buffer can still be flushed.
type ExecutorJoinHandle<S> = JoinHandle<(QueryExecutor<S>, TapResult<()>)>;

enum PipelineState<S> {
    NotStarted {
        callbacks: Vec<BoxedPreTransactionCallback>,
    },
    Started {
        executor: ExecutorJoinHandle<S>,
        timer: TimerHandle,
        seq_rx: watch::Receiver<Seq>,
    },
}

/// Wires the operations queue, the timer and the query executor of one stream.
///
/// Producers enqueue through [`Pipeline::queue`]. After [`Pipeline::start`] the executor runs in
/// its own task until the queue is closed by [`Pipeline::shutdown`] or by a failure.
pub struct Pipeline<S> {
    config: Arc<ExecutorConfig>,
    storage: S,
    queue: OperationsQueue,
    metrics: Metrics,
    state: PipelineState<S>,
    shutdown_tx: ShutdownTx,
}

impl<S> Pipeline<S>
where
    S: Storage + Clone + Send + Sync + 'static,
{
    pub fn new(config: ExecutorConfig, storage: S) -> Self {
        // Receivers are created on demand through `subscribe`.
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            metrics: Metrics::new(config.stream_name.clone()),
            config: Arc::new(config),
            storage,
            queue: OperationsQueue::new(),
            state: PipelineState::NotStarted {
                callbacks: Vec::new(),
            },
            shutdown_tx,
        }
    }

    /// Returns a producer handle to the operations queue.
    pub fn queue(&self) -> OperationsQueue {
        self.queue.clone()
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.clone()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Registers a pre-transaction callback. Only possible before the pipeline is started.
    pub fn add_pre_transaction_callback<C>(&mut self, callback: C) -> TapResult<()>
    where
        C: PreTransactionCallback + Send + Sync + 'static,
    {
        let PipelineState::NotStarted { callbacks } = &mut self.state else {
            bail!(
                ErrorKind::InvalidState,
                "Pipeline already started",
                "Pre-transaction callbacks must be registered before the pipeline is started"
            );
        };

        callbacks.push(Box::new(callback));

        Ok(())
    }

    /// Seq of the last committed flush, `None` before the pipeline is started.
    pub fn current_seq(&self) -> Option<Seq> {
        match &self.state {
            PipelineState::NotStarted { .. } => None,
            PipelineState::Started { seq_rx, .. } => Some(*seq_rx.borrow()),
        }
    }

    /// Loads the checkpoint, then spawns the executor and the timer.
    pub async fn start(&mut self) -> TapResult<()> {
        let PipelineState::NotStarted { callbacks } = &mut self.state else {
            bail!(
                ErrorKind::InvalidState,
                "Pipeline already started",
                "A pipeline can only be started once"
            );
        };

        if let Err(err) = self.config.validate() {
            bail!(
                ErrorKind::ConfigError,
                "Invalid executor configuration",
                err.to_string()
            );
        }

        info!(
            stream_name = %self.config.stream_name,
            batch_size = self.config.batch_size,
            "starting pipeline"
        );

        let timer = Timer::new(
            self.config.timer_interval(),
            self.queue.clone(),
            self.shutdown_tx.subscribe(),
        )?;

        let mut executor = QueryExecutor::new(
            self.config.clone(),
            self.queue.clone(),
            self.storage.clone(),
            self.metrics.clone(),
        )
        .await?;
        for callback in callbacks.drain(..) {
            executor.add_boxed_pre_transaction_callback(callback);
        }
        let seq_rx = executor.subscribe_seq();

        let executor_span = tracing::info_span!(
            "query_executor",
            stream_name = %self.config.stream_name
        );
        let executor = tokio::spawn(
            async move {
                let result = executor.start().await;
                (executor, result)
            }
            .instrument(executor_span.or_current()),
        );

        let timer = timer.spawn();

        self.state = PipelineState::Started {
            executor,
            timer,
            seq_rx,
        };

        Ok(())
    }

    /// Waits for the executor and the timer to stop.
    ///
    /// With `flush_on_shutdown` set, operations still buffered after the queue ended are flushed.
    /// Failures of both tasks are reported together.
    pub async fn wait(self) -> TapResult<()> {
        let PipelineState::Started {
            executor, timer, ..
        } = self.state
        else {
            info!("pipeline was not started, nothing to wait for");

            return Ok(());
        };

        let mut errors: Vec<TapError> = vec![];

        info!("waiting for query executor to complete");

        match executor.await {
            Ok((mut executor, result)) => match result {
                Ok(()) if self.config.flush_on_shutdown => {
                    info!(
                        buffered = executor.buffered_operations().len(),
                        "flushing remaining operations on shutdown"
                    );
                    if let Err(err) = executor.flush().await {
                        errors.push(err);
                    }
                }
                Ok(()) => {}
                Err(err) => errors.push(err),
            },
            Err(err) => errors.push(err.into()),
        }

        // The timer has nothing left to signal once the executor stopped.
        self.shutdown_tx.shutdown();

        if let Err(err) = timer.wait().await {
            errors.push(err);
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        info!("pipeline stopped");

        Ok(())
    }

    /// Closes the queue and stops the timer. Already enqueued operations are still processed.
    pub fn shutdown(&self) {
        info!("shutting down the pipeline");

        self.queue.close();
        self.shutdown_tx.shutdown();
    }

    pub async fn shutdown_and_wait(self) -> TapResult<()> {
        self.shutdown();
        self.wait().await
    }
}

impl Pipeline<PostgresStorage> {
    /// Builds a pipeline replicating into the database of `config`.
    ///
    /// The configuration is validated first. With `apply_migrations` set the checkpoint table is
    /// migrated, otherwise no connection is opened before [`Pipeline::start`].
    pub async fn from_config(config: TapConfig) -> TapResult<Self> {
        if let Err(err) = config.validate() {
            bail!(
                ErrorKind::ConfigError,
                "Invalid doctap configuration",
                err.to_string()
            );
        }

        if config.apply_migrations {
            apply_doctap_migrations(&config.pg_connection).await?;
        }

        let storage = PostgresStorage::new(&config.pg_connection);

        Ok(Self::new(config.executor, storage))
    }

    /// Loads a [`TapConfig`] from the `configuration` directory and builds the pipeline with it.
    pub async fn from_configuration_files() -> TapResult<Self> {
        let config = load_config::<TapConfig>().map_err(|err| {
            tap_error!(
                ErrorKind::ConfigError,
                "Loading the doctap configuration failed",
                source: err
            )
        })?;

        Self::from_config(config).await
    }
}
