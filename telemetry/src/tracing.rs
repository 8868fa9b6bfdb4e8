use std::sync::Once;

use config::Environment;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable that turns on log output in tests.
const ENABLE_TEST_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

static INIT_TEST_TRACING: Once = Once::new();

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] std::io::Error),

    #[error("failed to install the tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Keeps the non-blocking writer alive. Buffered lines are flushed when it is dropped.
#[must_use = "dropping the flusher stops log output"]
#[derive(Debug)]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

/// Installs the global subscriber for `app_name`, picking the format from `APP_ENVIRONMENT`.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    let environment = Environment::load()?;

    init_tracing_for(app_name, environment)
}

/// Installs the global subscriber for `app_name` in the given environment.
///
/// `RUST_LOG` takes precedence over the default `info` filter. Production output is JSON with
/// the current span attached; development output is human readable. Records emitted through
/// the `log` crate are forwarded as tracing events.
pub fn init_tracing_for(
    app_name: &str,
    environment: Environment,
) -> Result<LogFlusher, TracingError> {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(app_name)));

    let registry = tracing_subscriber::registry().with(filter);
    match environment {
        Environment::Prod => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(writer),
            )
            .try_init()?,
        Environment::Dev => registry.with(fmt::layer().with_writer(writer)).try_init()?,
    }

    Ok(LogFlusher { _guard: guard })
}

/// Installs a test writer subscriber once per process when `ENABLE_TRACING` is set.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var(ENABLE_TEST_TRACING_ENV_NAME).is_err() {
            return;
        }

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        // Another test harness may already own the global subscriber.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

fn default_directives(app_name: &str) -> String {
    format!("{}=info,doctap=info", app_name.replace('-', "_"))
}
