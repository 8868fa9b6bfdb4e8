//! Error types and result definitions for doctap.
//!
//! [`TapError`] carries a classification ([`ErrorKind`]), a static description, optional dynamic
//! detail, an optional source error, and the location where it was raised. Several errors can be
//! aggregated into one, which is how concurrently running tasks report their failures together.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Result type used throughout doctap.
pub type TapResult<T> = Result<T, TapError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type of doctap.
#[derive(Debug, Clone)]
pub struct TapError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Failures of several tasks, e.g. the executor and the timer of a pipeline.
    Many {
        errors: Vec<TapError>,
        location: &'static Location<'static>,
    },
}

/// Classification of doctap errors.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Queue
    QueueClosed,

    // Flush
    ApplyFailed,
    CheckpointFailed,
    CallbackFailed,

    // Storage
    DestinationConnectionFailed,
    DestinationQueryFailed,
    DestinationTableMissing,
    UniqueViolation,

    // Data
    ConversionError,

    // Configuration
    ConfigError,

    // State & workflow
    InvalidState,
    ExecutorPanic,
    ExecutorCancelled,
    TimerPanic,

    IoError,
    Unknown,
}

impl TapError {
    /// Returns the [`ErrorKind`] of this error, or of the first aggregated error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(&payload.description),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the dynamic detail, or the first one found among aggregated errors.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the kind of the innermost [`TapError`] in the source chain.
    ///
    /// Flush failures are reported as [`ErrorKind::ApplyFailed`] with the storage error as
    /// source, so this exposes e.g. [`ErrorKind::UniqueViolation`] for diagnostics.
    pub fn root_kind(&self) -> ErrorKind {
        let mut current = self;
        while let ErrorRepr::Single(ErrorPayload {
            source: Some(source),
            ..
        }) = &current.repr
        {
            match source.downcast_ref::<TapError>() {
                Some(inner) => current = inner,
                None => break,
            }
        }

        current.kind()
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches the originating error. Ignored on aggregated errors.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }

        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        TapError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for TapError {
    fn eq(&self, other: &TapError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for TapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write_indented(f, "Detail:", detail)?;
                }
                if let Some(source) = payload.source.as_ref() {
                    write_indented(f, "Caused by:", &source.to_string())?;
                }

                let backtrace = payload.backtrace.to_string();
                if !backtrace.trim().is_empty() {
                    write_indented(f, "Backtrace:", &backtrace)?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}",
                    errors.len(),
                    if errors.len() == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                )?;

                for (index, error) in errors.iter().enumerate() {
                    write_indented(f, &format!("{}.", index + 1), &error.to_string())?;
                }

                Ok(())
            }
        }
    }
}

impl error::Error for TapError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

fn write_indented(f: &mut fmt::Formatter<'_>, header: &str, body: &str) -> fmt::Result {
    write!(f, "\n  {header}")?;
    for line in body.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

impl From<(ErrorKind, &'static str)> for TapError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> TapError {
        TapError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for TapError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> TapError {
        TapError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned as is.
impl<E> From<Vec<E>> for TapError
where
    E: Into<TapError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> TapError {
        let location = Location::caller();

        let mut errors: Vec<TapError> = errors.into_iter().map(Into::into).collect();
        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        TapError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for TapError {
    #[track_caller]
    fn from(err: std::io::Error) -> TapError {
        let detail = err.to_string();
        TapError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<serde_json::Error> for TapError {
    #[track_caller]
    fn from(err: serde_json::Error) -> TapError {
        let detail = err.to_string();
        TapError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("JSON conversion failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Undefined table.
const SQLSTATE_UNDEFINED_TABLE: &str = "42P01";

/// Maps [`sqlx::Error`] to a storage [`ErrorKind`].
///
/// Constraint violations and missing tables get their own kinds, connection level problems map
/// to [`ErrorKind::DestinationConnectionFailed`] and anything else to
/// [`ErrorKind::DestinationQueryFailed`].
impl From<sqlx::Error> for TapError {
    #[track_caller]
    fn from(err: sqlx::Error) -> TapError {
        let (kind, description) = match &err {
            sqlx::Error::Database(db_err) => match db_err.kind() {
                sqlx::error::ErrorKind::UniqueViolation => {
                    (ErrorKind::UniqueViolation, "Postgres unique constraint violation")
                }
                _ if db_err.code().as_deref() == Some(SQLSTATE_UNDEFINED_TABLE) => (
                    ErrorKind::DestinationTableMissing,
                    "Postgres table does not exist",
                ),
                _ => (ErrorKind::DestinationQueryFailed, "Postgres query failed"),
            },
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => (
                ErrorKind::DestinationConnectionFailed,
                "Postgres connection failed",
            ),
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => (
                ErrorKind::DestinationConnectionFailed,
                "Postgres connection pool unavailable",
            ),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                (ErrorKind::ConversionError, "Postgres value decoding failed")
            }
            _ => (ErrorKind::DestinationQueryFailed, "Postgres operation failed"),
        };

        let detail = err.to_string();
        TapError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps a failed join of a spawned task. Panics become [`ErrorKind::ExecutorPanic`], aborted tasks
/// [`ErrorKind::ExecutorCancelled`].
impl From<tokio::task::JoinError> for TapError {
    #[track_caller]
    fn from(err: tokio::task::JoinError) -> TapError {
        let (kind, description) = if err.is_panic() {
            (ErrorKind::ExecutorPanic, "A spawned task panicked")
        } else {
            (ErrorKind::ExecutorCancelled, "A spawned task was cancelled")
        };

        let detail = err.to_string();
        TapError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<sqlx::migrate::MigrateError> for TapError {
    #[track_caller]
    fn from(err: sqlx::migrate::MigrateError) -> TapError {
        let detail = err.to_string();
        TapError::from_components(
            ErrorKind::DestinationQueryFailed,
            Cow::Borrowed("Applying doctap migrations failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
