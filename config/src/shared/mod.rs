//! Shared configuration sections.

mod base;
mod connection;
mod executor;
mod tap;

pub use base::ValidationError;
pub use connection::{IntoConnectOptions, PgConnectionConfig, TlsConfig};
pub use executor::ExecutorConfig;
pub use tap::TapConfig;
