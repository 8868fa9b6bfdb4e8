//! Configuration types and loading for doctap processes.
//!
//! Values are read from `configuration/base.*`, then `configuration/{environment}.*`, then
//! `APP_`-prefixed environment variables. Each typed section exposes a `validate` method that
//! callers run after loading.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{ConfigurationSources, LoadConfigError, load_config};
