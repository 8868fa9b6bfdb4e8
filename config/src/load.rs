use std::io;
use std::path::{Path, PathBuf};

use rust_cli_config::{Config, File};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory holding the configuration files, relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

const BASE_FILE_STEM: &str = "base";

/// Prefix of environment variable overrides, e.g. `APP_EXECUTOR__BATCH_SIZE`.
const ENV_PREFIX: &str = "APP";

/// Separator between nested keys in environment variable overrides.
const ENV_SEPARATOR: &str = "__";

/// Errors raised while assembling a configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingDirectory(PathBuf),

    #[error("no `{stem}` configuration file in `{directory}`, accepted extensions: yaml, yml, json")]
    MissingFile { directory: PathBuf, stem: String },

    #[error("configuration file `{path}` is invalid: {source}")]
    InvalidFile {
        path: PathBuf,
        #[source]
        source: rust_cli_config::ConfigError,
    },

    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] rust_cli_config::ConfigError),
}

/// The layered sources of a process configuration.
///
/// `base.*` is read first, `{environment}.*` overrides it and `APP_`-prefixed environment variables
/// override both.
#[derive(Debug, Clone)]
pub struct ConfigurationSources {
    directory: PathBuf,
    environment: Environment,
}

impl ConfigurationSources {
    pub fn new(directory: impl Into<PathBuf>, environment: Environment) -> Self {
        Self {
            directory: directory.into(),
            environment,
        }
    }

    /// Sources in `./configuration`, for the environment named by `APP_ENVIRONMENT`.
    pub fn from_current_dir() -> Result<Self, LoadConfigError> {
        let current_dir = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
        let environment = Environment::load().map_err(LoadConfigError::Environment)?;

        Ok(Self::new(current_dir.join(CONFIGURATION_DIR), environment))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Merges all sources and deserializes them into `T`.
    pub fn load<T>(&self) -> Result<T, LoadConfigError>
    where
        T: DeserializeOwned,
    {
        if !self.directory.is_dir() {
            return Err(LoadConfigError::MissingDirectory(self.directory.clone()));
        }

        let base_file = self.checked_file(BASE_FILE_STEM)?;
        let environment_file = self.checked_file(self.environment.as_str())?;

        let overrides = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator(ENV_SEPARATOR)
            .try_parsing(true);

        Config::builder()
            .add_source(File::from(base_file))
            .add_source(File::from(environment_file))
            .add_source(overrides)
            .build()
            .and_then(|settings| settings.try_deserialize::<T>())
            .map_err(LoadConfigError::Deserialization)
    }

    /// Locates the file named `stem` and makes sure it parses on its own, so a syntax error is
    /// reported with its path.
    fn checked_file(&self, stem: &str) -> Result<PathBuf, LoadConfigError> {
        let path = CONFIG_FILE_EXTENSIONS
            .iter()
            .map(|extension| self.directory.join(format!("{stem}.{extension}")))
            .find(|path| path.is_file())
            .ok_or_else(|| LoadConfigError::MissingFile {
                directory: self.directory.clone(),
                stem: stem.to_string(),
            })?;

        Config::builder()
            .add_source(File::from(path.clone()))
            .build()
            .map_err(|source| LoadConfigError::InvalidFile {
                path: path.clone(),
                source,
            })?;

        Ok(path)
    }
}

/// Loads `T` from `./configuration` using the environment named by `APP_ENVIRONMENT`.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    ConfigurationSources::from_current_dir()?.load()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::shared::TapConfig;

    fn scratch_directory() -> PathBuf {
        let directory =
            std::env::temp_dir().join(format!("doctap-config-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&directory).unwrap();
        directory
    }

    const BASE_YAML: &str = "\
executor:
  stream_name: items
  batch_size: 10
pg_connection:
  host: localhost
  port: 5432
  name: warehouse
  username: tap
";

    #[test]
    fn environment_file_overrides_base_file() {
        let directory = scratch_directory();
        fs::write(directory.join("base.yaml"), BASE_YAML).unwrap();
        fs::write(directory.join("dev.yml"), "executor:\n  batch_size: 250\n").unwrap();

        let config: TapConfig = ConfigurationSources::new(&directory, Environment::Dev)
            .load()
            .unwrap();

        assert_eq!(config.executor.stream_name, "items");
        assert_eq!(config.executor.batch_size, 250);
        assert_eq!(config.pg_connection.name, "warehouse");

        fs::remove_dir_all(directory).unwrap();
    }

    #[test]
    fn missing_environment_file_is_reported() {
        let directory = scratch_directory();
        fs::write(directory.join("base.yaml"), BASE_YAML).unwrap();

        let err = ConfigurationSources::new(&directory, Environment::Prod)
            .load::<TapConfig>()
            .unwrap_err();

        assert!(matches!(err, LoadConfigError::MissingFile { stem, .. } if stem == "prod"));

        fs::remove_dir_all(directory).unwrap();
    }

    #[test]
    fn broken_file_is_reported_by_path() {
        let directory = scratch_directory();
        fs::write(directory.join("base.json"), "{\"executor\": ").unwrap();
        fs::write(directory.join("dev.json"), "{}").unwrap();

        let err = ConfigurationSources::new(&directory, Environment::Dev)
            .load::<TapConfig>()
            .unwrap_err();

        assert!(
            matches!(err, LoadConfigError::InvalidFile { path, .. } if path.ends_with("base.json"))
        );

        fs::remove_dir_all(directory).unwrap();
    }

    #[test]
    fn missing_directory_is_reported() {
        let directory = std::env::temp_dir().join("doctap-config-does-not-exist");

        let err = ConfigurationSources::new(directory, Environment::Dev)
            .load::<TapConfig>()
            .unwrap_err();

        assert!(matches!(err, LoadConfigError::MissingDirectory(_)));
    }
}
