use serde::Deserialize;

use crate::shared::{ExecutorConfig, PgConnectionConfig, ValidationError};

/// Top-level configuration of a doctap process replicating one stream into Postgres.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TapConfig {
    pub executor: ExecutorConfig,
    /// Database holding the replicated tables and the checkpoint table.
    pub pg_connection: PgConnectionConfig,
    /// Whether the checkpoint table migrations run before the pipeline starts.
    #[serde(default = "default_apply_migrations")]
    pub apply_migrations: bool,
}

impl TapConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.executor.validate()?;
        self.pg_connection.validate()
    }
}

fn default_apply_migrations() -> bool {
    true
}
