use config::shared::{IntoConnectOptions, PgConnectionConfig, TlsConfig};
use sqlx::{Connection, Executor, PgConnection, PgPool};
use uuid::Uuid;

use crate::migrations::apply_doctap_migrations;
use crate::store::postgres::PostgresStorage;

/// Connection settings for a uniquely named database on the test server.
///
/// The server is read from `TESTS_DATABASE_HOST`, `TESTS_DATABASE_PORT`,
/// `TESTS_DATABASE_USERNAME` and the optional `TESTS_DATABASE_PASSWORD`.
///
/// # Panics
///
/// Panics if a required variable is missing or the port is not a number.
pub fn test_pg_connection_config() -> PgConnectionConfig {
    PgConnectionConfig {
        host: std::env::var("TESTS_DATABASE_HOST").expect("TESTS_DATABASE_HOST must be set"),
        port: std::env::var("TESTS_DATABASE_PORT")
            .expect("TESTS_DATABASE_PORT must be set")
            .parse()
            .expect("TESTS_DATABASE_PORT must be a valid port number"),
        name: Uuid::new_v4().to_string(),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .expect("TESTS_DATABASE_USERNAME must be set"),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(Into::into),
        tls: TlsConfig::default(),
    }
}

/// A database created for a single test, with the doctap migrations applied.
///
/// Call [`TestDatabase::drop_database`] at the end of the test to remove it.
pub struct TestDatabase {
    config: PgConnectionConfig,
    pool: PgPool,
}

impl TestDatabase {
    /// Creates a fresh database and migrates the checkpoint table into it.
    ///
    /// # Panics
    ///
    /// Panics if the server is unreachable or the database cannot be created.
    pub async fn spawn() -> Self {
        let config = test_pg_connection_config();

        let mut connection = PgConnection::connect_with(&config.without_db())
            .await
            .expect("Failed to connect to Postgres");
        connection
            .execute(&*format!(r#"create database "{}";"#, config.name))
            .await
            .expect("Failed to create database");

        apply_doctap_migrations(&config)
            .await
            .expect("Failed to apply doctap migrations");

        let pool = PgPool::connect_with(config.with_db())
            .await
            .expect("Failed to connect to the test database");

        Self { config, pool }
    }

    pub fn config(&self) -> &PgConnectionConfig {
        &self.config
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Returns a storage sharing the pool of this database.
    pub fn storage(&self) -> PostgresStorage {
        PostgresStorage::from_pool(self.pool.clone())
    }

    /// Runs `statement`, typically to create the replicated tables of a test.
    ///
    /// # Panics
    ///
    /// Panics if the statement fails.
    pub async fn execute(&self, statement: &str) {
        sqlx::query(statement)
            .execute(&self.pool)
            .await
            .expect("Failed to execute test statement");
    }

    /// Closes the pool and drops the database, terminating leftover connections.
    ///
    /// Failures are printed and ignored so cleanup never fails a test.
    pub async fn drop_database(self) {
        self.pool.close().await;

        let mut connection = match PgConnection::connect_with(&self.config.without_db()).await {
            Ok(connection) => connection,
            Err(err) => {
                eprintln!("warning: failed to connect to Postgres for cleanup: {err}");
                return;
            }
        };

        if let Err(err) = connection
            .execute(&*format!(
                r#"drop database if exists "{}" with (force);"#,
                self.config.name
            ))
            .await
        {
            eprintln!(
                "warning: failed to drop database {}: {err}",
                self.config.name
            );
        }
    }
}
