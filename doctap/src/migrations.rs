use config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::{Executor, postgres::PgPoolOptions};
use tracing::info;

use crate::error::TapResult;

/// Runs the doctap migrations against the destination database.
///
/// The migrations and the `_sqlx_migrations` bookkeeping table live in the `doctap` schema, which
/// is created when missing.
pub async fn apply_doctap_migrations(connection_config: &PgConnectionConfig) -> TapResult<()> {
    let options = connection_config.with_db();

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("create schema if not exists doctap;").await?;
                conn.execute("set search_path = 'doctap';").await?;

                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    info!("applying doctap migrations");

    let migrator = sqlx::migrate!("./migrations");
    migrator.run(&pool).await?;

    info!("doctap migrations successfully applied");

    pool.close().await;

    Ok(())
}
