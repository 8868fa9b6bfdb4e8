use std::time::Duration;

use chrono::{DateTime, Utc};
use config::shared::{IntoConnectOptions, PgConnectionConfig};
use pg_escape::quote_identifier;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use crate::error::TapResult;
use crate::store::base::{Storage, StorageTransaction};
use crate::types::{Attributes, Cell, Checkpoint};

/// Maximum number of connections in the pool.
///
/// The executor runs one transaction at a time, the second connection serves checkpoint reads.
const MAX_POOL_CONNECTIONS: u32 = 2;

/// Duration after which idle connections are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Table holding one checkpoint row per stream, created by the doctap migrations.
const CHECKPOINTS_TABLE: &str = "doctap.stream_checkpoints";

/// Creates a lazily connected pool, no connection is opened until the first query.
fn create_database_pool(config: &PgConnectionConfig) -> PgPool {
    let options = config.with_db();

    PgPoolOptions::new()
        .min_connections(0)
        .max_connections(MAX_POOL_CONNECTIONS)
        .idle_timeout(Some(IDLE_TIMEOUT))
        .connect_lazy_with(options)
}

/// Quotes a table name, keeping an optional schema qualifier (`schema.table`) separate.
fn quote_table_name(table: &str) -> String {
    match table.split_once('.') {
        Some((schema, name)) => format!("{}.{}", quote_identifier(schema), quote_identifier(name)),
        None => quote_identifier(table).into_owned(),
    }
}

/// Builds the insert statement for `row` and returns it with the cells to bind, in placeholder
/// order. Null cells are written as literal `null` and are not bound.
fn insert_statement<'a>(table: &str, row: &'a Attributes) -> (String, Vec<&'a Cell>) {
    if row.is_empty() {
        return (
            format!("insert into {} default values", quote_table_name(table)),
            Vec::new(),
        );
    }

    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    let mut binds = Vec::with_capacity(row.len());

    for (column, cell) in row {
        columns.push(quote_identifier(column));

        if cell.is_null() {
            values.push("null".to_string());
        } else {
            binds.push(cell);
            values.push(format!("${}", binds.len()));
        }
    }

    let statement = format!(
        "insert into {} ({}) values ({})",
        quote_table_name(table),
        columns.join(", "),
        values.join(", ")
    );

    (statement, binds)
}

/// Builds the delete statement matching `column` against `value`. A null value matches with
/// `is null` and binds nothing.
fn delete_statement(table: &str, column: &str, value: &Cell) -> String {
    let predicate = if value.is_null() {
        "is null"
    } else {
        "= $1"
    };

    format!(
        "delete from {} where {} {}",
        quote_table_name(table),
        quote_identifier(column),
        predicate
    )
}

fn bind_cell<'q>(
    query: Query<'q, Postgres, PgArguments>,
    cell: &Cell,
) -> Query<'q, Postgres, PgArguments> {
    match cell {
        // Never bound, rendered as a literal by the statement builders.
        Cell::Null => query,
        Cell::Bool(value) => query.bind(*value),
        Cell::I64(value) => query.bind(*value),
        Cell::F64(value) => query.bind(*value),
        Cell::String(value) => query.bind(value.clone()),
        Cell::Timestamp(value) => query.bind(*value),
        Cell::Json(value) => query.bind(value.clone()),
    }
}

/// [`Storage`] backed by a Postgres database.
///
/// Replicated tables are expected to exist. The checkpoint table is created by
/// [`crate::migrations::apply_doctap_migrations`].
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(config: &PgConnectionConfig) -> Self {
        Self {
            pool: create_database_pool(config),
        }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Storage for PostgresStorage {
    type Transaction = PostgresTransaction;

    async fn begin(&self) -> TapResult<PostgresTransaction> {
        let tx = self.pool.begin().await?;

        Ok(PostgresTransaction { tx })
    }

    async fn load_checkpoint(&self, stream_name: &str) -> TapResult<Checkpoint> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query(&format!(
            "insert into {CHECKPOINTS_TABLE} (name) values ($1) on conflict (name) do nothing"
        ))
        .bind(stream_name)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if created > 0 {
            debug!(stream_name, "creating initial checkpoint");
        }

        let (seq, last_transaction_at): (i64, Option<DateTime<Utc>>) = sqlx::query_as(&format!(
            "select seq, last_transaction_at from {CHECKPOINTS_TABLE} where name = $1"
        ))
        .bind(stream_name)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Checkpoint {
            stream_name: stream_name.to_string(),
            seq,
            last_transaction_at,
        })
    }
}

/// Transaction of a [`PostgresStorage`]. Rolled back by the driver when dropped uncommitted.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl StorageTransaction for PostgresTransaction {
    async fn insert_row(&mut self, table: &str, row: &Attributes) -> TapResult<()> {
        let (statement, binds) = insert_statement(table, row);

        let mut query = sqlx::query(&statement);
        for cell in binds {
            query = bind_cell(query, cell);
        }
        query.execute(&mut *self.tx).await?;

        Ok(())
    }

    async fn delete_rows(&mut self, table: &str, column: &str, value: &Cell) -> TapResult<u64> {
        let statement = delete_statement(table, column, value);

        let query = bind_cell(sqlx::query(&statement), value);
        let result = query.execute(&mut *self.tx).await?;

        Ok(result.rows_affected())
    }

    async fn store_checkpoint(&mut self, checkpoint: &Checkpoint) -> TapResult<()> {
        sqlx::query(&format!(
            r#"
            insert into {CHECKPOINTS_TABLE} (name, seq, last_transaction_at)
            values ($1, $2, $3)
            on conflict (name) do update
            set seq = excluded.seq, last_transaction_at = excluded.last_transaction_at
            "#
        ))
        .bind(&checkpoint.stream_name)
        .bind(checkpoint.seq)
        .bind(checkpoint.last_transaction_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self) -> TapResult<()> {
        self.tx.commit().await?;

        Ok(())
    }

    async fn rollback(self) -> TapResult<()> {
        self.tx.rollback().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_renders_nulls_as_literals() {
        let row = Attributes::from([
            ("item_id".to_string(), Cell::from("10")),
            ("amount".to_string(), Cell::from(600)),
            ("note".to_string(), Cell::Null),
        ]);

        let (statement, binds) = insert_statement("items", &row);

        assert_eq!(
            statement,
            r#"insert into items (amount, item_id, note) values ($1, $2, null)"#
        );
        assert_eq!(binds, vec![&Cell::I64(600), &Cell::from("10")]);
    }

    #[test]
    fn insert_quotes_identifiers_and_schema() {
        let row = Attributes::from([("Order Id".to_string(), Cell::from(1))]);

        let (statement, _) = insert_statement("sales.Orders", &row);

        assert_eq!(
            statement,
            r#"insert into sales."Orders" ("Order Id") values ($1)"#
        );
    }

    #[test]
    fn empty_row_uses_default_values() {
        let attributes = Attributes::new();
        let (statement, binds) = insert_statement("items", &attributes);

        assert_eq!(statement, "insert into items default values");
        assert!(binds.is_empty());
    }

    #[test]
    fn delete_matches_null_with_is_null() {
        assert_eq!(
            delete_statement("items", "item_id", &Cell::from("1")),
            "delete from items where item_id = $1"
        );
        assert_eq!(
            delete_statement("items", "item_id", &Cell::Null),
            "delete from items where item_id is null"
        );
    }
}
