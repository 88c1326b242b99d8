//! SQLite data source backed by sqlx.
//!
//! Each acquisition opens one `SqliteConnection` and each release closes it;
//! there is no pool. Query text is passed through unchanged and rows are
//! streamed lazily from `sqlx::query(..).fetch`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Row as _, Sqlite, TypeInfo, ValueRef};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DataError, Result};
use crate::query::{Query, Row, Value};
use crate::source::{DataSource, RowCursor};

/// How long a connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SqliteSource {
    options: SqliteConnectOptions,
}

/// One open SQLite connection.
#[derive(Debug)]
pub struct SqliteHandle {
    id: Uuid,
    conn: SqliteConnection,
}

impl SqliteHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl SqliteSource {
    /// Parse a `sqlite://path` URL; the database file is created if missing.
    pub fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| DataError::connection_with(format!("invalid database url '{url}'"), e))?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);
        Ok(Self { options })
    }

    pub fn from_options(options: SqliteConnectOptions) -> Self {
        Self { options }
    }
}

type BoundQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_params(query: &Query) -> Result<BoundQuery<'_>> {
    if !query.named().is_empty() {
        return Err(DataError::query(
            "named parameters are not supported by the sqlite source; use positional `?` placeholders",
        ));
    }

    let mut bound = sqlx::query(query.text());
    for value in query.positional() {
        bound = match value.clone() {
            Value::Null => bound.bind(None::<String>),
            Value::Bool(b) => bound.bind(b),
            Value::Int(n) => bound.bind(n),
            Value::Float(f) => bound.bind(f),
            Value::Text(s) => bound.bind(s),
            Value::Bytes(b) => bound.bind(b),
        };
    }
    Ok(bound)
}

/// Decode a row by the storage class of each value.
fn decode_row(row: &SqliteRow, columns: &mut Option<Arc<[String]>>) -> Result<Row> {
    let names = columns
        .get_or_insert_with(|| {
            row.columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect::<Vec<_>>()
                .into()
        })
        .clone();

    let mut values = Vec::with_capacity(names.len());
    for idx in 0..names.len() {
        let raw = row
            .try_get_raw(idx)
            .map_err(|e| DataError::query_with(format!("failed to read column {idx}"), e))?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let kind = raw.type_info().name().to_ascii_uppercase();
            let decoded = match kind.as_str() {
                "INTEGER" | "INT8" | "BIGINT" | "BOOLEAN" => {
                    row.try_get::<i64, _>(idx).map(Value::Int)
                }
                "REAL" | "NUMERIC" => row.try_get::<f64, _>(idx).map(Value::Float),
                "BLOB" => row.try_get::<Vec<u8>, _>(idx).map(Value::Bytes),
                _ => row.try_get::<String, _>(idx).map(Value::Text),
            };
            decoded.map_err(|e| {
                DataError::query_with(format!("failed to decode column '{}'", names[idx]), e)
            })?
        };
        values.push(value);
    }

    Ok(Row::new(names, values))
}

async fn run_control(handle: &mut SqliteHandle, statement: &'static str) -> Result<()> {
    sqlx::Executor::execute(&mut handle.conn, sqlx::raw_sql(statement))
        .await
        .map(|_| ())
        .map_err(|e| DataError::transaction_with(format!("{statement} failed"), e))
}

#[async_trait]
impl DataSource for SqliteSource {
    type Handle = SqliteHandle;

    async fn acquire(&self) -> Result<SqliteHandle> {
        let conn = self
            .options
            .connect()
            .await
            .map_err(|e| DataError::connection_with("failed to open sqlite connection", e))?;
        let id = Uuid::new_v4();
        debug!(%id, "opened sqlite connection");
        Ok(SqliteHandle { id, conn })
    }

    async fn release(&self, handle: SqliteHandle) -> Result<()> {
        let SqliteHandle { id, conn } = handle;
        conn.close()
            .await
            .map_err(|e| DataError::connection_with("failed to close sqlite connection", e))?;
        debug!(%id, "closed sqlite connection");
        Ok(())
    }

    async fn execute<'h>(
        &'h self,
        handle: &'h mut SqliteHandle,
        query: &'h Query,
    ) -> Result<RowCursor<'h>> {
        let bound = bind_params(query)?;
        let mut columns = None;
        let cursor = bound
            .fetch(&mut handle.conn)
            .map_err(|e| DataError::query_with("query execution failed", e))
            .and_then(move |row| futures::future::ready(decode_row(&row, &mut columns)));
        Ok(cursor.boxed())
    }

    async fn begin(&self, handle: &mut SqliteHandle) -> Result<()> {
        run_control(handle, "BEGIN").await
    }

    async fn commit(&self, handle: &mut SqliteHandle) -> Result<()> {
        run_control(handle, "COMMIT").await
    }

    async fn rollback(&self, handle: &mut SqliteHandle) -> Result<()> {
        run_control(handle, "ROLLBACK").await
    }
}
