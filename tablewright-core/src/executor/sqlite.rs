//! SQLite executor backed by a sqlx pool.
//!
//! # Connection Modes
//! - File-based: `sqlite:///path/to/database.db` or a bare `*.db` path
//! - In-memory: `sqlite::memory:` or `:memory:`
//!
//! In-memory databases are private to a connection, so their pool is capped
//! at a single connection.

use super::{ExecResult, Executor, Row, translate};
use crate::{Result, config::ConnectionConfig, error::TablewrightError, record::Value};
use async_trait::async_trait;
use sqlx::{
    Column, Row as _, SqlitePool, TypeInfo, ValueRef,
    query::Query,
    sqlite::{SqliteArguments, SqliteConnectOptions, SqliteRow},
};
use std::str::FromStr;

/// Executor for SQLite databases.
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    pool: SqlitePool,
}

impl SqliteExecutor {
    /// Connects with the default [`ConnectionConfig`].
    ///
    /// # Errors
    /// Returns a configuration error for malformed URLs and a connection
    /// error if the database cannot be opened.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, &ConnectionConfig::default()).await
    }

    /// Connects with explicit pool settings.
    ///
    /// # Errors
    /// Returns a configuration error for malformed URLs and a connection
    /// error if the database cannot be opened.
    pub async fn connect_with(url: &str, config: &ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let normalized = normalize_connection_string(url);
        let options = SqliteConnectOptions::from_str(&normalized)
            .map_err(|e| {
                TablewrightError::configuration(format!("Invalid SQLite connection string: {e}"))
            })?
            .create_if_missing(true);

        let max_connections = if is_in_memory(&normalized) {
            1
        } else {
            config.max_connections
        };

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| TablewrightError::connection_failed(url, e))?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Closes the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn normalize_connection_string(url: &str) -> String {
    if url == ":memory:" {
        "sqlite::memory:".to_string()
    } else if url.starts_with("sqlite:") {
        url.to_string()
    } else {
        format!("sqlite://{url}")
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn bind_all<'q>(
    mut query: Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
    args: &'q [Value],
) -> Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
    for arg in args {
        query = match arg {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.as_str()),
            Value::Timestamp(ts) => query.bind(*ts),
            Value::Bytes(b) => query.bind(b.as_slice()),
            Value::Json(json) => query.bind(json.to_string()),
        };
    }
    query
}

fn decode_row(row: &SqliteRow, sql: &str) -> Result<Row> {
    let mut columns = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index).map_err(|e| translate(e, sql))?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            // Storage class of the value itself; declared types are advisory.
            let type_name = raw.type_info().name().to_ascii_uppercase();
            decode_value(row, index, &type_name).map_err(|e| translate(e, sql))?
        };
        columns.push((column.name().to_string(), value));
    }
    Ok(Row::new(columns))
}

fn decode_value(row: &SqliteRow, index: usize, type_name: &str) -> sqlx::Result<Value> {
    Ok(match type_name {
        "INTEGER" | "INT8" | "BIGINT" | "BOOLEAN" => Value::Int(row.try_get_unchecked(index)?),
        "REAL" | "NUMERIC" => Value::Float(row.try_get_unchecked(index)?),
        "BLOB" => Value::Bytes(row.try_get_unchecked(index)?),
        _ => Value::Text(row.try_get_unchecked(index)?),
    })
}

#[async_trait]
impl Executor for SqliteExecutor {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult> {
        let result = bind_all(sqlx::query(sql), args)
            .execute(&self.pool)
            .await
            .map_err(|e| translate(e, sql))?;
        let id = result.last_insert_rowid();
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: (id != 0).then_some(id),
        })
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        let rows = bind_all(sqlx::query(sql), args)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| translate(e, sql))?;
        rows.iter().map(|row| decode_row(row, sql)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_connection_string() {
        assert_eq!(normalize_connection_string(":memory:"), "sqlite::memory:");
        assert_eq!(normalize_connection_string("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(normalize_connection_string("/tmp/app.db"), "sqlite:///tmp/app.db");
        assert!(is_in_memory("sqlite::memory:"));
        assert!(!is_in_memory("sqlite:///tmp/app.db"));
    }

    #[tokio::test]
    async fn test_sqlite_execute_and_query() {
        let db = SqliteExecutor::connect("sqlite::memory:").await.unwrap();
        db.execute(
            "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, score REAL)",
            &[],
        )
        .await
        .unwrap();

        let result = db
            .insert(
                "INSERT INTO t (name, score) VALUES (?, ?)",
                &[Value::from("ada"), Value::Float(1.5)],
            )
            .await
            .unwrap();
        assert_eq!(result.last_insert_id, Some(1));

        let rows = db
            .query("SELECT id, name, score FROM t WHERE id = ?", &[Value::Int(1)])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::Text("ada".into())));
        assert_eq!(rows[0].get("score"), Some(&Value::Float(1.5)));
    }

    #[tokio::test]
    async fn test_sqlite_error_classification() {
        let db = SqliteExecutor::connect("sqlite::memory:").await.unwrap();
        let err = db.query("SELECT * FROM missing", &[]).await.unwrap_err();
        assert_eq!(
            err.query_kind(),
            Some(crate::error::QueryErrorKind::MissingTable)
        );
    }
}
