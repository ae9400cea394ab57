//! MySQL/MariaDB executor backed by a sqlx pool.

use super::{ExecResult, Executor, Row, translate};
use crate::{Result, config::ConnectionConfig, error::TablewrightError, record::Value};
use async_trait::async_trait;
use sqlx::{
    Column, MySqlPool, Row as _, TypeInfo, ValueRef,
    mysql::{MySqlArguments, MySqlRow},
    query::Query,
};

/// Executor for MySQL and MariaDB databases.
#[derive(Debug, Clone)]
pub struct MySqlExecutor {
    pool: MySqlPool,
}

impl MySqlExecutor {
    /// Connects with the default [`ConnectionConfig`].
    ///
    /// # Errors
    /// Returns a connection error (URL redacted) if the pool cannot connect.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, &ConnectionConfig::default()).await
    }

    /// Connects with explicit pool settings.
    ///
    /// `mariadb://` URLs are accepted and rewritten to the `mysql://` scheme.
    ///
    /// # Errors
    /// Returns a connection error (URL redacted) if the pool cannot connect.
    pub async fn connect_with(url: &str, config: &ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let normalized = url
            .strip_prefix("mariadb://")
            .map_or_else(|| url.to_string(), |rest| format!("mysql://{rest}"));
        let pool = sqlx::mysql::MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect(&normalized)
            .await
            .map_err(|e| TablewrightError::connection_failed(url, e))?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Closes the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_all<'q>(
    mut query: Query<'q, sqlx::MySql, MySqlArguments>,
    args: &'q [Value],
) -> Query<'q, sqlx::MySql, MySqlArguments> {
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

fn decode_row(row: &MySqlRow, sql: &str) -> Result<Row> {
    let mut columns = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index).map_err(|e| translate(e, sql))?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            decode_value(row, index, &type_name).map_err(|e| translate(e, sql))?
        };
        columns.push((column.name().to_string(), value));
    }
    Ok(Row::new(columns))
}

fn decode_value(row: &MySqlRow, index: usize, type_name: &str) -> sqlx::Result<Value> {
    Ok(match type_name {
        "BOOLEAN" => Value::Bool(row.try_get(index)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            Value::Int(row.try_get_unchecked(index)?)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => {
            let wide: u64 = row.try_get_unchecked(index)?;
            Value::Int(i64::try_from(wide).unwrap_or(i64::MAX))
        }
        "FLOAT" => Value::Float(f64::from(row.try_get::<f32, _>(index)?)),
        "DOUBLE" => Value::Float(row.try_get(index)?),
        "DATETIME" | "TIMESTAMP" => Value::Timestamp(row.try_get_unchecked(index)?),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
            Value::Bytes(row.try_get(index)?)
        }
        "JSON" => Value::Json(row.try_get(index)?),
        _ => Value::Text(row.try_get_unchecked(index)?),
    })
}

#[async_trait]
impl Executor for MySqlExecutor {
    fn backend(&self) -> &'static str {
        "mysql"
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult> {
        let result = bind_all(sqlx::query(sql), args)
            .execute(&self.pool)
            .await
            .map_err(|e| translate(e, sql))?;
        let id = result.last_insert_id();
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: (id != 0).then(|| i64::try_from(id).unwrap_or(i64::MAX)),
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
