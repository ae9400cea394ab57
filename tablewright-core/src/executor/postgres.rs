//! PostgreSQL executor backed by a sqlx pool.

use super::{ExecResult, Executor, Row, translate};
use crate::{
    Result,
    config::ConnectionConfig,
    error::TablewrightError,
    record::Value,
};
use async_trait::async_trait;
use sqlx::{
    Column, Executor as _, PgPool, Row as _, TypeInfo, ValueRef,
    postgres::{PgArguments, PgRow},
    query::Query,
};

/// Executor for PostgreSQL databases.
#[derive(Debug, Clone)]
pub struct PostgresExecutor {
    pool: PgPool,
}

impl PostgresExecutor {
    /// Connects with the default [`ConnectionConfig`].
    ///
    /// # Errors
    /// Returns a connection error (URL redacted) if the pool cannot connect.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, &ConnectionConfig::default()).await
    }

    /// Connects with explicit pool settings.
    ///
    /// # Errors
    /// Returns a connection error (URL redacted) if the pool cannot connect.
    pub async fn connect_with(url: &str, config: &ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let statement_timeout = config.statement_timeout;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if let Some(timeout) = statement_timeout {
                        let sql = format!("SET statement_timeout = {}", timeout.as_millis());
                        conn.execute(sql.as_str()).await?;
                    }
                    Ok(())
                })
            })
            .connect(url)
            .await
            .map_err(|e| TablewrightError::connection_failed(url, e))?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Closes the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_all<'q>(
    mut query: Query<'q, sqlx::Postgres, PgArguments>,
    args: &'q [Value],
) -> Query<'q, sqlx::Postgres, PgArguments> {
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

fn decode_row(row: &PgRow, sql: &str) -> Result<Row> {
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

fn decode_value(row: &PgRow, index: usize, type_name: &str) -> sqlx::Result<Value> {
    Ok(match type_name {
        "BOOL" => Value::Bool(row.try_get(index)?),
        "INT2" => Value::Int(i64::from(row.try_get::<i16, _>(index)?)),
        "INT4" => Value::Int(i64::from(row.try_get::<i32, _>(index)?)),
        "INT8" => Value::Int(row.try_get(index)?),
        "FLOAT4" => Value::Float(f64::from(row.try_get::<f32, _>(index)?)),
        "FLOAT8" => Value::Float(row.try_get(index)?),
        "TIMESTAMPTZ" => Value::Timestamp(row.try_get(index)?),
        "TIMESTAMP" => Value::Timestamp(row.try_get::<chrono::NaiveDateTime, _>(index)?.and_utc()),
        "BYTEA" => Value::Bytes(row.try_get(index)?),
        "JSON" | "JSONB" => Value::Json(row.try_get(index)?),
        _ => Value::Text(row.try_get_unchecked(index)?),
    })
}

#[async_trait]
impl Executor for PostgresExecutor {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult> {
        let result = bind_all(sqlx::query(sql), args)
            .execute(&self.pool)
            .await
            .map_err(|e| translate(e, sql))?;
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        })
    }

    async fn insert(&self, sql: &str, args: &[Value]) -> Result<ExecResult> {
        if !has_returning(sql) {
            return self.execute(sql, args).await;
        }
        // Generated keys come back through the statement's RETURNING clause.
        let row = bind_all(sqlx::query(sql), args)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| translate(e, sql))?;
        let row = row.map(|row| decode_row(&row, sql)).transpose()?;
        Ok(returning_result(row.as_ref()))
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        let rows = bind_all(sqlx::query(sql), args)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| translate(e, sql))?;
        rows.iter().map(|row| decode_row(row, sql)).collect()
    }
}

fn has_returning(sql: &str) -> bool {
    sql.to_ascii_uppercase().contains(" RETURNING ")
}

/// No returned row means nothing was written, e.g. `ON CONFLICT DO NOTHING`.
fn returning_result(row: Option<&Row>) -> ExecResult {
    match row {
        Some(row) => ExecResult {
            rows_affected: 1,
            last_insert_id: match row.first() {
                Some(Value::Int(id)) => Some(*id),
                _ => None,
            },
        },
        None => ExecResult {
            rows_affected: 0,
            last_insert_id: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_returning() {
        assert!(has_returning("INSERT INTO \"t\" (\"a\") VALUES ($1) RETURNING \"id\""));
        assert!(!has_returning("INSERT INTO \"t\" (\"a\") VALUES ($1)"));
    }

    #[test]
    fn test_returning_result_counts_rows() {
        let row = Row::new(vec![("id".to_string(), Value::Int(7))]);
        let result = returning_result(Some(&row));
        assert_eq!(result.rows_affected, 1);
        assert_eq!(result.last_insert_id, Some(7));

        let result = returning_result(None);
        assert_eq!(result.rows_affected, 0);
        assert_eq!(result.last_insert_id, None);
    }
}
