//! Database execution capability and sqlx-backed implementations.
//!
//! The rest of the crate talks to the database only through [`Executor`]:
//! execute a statement, insert a row and read back the generated key, or
//! run a query into [`Row`]s. Connection pooling belongs to the sqlx pool
//! owned by each implementation.
//!
//! # Module Structure
//! - `postgres`, `mysql`, `sqlite`: feature-gated sqlx executors
//! - [`connect`]: factory that detects the backend from the URL scheme

use crate::{
    Result,
    error::{QueryErrorKind, TablewrightError},
    record::Value,
};
use async_trait::async_trait;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgresql")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Outcome of a mutating statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Rows inserted, updated or deleted
    pub rows_affected: u64,
    /// Key assigned by the database on insert, when one was generated
    pub last_insert_id: Option<i64>,
}

/// One result row with columns in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    /// Creates a row from `(column, value)` pairs.
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    /// Value of a column, matched case-insensitively.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    /// Consumes the row, returning the value of a column.
    pub fn take(&mut self, column: &str) -> Option<Value> {
        let index = self
            .columns
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case(column))?;
        Some(self.columns.swap_remove(index).1)
    }

    /// Text value of a column; `None` for null or absent columns.
    pub fn text(&self, column: &str) -> Option<String> {
        match self.get(column)? {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            other => Some(format!("{other:?}")),
        }
    }

    /// Truthiness of a column holding a bool, a number or YES/NO text.
    pub fn flag(&self, column: &str) -> bool {
        match self.get(column) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Int(i)) => *i != 0,
            Some(Value::Text(s)) => {
                matches!(s.to_ascii_uppercase().as_str(), "YES" | "Y" | "TRUE" | "1")
            }
            _ => false,
        }
    }

    /// Integer value of a column, zero when absent or not numeric.
    pub fn int(&self, column: &str) -> i64 {
        match self.get(column) {
            Some(Value::Int(i)) => *i,
            Some(Value::Bool(b)) => i64::from(*b),
            Some(Value::Text(s)) => s.parse().unwrap_or_default(),
            _ => 0,
        }
    }

    /// Value of the first column.
    pub fn first(&self) -> Option<&Value> {
        self.columns.first().map(|(_, value)| value)
    }

    /// Column names in select order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Opaque database capability consumed by the scheduler, planner and store.
///
/// # Object Safety
/// This trait is object-safe and is shared as `Arc<dyn Executor>`.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Backend identifier, matching a dialect name.
    fn backend(&self) -> &'static str;

    /// Executes one statement with positional arguments.
    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult>;

    /// Executes an INSERT, reporting the generated key when the backend
    /// provides one.
    ///
    /// Backends that return the key through the statement itself, such as
    /// `RETURNING`, override this.
    async fn insert(&self, sql: &str, args: &[Value]) -> Result<ExecResult> {
        self.execute(sql, args).await
    }

    /// Runs a query and collects every row.
    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>>;
}

/// Detected backend family of a connection URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// `postgres://` and `postgresql://`
    Postgres,
    /// `mysql://` and `mariadb://`
    MySql,
    /// `sqlite:` URLs and `.db`/`.sqlite` paths
    Sqlite,
}

impl Backend {
    /// Dialect identifier for this backend.
    pub fn dialect_name(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }
}

/// Detects the backend from a connection URL.
///
/// # Errors
/// Returns a configuration error for unrecognized formats.
pub fn detect_backend(url: &str) -> Result<Backend> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Ok(Backend::Postgres)
    } else if url.starts_with("mysql://") || url.starts_with("mariadb://") {
        Ok(Backend::MySql)
    } else if url.starts_with("sqlite:")
        || url == ":memory:"
        || url.ends_with(".db")
        || url.ends_with(".sqlite")
        || url.ends_with(".sqlite3")
    {
        Ok(Backend::Sqlite)
    } else {
        Err(TablewrightError::configuration(
            "Unrecognized database connection string format",
        ))
    }
}

/// Opens an executor for `url`.
///
/// # Errors
/// Returns an error if the URL format is unrecognized, the backend was not
/// compiled in, or the connection cannot be established. The URL is
/// redacted in every error.
pub async fn connect(url: &str) -> Result<std::sync::Arc<dyn Executor>> {
    match detect_backend(url)? {
        #[cfg(feature = "postgresql")]
        Backend::Postgres => Ok(std::sync::Arc::new(postgres::PostgresExecutor::connect(url).await?)),
        #[cfg(not(feature = "postgresql"))]
        Backend::Postgres => Err(TablewrightError::unsupported_feature(
            "PostgreSQL executor",
            "Compile with --features postgresql to enable PostgreSQL support",
        )),
        #[cfg(feature = "mysql")]
        Backend::MySql => Ok(std::sync::Arc::new(mysql::MySqlExecutor::connect(url).await?)),
        #[cfg(not(feature = "mysql"))]
        Backend::MySql => Err(TablewrightError::unsupported_feature(
            "MySQL executor",
            "Compile with --features mysql to enable MySQL support",
        )),
        #[cfg(feature = "sqlite")]
        Backend::Sqlite => Ok(std::sync::Arc::new(sqlite::SqliteExecutor::connect(url).await?)),
        #[cfg(not(feature = "sqlite"))]
        Backend::Sqlite => Err(TablewrightError::unsupported_feature(
            "SQLite executor",
            "Compile with --features sqlite to enable SQLite support",
        )),
    }
}

/// Translates a sqlx error into a classified query error.
#[cfg(any(feature = "postgresql", feature = "mysql", feature = "sqlite"))]
pub(crate) fn translate(error: sqlx::Error, sql: &str) -> TablewrightError {
    let kind = classify(&error);
    TablewrightError::query_source(kind, statement_context(sql), error)
}

#[cfg(any(feature = "postgresql", feature = "mysql", feature = "sqlite"))]
fn classify(error: &sqlx::Error) -> QueryErrorKind {
    match error {
        sqlx::Error::PoolTimedOut => QueryErrorKind::Timeout,
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            QueryErrorKind::ConnectionLost
        }
        sqlx::Error::Database(db) => classify_database_error(
            db.code().as_deref(),
            db.message(),
        ),
        _ => QueryErrorKind::Other,
    }
}

/// Maps SQLSTATE codes, MySQL error numbers and SQLite messages to a kind.
pub fn classify_database_error(code: Option<&str>, message: &str) -> QueryErrorKind {
    match code {
        // SQLSTATE and MySQL error numbers
        Some("23505") | Some("1062") => return QueryErrorKind::DuplicateKey,
        Some("42P01") | Some("1146") => return QueryErrorKind::MissingTable,
        Some("42703") | Some("1054") => return QueryErrorKind::MissingColumn,
        Some("23502") | Some("1364") | Some("1048") => {
            return QueryErrorKind::MissingRequiredField;
        }
        Some("57014") => return QueryErrorKind::Timeout,
        Some("08000") | Some("08003") | Some("08006") | Some("2006") | Some("2013") => {
            return QueryErrorKind::ConnectionLost;
        }
        _ => {}
    }

    let lower = message.to_ascii_lowercase();
    if lower.contains("unique constraint failed") || lower.contains("duplicate") {
        QueryErrorKind::DuplicateKey
    } else if lower.contains("no such table") {
        QueryErrorKind::MissingTable
    } else if lower.contains("no such column") || lower.contains("has no column named") {
        QueryErrorKind::MissingColumn
    } else if lower.contains("not null constraint failed") {
        QueryErrorKind::MissingRequiredField
    } else if lower.contains("timeout") || lower.contains("timed out") {
        QueryErrorKind::Timeout
    } else {
        QueryErrorKind::Other
    }
}

/// First line of a statement, shortened for error context.
pub(crate) fn statement_context(sql: &str) -> String {
    const MAX: usize = 160;
    let line = sql.lines().next().unwrap_or_default().trim();
    if line.chars().count() > MAX {
        let truncated: String = line.chars().take(MAX).collect();
        format!("{truncated}...")
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_backend() {
        assert_eq!(detect_backend("postgres://u:p@localhost/db").unwrap(), Backend::Postgres);
        assert_eq!(detect_backend("postgresql://localhost/db").unwrap(), Backend::Postgres);
        assert_eq!(detect_backend("mysql://root@localhost/db").unwrap(), Backend::MySql);
        assert_eq!(detect_backend("sqlite::memory:").unwrap(), Backend::Sqlite);
        assert_eq!(detect_backend("/tmp/app.db").unwrap(), Backend::Sqlite);
        assert_eq!(detect_backend(":memory:").unwrap(), Backend::Sqlite);
        assert!(detect_backend("oracle://host/db").is_err());
    }

    #[test]
    fn test_classify_database_error() {
        assert_eq!(
            classify_database_error(Some("23505"), "duplicate key value"),
            QueryErrorKind::DuplicateKey
        );
        assert_eq!(
            classify_database_error(Some("1146"), "Table 'x.y' doesn't exist"),
            QueryErrorKind::MissingTable
        );
        assert_eq!(
            classify_database_error(Some("1"), "no such column: foo"),
            QueryErrorKind::MissingColumn
        );
        assert_eq!(
            classify_database_error(Some("1299"), "NOT NULL constraint failed: users.name"),
            QueryErrorKind::MissingRequiredField
        );
        assert_eq!(
            classify_database_error(Some("2067"), "UNIQUE constraint failed: users.id"),
            QueryErrorKind::DuplicateKey
        );
        assert_eq!(classify_database_error(None, "syntax error"), QueryErrorKind::Other);
    }

    #[test]
    fn test_row_accessors() {
        let row = Row::new(vec![
            ("NAME".to_string(), Value::Text("email".into())),
            ("is_nullable".to_string(), Value::Text("NO".into())),
            ("is_primary".to_string(), Value::Int(1)),
            ("default_value".to_string(), Value::Null),
        ]);
        assert_eq!(row.text("name").as_deref(), Some("email"));
        assert!(!row.flag("is_nullable"));
        assert!(row.flag("is_primary"));
        assert_eq!(row.text("default_value"), None);
        assert_eq!(row.int("is_primary"), 1);
        assert_eq!(row.len(), 4);
    }

    #[test]
    fn test_statement_context_truncates() {
        let sql = format!("SELECT {}\nFROM t", "x, ".repeat(100));
        let context = statement_context(&sql);
        assert!(context.ends_with("..."));
        assert!(!context.contains("FROM"));
    }
}
