//! SQL dialect strategies (Strategy pattern) and their factory.
//!
//! A [`Dialect`] owns everything that differs between database families:
//! identifier quoting, placeholders, native type mapping, DDL and DML text,
//! and the catalog queries used to read the live schema. DDL generation is
//! synchronous and pure; catalog reads go through an [`Executor`].
//!
//! # Type mapping precedence
//! 1. Explicit `sql_type` override on the field
//! 2. Size-bounded string mapping (`VARCHAR(n)`) for text fields with a size
//! 3. Kind-based default mapping
//!
//! Complex kinds (sequences, maps, nested records) map to a large text
//! column and are stored as JSON text, so the database sees an opaque string
//! rather than native structure.

use crate::{
    Result,
    error::TablewrightError,
    executor::{Backend, Executor, Row},
    metadata::{ColumnSpec, EntityMetadata},
    record::{FieldKind, Value},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

/// Dialect selected when an identifier is empty or unknown.
pub const DEFAULT_DIALECT: &str = "mysql";

/// Longest identifier every supported database stores without truncation.
///
/// PostgreSQL silently cuts names at 63 bytes; MySQL rejects names over 64.
pub const MAX_IDENTIFIER_LEN: usize = 63;

const INDEX_HASH_HEX_LEN: usize = 8;

/// Managed index name `idx_<table>_<column>`, bounded to
/// [`MAX_IDENTIFIER_LEN`].
///
/// Longer names keep a truncated prefix followed by `_` and a short SHA-256
/// suffix of the full name, so the name stored by the database is the name
/// the planner compares against.
pub fn managed_index_name(table: &str, column: &str) -> String {
    let full = format!("idx_{table}_{column}");
    if full.len() <= MAX_IDENTIFIER_LEN {
        return full;
    }
    let digest = Sha256::digest(full.as_bytes());
    let suffix: String = digest
        .iter()
        .take(INDEX_HASH_HEX_LEN / 2)
        .map(|b| format!("{b:02x}"))
        .collect();
    format!("{}_{suffix}", truncate_prefix(&full))
}

/// Prefix shared by every managed index of `table`, bounded the same way as
/// [`managed_index_name`].
pub fn managed_index_prefix(table: &str) -> String {
    truncate_prefix(&format!("idx_{table}_")).to_string()
}

fn truncate_prefix(name: &str) -> &str {
    let mut cut = (MAX_IDENTIFIER_LEN - INDEX_HASH_HEX_LEN - 1).min(name.len());
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    &name[..cut]
}

/// Read-only snapshot of one live column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Type name as reported by the catalog
    pub native_type: String,
    /// Whether the column accepts NULL
    pub is_nullable: bool,
    /// Whether the column is part of the primary key
    pub is_primary: bool,
    /// Default expression, if any
    pub default_value: Option<String>,
}

impl ColumnInfo {
    fn from_row(row: &Row) -> Option<Self> {
        Some(Self {
            name: row.text("name")?,
            native_type: row.text("native_type").unwrap_or_default(),
            is_nullable: row.flag("is_nullable"),
            is_primary: row.flag("is_primary"),
            default_value: row.text("default_value"),
        })
    }
}

/// Live catalog state of one table, valid for a single synchronization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    /// Table the snapshot was taken of
    pub table: String,
    /// Whether the table exists
    pub exists: bool,
    /// Columns in ordinal order
    pub columns: Vec<ColumnInfo>,
    /// Secondary index names
    pub indexes: Vec<String>,
}

impl CatalogSnapshot {
    /// Snapshot of a table that does not exist.
    pub fn missing(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Snapshot of an existing table with the given column names.
    pub fn with_columns<I, S>(table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.into(),
            exists: true,
            columns: columns
                .into_iter()
                .map(|name| ColumnInfo {
                    name: name.into(),
                    native_type: String::new(),
                    is_nullable: true,
                    is_primary: false,
                    default_value: None,
                })
                .collect(),
            indexes: Vec::new(),
        }
    }

    /// Adds live index names.
    pub fn with_indexes<I, S>(mut self, indexes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexes = indexes.into_iter().map(Into::into).collect();
        self
    }

    /// Live column names.
    pub fn column_names(&self) -> BTreeSet<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Database-family specific SQL generation and catalog introspection.
///
/// # Object Safety
/// Dialects are shared as `Arc<dyn Dialect>` through [`DialectFactory`].
#[async_trait]
pub trait Dialect: Send + Sync + std::fmt::Debug {
    /// Canonical identifier, e.g. `postgres`.
    fn name(&self) -> &'static str;

    /// Quotes a table, column or index name.
    fn quote_ident(&self, name: &str) -> String;

    /// Positional parameter placeholder, 1-based.
    fn placeholder(&self, index: usize) -> String;

    /// Native column type for `column`.
    fn type_of(&self, column: &ColumnSpec) -> String;

    /// Full column definition used inside CREATE TABLE.
    fn column_definition(&self, column: &ColumnSpec) -> String;

    /// Statement changing an existing column's type and nullability.
    ///
    /// # Errors
    /// Returns an unsupported-feature error where the dialect cannot alter
    /// columns in place.
    fn modify_column(&self, table: &str, column: &ColumnSpec) -> Result<String>;

    /// Query counting tables named by the single parameter.
    fn table_exists_sql(&self) -> String;

    /// Query listing columns of the table named by the parameter, aliased
    /// to `name`, `native_type`, `is_nullable`, `is_primary`, `default_value`.
    fn columns_sql(&self) -> String;

    /// Query listing secondary index names (`name`) of a table.
    fn indexes_sql(&self) -> String;

    /// Literal used as DEFAULT when adding a NOT NULL column to a populated
    /// table. `None` adds the column as nullable instead.
    fn default_literal(&self, column: &ColumnSpec) -> Option<String> {
        match &column.kind {
            FieldKind::Bool | FieldKind::Int { .. } | FieldKind::Float { .. } => {
                Some("0".to_string())
            }
            FieldKind::Text => Some("''".to_string()),
            FieldKind::Timestamp => Some("'1970-01-01 00:00:00'".to_string()),
            FieldKind::Sequence => Some("'[]'".to_string()),
            FieldKind::Map | FieldKind::Record => Some("'{}'".to_string()),
            FieldKind::Bytes | FieldKind::Embedded(_) => None,
        }
    }

    /// `CREATE TABLE` covering every column of the entity.
    fn create_table(&self, metadata: &EntityMetadata) -> String {
        let columns = metadata
            .columns
            .iter()
            .map(|c| self.column_definition(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.quote_ident(&metadata.table_name),
            columns
        )
    }

    /// `ALTER TABLE ... ADD COLUMN`.
    ///
    /// Key constraints are never added to an existing table. NOT NULL
    /// columns get a DEFAULT so the statement succeeds on populated tables.
    fn add_column(&self, table: &str, column: &ColumnSpec) -> String {
        let plain = ColumnSpec {
            primary_key: false,
            auto_increment: false,
            ..column.clone()
        };
        let mut definition = format!(
            "{} {}",
            self.quote_ident(&plain.column),
            self.type_of(&plain)
        );
        if column.not_null || column.primary_key {
            if let Some(literal) = self.default_literal(&plain) {
                definition.push_str(" NOT NULL DEFAULT ");
                definition.push_str(&literal);
            }
        }
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_ident(table),
            definition
        )
    }

    /// `ALTER TABLE ... DROP COLUMN`.
    fn drop_column(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_ident(table),
            self.quote_ident(column)
        )
    }

    /// Managed index name for a single column.
    fn index_name(&self, table: &str, column: &str) -> String {
        managed_index_name(table, column)
    }

    /// `CREATE INDEX` for a managed single-column index.
    fn create_index(&self, table: &str, column: &str) -> String {
        format!(
            "CREATE INDEX {} ON {} ({})",
            self.quote_ident(&self.index_name(table, column)),
            self.quote_ident(table),
            self.quote_ident(column)
        )
    }

    /// `DROP INDEX`.
    fn drop_index(&self, _table: &str, index: &str) -> String {
        format!("DROP INDEX {}", self.quote_ident(index))
    }

    /// Plain `INSERT`; `returning` names the generated key column where the
    /// dialect reads it back through the statement.
    fn insert(&self, table: &str, columns: &[&str], _returning: Option<&str>) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_ident(table),
            self.column_list(columns),
            self.placeholders(columns.len())
        )
    }

    /// Insert that updates every non-key column on primary key conflict.
    fn upsert(&self, table: &str, columns: &[&str], primary_key: &str) -> String {
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| **c != primary_key)
            .map(|c| {
                let quoted = self.quote_ident(c);
                format!("{quoted} = EXCLUDED.{quoted}")
            })
            .collect();
        let action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
            self.quote_ident(table),
            self.column_list(columns),
            self.placeholders(columns.len()),
            self.quote_ident(primary_key),
            action
        )
    }

    /// `SELECT` of one row by primary key.
    fn select_by_key(&self, table: &str, columns: &[&str], primary_key: &str) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = {}",
            self.column_list(columns),
            self.quote_ident(table),
            self.quote_ident(primary_key),
            self.placeholder(1)
        )
    }

    /// Comma-separated quoted column list.
    fn column_list(&self, columns: &[&str]) -> String {
        columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Comma-separated placeholders `1..=count`.
    fn placeholders(&self, count: usize) -> String {
        (1..=count)
            .map(|i| self.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Whether `table` exists in the current schema.
    async fn table_exists(&self, db: &dyn Executor, table: &str) -> Result<bool> {
        let rows = db
            .query(&self.table_exists_sql(), &[Value::from(table)])
            .await?;
        Ok(rows.first().is_some_and(|row| {
            matches!(row.first(), Some(Value::Int(n)) if *n > 0)
        }))
    }

    /// Live columns of `table` in ordinal order.
    async fn existing_columns(&self, db: &dyn Executor, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = db.query(&self.columns_sql(), &[Value::from(table)]).await?;
        Ok(rows.iter().filter_map(ColumnInfo::from_row).collect())
    }

    /// Live secondary index names of `table`.
    async fn existing_indexes(&self, db: &dyn Executor, table: &str) -> Result<Vec<String>> {
        let rows = db.query(&self.indexes_sql(), &[Value::from(table)]).await?;
        Ok(rows.iter().filter_map(|row| row.text("name")).collect())
    }

    /// Reads the complete catalog state of `table`.
    async fn snapshot(&self, db: &dyn Executor, table: &str) -> Result<CatalogSnapshot> {
        if !self.table_exists(db, table).await? {
            return Ok(CatalogSnapshot::missing(table));
        }
        Ok(CatalogSnapshot {
            table: table.to_string(),
            exists: true,
            columns: self.existing_columns(db, table).await?,
            indexes: self.existing_indexes(db, table).await?,
        })
    }
}

/// Quotes with double quotes, doubling embedded quotes.
pub(crate) fn quote_double(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Registry of dialect strategies keyed by identifier.
///
/// # Example
/// ```rust
/// use tablewright_core::dialect::DialectFactory;
///
/// let factory = DialectFactory::with_builtins();
/// assert_eq!(factory.get("pg").name(), "postgres");
/// assert_eq!(factory.get("").name(), "mysql");
/// ```
#[derive(Debug, Clone)]
pub struct DialectFactory {
    dialects: HashMap<String, Arc<dyn Dialect>>,
    default_name: String,
}

impl Default for DialectFactory {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl DialectFactory {
    /// Creates an empty factory falling back to [`DEFAULT_DIALECT`].
    pub fn new() -> Self {
        Self {
            dialects: HashMap::new(),
            default_name: DEFAULT_DIALECT.to_string(),
        }
    }

    /// Creates a factory with the PostgreSQL, MySQL and SQLite dialects and
    /// their common aliases.
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        let postgres: Arc<dyn Dialect> = Arc::new(PostgresDialect::new());
        let mysql: Arc<dyn Dialect> = Arc::new(MySqlDialect::new());
        let sqlite: Arc<dyn Dialect> = Arc::new(SqliteDialect::new());
        for alias in ["postgres", "postgresql", "pg"] {
            factory.register(alias, Arc::clone(&postgres));
        }
        for alias in ["mysql", "mariadb"] {
            factory.register(alias, Arc::clone(&mysql));
        }
        for alias in ["sqlite", "sqlite3"] {
            factory.register(alias, Arc::clone(&sqlite));
        }
        factory
    }

    /// Registers a dialect under an identifier (case-insensitive).
    pub fn register(&mut self, name: impl Into<String>, dialect: Arc<dyn Dialect>) {
        self.dialects
            .insert(name.into().to_ascii_lowercase(), dialect);
    }

    /// Looks up a dialect without falling back.
    pub fn try_get(&self, name: &str) -> Option<Arc<dyn Dialect>> {
        self.dialects
            .get(&name.trim().to_ascii_lowercase())
            .cloned()
    }

    /// Looks up a dialect, failing for unknown identifiers.
    ///
    /// # Errors
    /// Returns a configuration error naming the unknown identifier.
    pub fn require(&self, name: &str) -> Result<Arc<dyn Dialect>> {
        self.try_get(name).ok_or_else(|| {
            TablewrightError::configuration(format!(
                "Unknown dialect '{name}'. Available: {}",
                self.names().join(", ")
            ))
        })
    }

    /// Looks up a dialect; empty or unknown identifiers resolve to the
    /// default dialect with a warning.
    pub fn get(&self, name: &str) -> Arc<dyn Dialect> {
        if let Some(dialect) = self.try_get(name) {
            return dialect;
        }
        tracing::warn!(
            requested = name,
            fallback = %self.default_name,
            "Unknown or empty dialect identifier, using default"
        );
        self.try_get(&self.default_name)
            .unwrap_or_else(|| Arc::new(MySqlDialect::new()))
    }

    /// Dialect matching a detected connection backend.
    pub fn for_backend(&self, backend: Backend) -> Arc<dyn Dialect> {
        self.get(backend.dialect_name())
    }

    /// Registered identifiers, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.dialects.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_aliases() {
        let factory = DialectFactory::with_builtins();
        assert_eq!(factory.get("PostgreSQL").name(), "postgres");
        assert_eq!(factory.get("mariadb").name(), "mysql");
        assert_eq!(factory.get("sqlite3").name(), "sqlite");
    }

    #[test]
    fn test_factory_fallback() {
        let factory = DialectFactory::with_builtins();
        assert_eq!(factory.get("").name(), DEFAULT_DIALECT);
        assert_eq!(factory.get("oracle").name(), DEFAULT_DIALECT);
        assert!(factory.try_get("oracle").is_none());
        assert!(factory.require("oracle").is_err());
        assert_eq!(factory.for_backend(Backend::Sqlite).name(), "sqlite");
    }

    #[test]
    fn test_snapshot_helpers() {
        let snapshot = CatalogSnapshot::with_columns("users", ["a", "b"]).with_indexes(["idx_users_a"]);
        assert!(snapshot.exists);
        assert_eq!(snapshot.column_names().into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(!CatalogSnapshot::missing("users").exists);
    }

    #[test]
    fn test_managed_index_name_bounded() {
        assert_eq!(managed_index_name("users", "email"), "idx_users_email");

        let table = "customer_subscription_billing_events";
        let column = "external_payment_provider_reference";
        let name = managed_index_name(table, column);
        assert_eq!(name.len(), MAX_IDENTIFIER_LEN);
        assert!(name.starts_with(&managed_index_prefix(table)));
        assert_eq!(name, managed_index_name(table, column));
        assert_ne!(name, managed_index_name(table, "external_payment_provider_reference_2"));

        let sql = PostgresDialect::new().create_index(table, column);
        assert!(sql.contains(&format!("\"{name}\"")));
    }

    #[test]
    fn test_quote_double_escapes() {
        assert_eq!(quote_double("a\"b"), "\"a\"\"b\"");
    }
}
