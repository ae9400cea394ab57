//! SQLite dialect.
//!
//! SQLite cannot alter a column in place; [`Dialect::modify_column`]
//! reports the operation as unsupported. Catalog reads use the
//! `pragma_table_info` and `pragma_index_list` table-valued functions of the
//! main database.

use super::{Dialect, quote_double};
use crate::{
    Result,
    error::TablewrightError,
    metadata::ColumnSpec,
    record::FieldKind,
};

/// SQLite dialect implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Create a new SQLite dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_double(name)
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn type_of(&self, column: &ColumnSpec) -> String {
        if let Some(sql_type) = column.sql_type {
            return sql_type.to_string();
        }
        if let (FieldKind::Text, Some(size)) = (&column.kind, column.size) {
            return format!("VARCHAR({size})");
        }
        match &column.kind {
            FieldKind::Bool => "BOOLEAN",
            FieldKind::Int { .. } => "INTEGER",
            FieldKind::Float { .. } => "REAL",
            FieldKind::Timestamp => "DATETIME",
            FieldKind::Bytes => "BLOB",
            FieldKind::Text
            | FieldKind::Sequence
            | FieldKind::Map
            | FieldKind::Record
            | FieldKind::Embedded(_) => "TEXT",
        }
        .to_string()
    }

    fn column_definition(&self, column: &ColumnSpec) -> String {
        let mut definition = format!("{} {}", self.quote_ident(&column.column), self.type_of(column));
        if column.primary_key || column.not_null {
            definition.push_str(" NOT NULL");
        }
        if column.primary_key {
            definition.push_str(" PRIMARY KEY");
            // AUTOINCREMENT is only valid on an INTEGER PRIMARY KEY
            if column.auto_increment && self.type_of(column).eq_ignore_ascii_case("INTEGER") {
                definition.push_str(" AUTOINCREMENT");
            }
        }
        definition
    }

    fn modify_column(&self, _table: &str, _column: &ColumnSpec) -> Result<String> {
        Err(TablewrightError::unsupported_feature("modify column", "sqlite"))
    }

    fn table_exists_sql(&self) -> String {
        "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?".to_string()
    }

    fn columns_sql(&self) -> String {
        "SELECT name, \
                type AS native_type, \
                CASE WHEN \"notnull\" = 0 THEN 'YES' ELSE 'NO' END AS is_nullable, \
                CASE WHEN pk > 0 THEN 1 ELSE 0 END AS is_primary, \
                dflt_value AS default_value \
         FROM pragma_table_info(?) ORDER BY cid"
            .to_string()
    }

    fn indexes_sql(&self) -> String {
        "SELECT name FROM pragma_index_list(?) WHERE origin = 'c' ORDER BY name".to_string()
    }
}
