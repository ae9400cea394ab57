//! PostgreSQL dialect.

use super::{Dialect, quote_double};
use crate::{
    Result,
    metadata::ColumnSpec,
    record::FieldKind,
};

/// PostgreSQL dialect implementation.
///
/// Auto-increment keys map to `SERIAL`/`BIGSERIAL` and generated keys are
/// read back with `RETURNING`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_double(name)
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn type_of(&self, column: &ColumnSpec) -> String {
        if let Some(sql_type) = column.sql_type {
            return sql_type.to_string();
        }
        if let (FieldKind::Text, Some(size)) = (&column.kind, column.size) {
            return format!("VARCHAR({size})");
        }
        let serial = column.primary_key && column.auto_increment;
        match &column.kind {
            FieldKind::Bool => "BOOLEAN".to_string(),
            FieldKind::Int { bits, signed } => {
                // Unsigned values need the next wider signed type.
                let width = if *signed { *bits } else { bits.saturating_mul(2) };
                match (width, serial) {
                    (0..=16, false) => "SMALLINT",
                    (0..=32, false) => "INTEGER",
                    (_, false) => "BIGINT",
                    (0..=16, true) => "SMALLSERIAL",
                    (0..=32, true) => "SERIAL",
                    (_, true) => "BIGSERIAL",
                }
                .to_string()
            }
            FieldKind::Float { bits } if *bits <= 32 => "REAL".to_string(),
            FieldKind::Float { .. } => "DOUBLE PRECISION".to_string(),
            FieldKind::Timestamp => "TIMESTAMPTZ".to_string(),
            FieldKind::Bytes => "BYTEA".to_string(),
            FieldKind::Text
            | FieldKind::Sequence
            | FieldKind::Map
            | FieldKind::Record
            | FieldKind::Embedded(_) => "TEXT".to_string(),
        }
    }

    fn column_definition(&self, column: &ColumnSpec) -> String {
        let mut definition = format!("{} {}", self.quote_ident(&column.column), self.type_of(column));
        if column.primary_key || column.not_null {
            definition.push_str(" NOT NULL");
        }
        if column.primary_key {
            definition.push_str(" PRIMARY KEY");
        }
        definition
    }

    fn modify_column(&self, table: &str, column: &ColumnSpec) -> Result<String> {
        let plain = ColumnSpec {
            auto_increment: false,
            ..column.clone()
        };
        let quoted = self.quote_ident(&column.column);
        let nullability = if column.primary_key || column.not_null {
            "SET NOT NULL"
        } else {
            "DROP NOT NULL"
        };
        Ok(format!(
            "ALTER TABLE {} ALTER COLUMN {quoted} TYPE {}, ALTER COLUMN {quoted} {nullability}",
            self.quote_ident(table),
            self.type_of(&plain)
        ))
    }

    fn default_literal(&self, column: &ColumnSpec) -> Option<String> {
        match &column.kind {
            FieldKind::Bool => Some("FALSE".to_string()),
            FieldKind::Timestamp => Some("'1970-01-01 00:00:00+00'".to_string()),
            FieldKind::Bytes => Some("''::bytea".to_string()),
            FieldKind::Int { .. } | FieldKind::Float { .. } => Some("0".to_string()),
            FieldKind::Text => Some("''".to_string()),
            FieldKind::Sequence => Some("'[]'".to_string()),
            FieldKind::Map | FieldKind::Record => Some("'{}'".to_string()),
            FieldKind::Embedded(_) => None,
        }
    }

    fn insert(&self, table: &str, columns: &[&str], returning: Option<&str>) -> String {
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_ident(table),
            self.column_list(columns),
            self.placeholders(columns.len())
        );
        if let Some(key) = returning {
            sql.push_str(" RETURNING ");
            sql.push_str(&self.quote_ident(key));
        }
        sql
    }

    fn table_exists_sql(&self) -> String {
        "SELECT COUNT(*) AS n FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = $1"
            .to_string()
    }

    fn columns_sql(&self) -> String {
        "SELECT c.column_name::text AS name, \
                c.data_type::text AS native_type, \
                c.is_nullable::text AS is_nullable, \
                CASE WHEN pk.column_name IS NULL THEN 0 ELSE 1 END AS is_primary, \
                c.column_default::text AS default_value \
         FROM information_schema.columns c \
         LEFT JOIN ( \
             SELECT kcu.column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name \
              AND tc.table_schema = kcu.table_schema \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
               AND tc.table_schema = current_schema() \
               AND tc.table_name = $1 \
         ) pk ON pk.column_name = c.column_name \
         WHERE c.table_schema = current_schema() AND c.table_name = $1 \
         ORDER BY c.ordinal_position"
            .to_string()
    }

    fn indexes_sql(&self) -> String {
        "SELECT i.indexname::text AS name FROM pg_indexes i \
         WHERE i.schemaname = current_schema() AND i.tablename = $1 \
           AND i.indexname NOT LIKE '%_pkey' \
         ORDER BY i.indexname"
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::test_support::{column, key};

    #[test]
    fn test_type_mapping_precedence() {
        let dialect = PostgresDialect::new();
        let mut spec = column("name", FieldKind::Text);
        assert_eq!(dialect.type_of(&spec), "TEXT");
        spec.size = Some(80);
        assert_eq!(dialect.type_of(&spec), "VARCHAR(80)");
        spec.sql_type = Some("CITEXT");
        assert_eq!(dialect.type_of(&spec), "CITEXT");
    }

    #[test]
    fn test_kind_mapping() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.type_of(&column("a", FieldKind::integer(32))), "INTEGER");
        assert_eq!(dialect.type_of(&column("a", FieldKind::unsigned(32))), "BIGINT");
        assert_eq!(dialect.type_of(&column("a", FieldKind::integer(16))), "SMALLINT");
        assert_eq!(dialect.type_of(&column("a", FieldKind::float(64))), "DOUBLE PRECISION");
        assert_eq!(dialect.type_of(&column("a", FieldKind::Map)), "TEXT");
        assert_eq!(dialect.type_of(&column("a", FieldKind::Timestamp)), "TIMESTAMPTZ");
        assert_eq!(dialect.type_of(&key("id")), "BIGSERIAL");
    }

    #[test]
    fn test_primary_key_forced_not_null() {
        let dialect = PostgresDialect::new();
        assert_eq!(
            dialect.column_definition(&key("id")),
            "\"id\" BIGSERIAL NOT NULL PRIMARY KEY"
        );
    }

    #[test]
    fn test_add_column_with_default() {
        let dialect = PostgresDialect::new();
        let mut spec = column("active", FieldKind::Bool);
        spec.not_null = true;
        assert_eq!(
            dialect.add_column("users", &spec),
            "ALTER TABLE \"users\" ADD COLUMN \"active\" BOOLEAN NOT NULL DEFAULT FALSE"
        );
        assert_eq!(
            dialect.add_column("users", &column("bio", FieldKind::Text)),
            "ALTER TABLE \"users\" ADD COLUMN \"bio\" TEXT"
        );
    }

    #[test]
    fn test_upsert_and_insert() {
        let dialect = PostgresDialect::new();
        assert_eq!(
            dialect.upsert("users", &["id", "name"], "id"),
            "INSERT INTO \"users\" (\"id\", \"name\") VALUES ($1, $2) \
             ON CONFLICT (\"id\") DO UPDATE SET \"name\" = EXCLUDED.\"name\""
        );
        assert_eq!(
            dialect.upsert("tags", &["id"], "id"),
            "INSERT INTO \"tags\" (\"id\") VALUES ($1) ON CONFLICT (\"id\") DO NOTHING"
        );
        assert_eq!(
            dialect.insert("users", &["name"], Some("id")),
            "INSERT INTO \"users\" (\"name\") VALUES ($1) RETURNING \"id\""
        );
    }

    #[test]
    fn test_modify_column() {
        let dialect = PostgresDialect::new();
        let sql = dialect
            .modify_column("users", &column("score", FieldKind::float(64)))
            .unwrap();
        assert_eq!(
            sql,
            "ALTER TABLE \"users\" ALTER COLUMN \"score\" TYPE DOUBLE PRECISION, \
             ALTER COLUMN \"score\" DROP NOT NULL"
        );
    }

    #[test]
    fn test_catalog_queries_scoped_to_current_schema() {
        let dialect = PostgresDialect::new();
        assert!(dialect.table_exists_sql().contains("current_schema()"));
        assert!(dialect.columns_sql().contains("current_schema()"));
        assert!(dialect.indexes_sql().contains("current_schema()"));
    }
}
