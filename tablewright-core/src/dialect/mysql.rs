//! MySQL/MariaDB dialect.
//!
//! Compatible with MySQL 5.7+, 8.0+ and MariaDB 10.2+. Unsized strings map
//! to `VARCHAR(255)` so they stay indexable; complex values use `LONGTEXT`.

use super::Dialect;
use crate::{
    Result,
    metadata::{ColumnSpec, EntityMetadata},
    record::FieldKind,
};

/// MySQL/MariaDB dialect implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl MySqlDialect {
    /// Create a new MySQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
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
            FieldKind::Bool => "TINYINT(1)".to_string(),
            FieldKind::Int { bits, signed } => {
                let base = match bits {
                    0..=8 => "TINYINT",
                    9..=16 => "SMALLINT",
                    17..=32 => "INT",
                    _ => "BIGINT",
                };
                if *signed {
                    base.to_string()
                } else {
                    format!("{base} UNSIGNED")
                }
            }
            FieldKind::Float { bits } if *bits <= 32 => "FLOAT".to_string(),
            FieldKind::Float { .. } => "DOUBLE".to_string(),
            FieldKind::Timestamp => "DATETIME(6)".to_string(),
            FieldKind::Bytes => "LONGBLOB".to_string(),
            FieldKind::Text => "VARCHAR(255)".to_string(),
            FieldKind::Sequence | FieldKind::Map | FieldKind::Record | FieldKind::Embedded(_) => {
                "LONGTEXT".to_string()
            }
        }
    }

    fn column_definition(&self, column: &ColumnSpec) -> String {
        let mut definition = format!("{} {}", self.quote_ident(&column.column), self.type_of(column));
        if column.primary_key || column.not_null {
            definition.push_str(" NOT NULL");
        }
        if column.primary_key && column.auto_increment {
            definition.push_str(" AUTO_INCREMENT");
        }
        if column.primary_key {
            definition.push_str(" PRIMARY KEY");
        }
        definition
    }

    fn modify_column(&self, table: &str, column: &ColumnSpec) -> Result<String> {
        let mut definition = format!("{} {}", self.quote_ident(&column.column), self.type_of(column));
        if column.primary_key || column.not_null {
            definition.push_str(" NOT NULL");
        }
        if column.primary_key && column.auto_increment {
            definition.push_str(" AUTO_INCREMENT");
        }
        Ok(format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            self.quote_ident(table),
            definition
        ))
    }

    fn default_literal(&self, column: &ColumnSpec) -> Option<String> {
        // BLOB and TEXT columns cannot carry a literal default.
        if column.sql_type.is_some_and(|t| {
            let upper = t.to_ascii_uppercase();
            upper.contains("TEXT") || upper.contains("BLOB") || upper == "JSON"
        }) {
            return None;
        }
        match &column.kind {
            FieldKind::Bool | FieldKind::Int { .. } | FieldKind::Float { .. } => {
                Some("0".to_string())
            }
            FieldKind::Text => Some("''".to_string()),
            FieldKind::Timestamp => Some("'1970-01-01 00:00:00'".to_string()),
            FieldKind::Bytes
            | FieldKind::Sequence
            | FieldKind::Map
            | FieldKind::Record
            | FieldKind::Embedded(_) => None,
        }
    }

    fn create_table(&self, metadata: &EntityMetadata) -> String {
        let columns = metadata
            .columns
            .iter()
            .map(|c| self.column_definition(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            self.quote_ident(&metadata.table_name),
            columns
        )
    }

    fn drop_index(&self, table: &str, index: &str) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.quote_ident(index),
            self.quote_ident(table)
        )
    }

    fn upsert(&self, table: &str, columns: &[&str], primary_key: &str) -> String {
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| **c != primary_key)
            .map(|c| {
                let quoted = self.quote_ident(c);
                format!("{quoted} = VALUES({quoted})")
            })
            .collect();
        if updates.is_empty() {
            // Only key columns: skip duplicates
            return format!(
                "INSERT IGNORE INTO {} ({}) VALUES ({})",
                self.quote_ident(table),
                self.column_list(columns),
                self.placeholders(columns.len())
            );
        }
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
            self.quote_ident(table),
            self.column_list(columns),
            self.placeholders(columns.len()),
            updates.join(", ")
        )
    }

    fn table_exists_sql(&self) -> String {
        "SELECT COUNT(*) AS n FROM information_schema.tables \
         WHERE table_schema = DATABASE() AND table_name = ?"
            .to_string()
    }

    fn columns_sql(&self) -> String {
        "SELECT column_name AS name, \
                column_type AS native_type, \
                is_nullable AS is_nullable, \
                CASE WHEN column_key = 'PRI' THEN 1 ELSE 0 END AS is_primary, \
                column_default AS default_value \
         FROM information_schema.columns \
         WHERE table_schema = DATABASE() AND table_name = ? \
         ORDER BY ordinal_position"
            .to_string()
    }

    fn indexes_sql(&self) -> String {
        "SELECT DISTINCT index_name AS name FROM information_schema.statistics \
         WHERE table_schema = DATABASE() AND table_name = ? AND index_name <> 'PRIMARY' \
         ORDER BY index_name"
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::test_support::{column, key};

    #[test]
    fn test_kind_mapping() {
        let dialect = MySqlDialect::new();
        assert_eq!(dialect.type_of(&column("a", FieldKind::Bool)), "TINYINT(1)");
        assert_eq!(dialect.type_of(&column("a", FieldKind::unsigned(32))), "INT UNSIGNED");
        assert_eq!(dialect.type_of(&column("a", FieldKind::integer(64))), "BIGINT");
        assert_eq!(dialect.type_of(&column("a", FieldKind::Text)), "VARCHAR(255)");
        assert_eq!(dialect.type_of(&column("a", FieldKind::Sequence)), "LONGTEXT");
        assert_eq!(dialect.type_of(&column("a", FieldKind::Timestamp)), "DATETIME(6)");
    }

    #[test]
    fn test_auto_increment_key() {
        let dialect = MySqlDialect::new();
        assert_eq!(
            dialect.column_definition(&key("id")),
            "`id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY"
        );
    }

    #[test]
    fn test_upsert_on_duplicate_key() {
        let dialect = MySqlDialect::new();
        assert_eq!(
            dialect.upsert("users", &["id", "name"], "id"),
            "INSERT INTO `users` (`id`, `name`) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE `name` = VALUES(`name`)"
        );
        assert_eq!(
            dialect.upsert("tags", &["id"], "id"),
            "INSERT IGNORE INTO `tags` (`id`) VALUES (?)"
        );
    }

    #[test]
    fn test_complex_column_added_nullable() {
        let dialect = MySqlDialect::new();
        let mut spec = column("tags", FieldKind::Sequence);
        spec.not_null = true;
        assert_eq!(
            dialect.add_column("posts", &spec),
            "ALTER TABLE `posts` ADD COLUMN `tags` LONGTEXT"
        );
        let mut spec = column("title", FieldKind::Text);
        spec.not_null = true;
        assert_eq!(
            dialect.add_column("posts", &spec),
            "ALTER TABLE `posts` ADD COLUMN `title` VARCHAR(255) NOT NULL DEFAULT ''"
        );
    }

    #[test]
    fn test_index_statements() {
        let dialect = MySqlDialect::new();
        assert_eq!(
            dialect.create_index("users", "email"),
            "CREATE INDEX `idx_users_email` ON `users` (`email`)"
        );
        assert_eq!(
            dialect.drop_index("users", "idx_users_email"),
            "DROP INDEX `idx_users_email` ON `users`"
        );
    }

    #[test]
    fn test_modify_column() {
        let dialect = MySqlDialect::new();
        let mut spec = column("name", FieldKind::Text);
        spec.size = Some(64);
        spec.not_null = true;
        assert_eq!(
            dialect.modify_column("users", &spec).unwrap(),
            "ALTER TABLE `users` MODIFY COLUMN `name` VARCHAR(64) NOT NULL"
        );
    }

    #[test]
    fn test_catalog_queries_scoped_to_current_database() {
        let dialect = MySqlDialect::new();
        assert!(dialect.table_exists_sql().contains("DATABASE()"));
        assert!(dialect.columns_sql().contains("DATABASE()"));
        assert!(dialect.indexes_sql().contains("DATABASE()"));
    }
}
