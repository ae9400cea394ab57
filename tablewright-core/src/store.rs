//! Entity write and read paths.
//!
//! [`EntityStore::save`] turns an entity into one INSERT or upsert:
//!
//! - the primary key is left out while it holds its zero value, so the
//!   database can assign one;
//! - other zero-valued fields are replaced by their kind's default, so NOT
//!   NULL columns never receive an absent value;
//! - sequence, map and nested record fields are stored as JSON text. A field
//!   that fails to serialize is skipped with a warning.
//!
//! A record carrying a non-zero key is always upserted, which makes repeated
//! saves of the same record idempotent. Otherwise a plain insert is issued
//! and the generated key is written back into the record.
//!
//! [`EntityStore::load`] reads one row by key and reverses the conversion.

use crate::{
    Result,
    dialect::Dialect,
    error::TablewrightError,
    executor::{ExecResult, Executor},
    metadata::{ColumnSpec, EntityMetadata, MetadataResolver},
    record::{Entity, FieldKind, FromValue, Value},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Persists entities through one executor using one dialect.
#[derive(Clone)]
pub struct EntityStore {
    db: Arc<dyn Executor>,
    dialect: Arc<dyn Dialect>,
    resolver: Arc<MetadataResolver>,
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("backend", &self.db.backend())
            .field("dialect", &self.dialect.name())
            .finish_non_exhaustive()
    }
}

impl EntityStore {
    /// Creates a store sharing the given resolver cache.
    pub fn new(
        db: Arc<dyn Executor>,
        dialect: Arc<dyn Dialect>,
        resolver: Arc<MetadataResolver>,
    ) -> Self {
        Self {
            db,
            dialect,
            resolver,
        }
    }

    /// The dialect statements are generated with.
    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    /// The metadata cache shared with this store.
    pub fn resolver(&self) -> &Arc<MetadataResolver> {
        &self.resolver
    }

    /// Writes `entity`, calling [`Entity::before_save`] exactly once first.
    ///
    /// # Errors
    /// Returns a validation error when no column is left to write, a
    /// metadata error when the entity cannot be resolved, and a query error
    /// when the statement fails.
    pub async fn save<E: Entity>(&self, entity: &mut E) -> Result<ExecResult> {
        entity.before_save()?;
        let metadata = self.resolver.resolve(&*entity)?;
        let table = metadata.table_name.as_str();

        let mut columns: Vec<&str> = Vec::with_capacity(metadata.columns.len());
        let mut values = Vec::with_capacity(metadata.columns.len());
        let mut has_key = false;

        for spec in &metadata.columns {
            let raw = match entity.get(spec.path.segments()) {
                Ok(value) => value,
                Err(e @ TablewrightError::Serialization { .. }) => {
                    tracing::warn!(table, column = %spec.column, "Skipping field: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if spec.primary_key {
                if raw.is_zero() {
                    continue;
                }
                has_key = true;
                columns.push(spec.column.as_str());
                values.push(raw);
                continue;
            }

            match storage_value(spec, raw) {
                Ok(value) => {
                    columns.push(spec.column.as_str());
                    values.push(value);
                }
                Err(e) => {
                    tracing::warn!(table, column = %spec.column, "Skipping field: {}", e);
                }
            }
        }

        if columns.is_empty() {
            return Err(TablewrightError::validation(format!(
                "no insertable columns for table '{table}'"
            )));
        }

        if has_key {
            let sql = self
                .dialect
                .upsert(table, &columns, &metadata.primary_key_column);
            tracing::debug!(table, columns = columns.len(), "Upserting record");
            return self.db.execute(&sql, &values).await;
        }

        let generated = metadata.primary_key().filter(|key| key.auto_increment);
        let sql = self
            .dialect
            .insert(table, &columns, generated.map(|key| key.column.as_str()));
        tracing::debug!(table, columns = columns.len(), "Inserting record");
        let result = self.db.insert(&sql, &values).await?;

        if let (Some(key), Some(id)) = (generated, result.last_insert_id) {
            entity.set(key.path.segments(), Value::Int(id))?;
        }
        Ok(result)
    }

    /// Reads the entity stored under `key`, calling [`Entity::after_load`]
    /// exactly once on success.
    ///
    /// Returns `Ok(None)` when no row matches.
    ///
    /// # Errors
    /// Returns a validation error for a zero key or an entity without a
    /// primary key field, and a query error when the select fails.
    pub async fn load<E: Entity + Default>(&self, key: impl Into<Value>) -> Result<Option<E>> {
        let mut entity = E::default();
        let metadata = self.resolver.resolve(&entity)?;
        let key = key.into();
        if key.is_zero() {
            return Err(TablewrightError::validation(format!(
                "missing primary key value for table '{}'",
                metadata.table_name
            )));
        }
        if metadata.primary_key().is_none() {
            return Err(TablewrightError::validation(format!(
                "table '{}' has no primary key field to load by",
                metadata.table_name
            )));
        }

        let columns: Vec<&str> = metadata.all_columns.iter().map(String::as_str).collect();
        let sql = self
            .dialect
            .select_by_key(&metadata.table_name, &columns, &metadata.primary_key_column);
        let mut rows = self.db.query(&sql, &[key]).await?;
        let Some(mut row) = rows.pop() else {
            return Ok(None);
        };

        apply_row(&metadata, &mut entity, &mut row)?;
        entity.after_load()?;
        Ok(Some(entity))
    }
}

fn apply_row<E: Entity>(
    metadata: &EntityMetadata,
    entity: &mut E,
    row: &mut crate::executor::Row,
) -> Result<()> {
    for spec in &metadata.columns {
        let Some(value) = row.take(&spec.column) else {
            continue;
        };
        let value = restore_value(spec, value).map_err(|e| {
            TablewrightError::validation(format!(
                "column '{}' of table '{}': {e}",
                spec.column, metadata.table_name
            ))
        })?;
        entity.set(spec.path.segments(), value)?;
    }
    Ok(())
}

/// Converts a field value into the value bound for its column.
fn storage_value(spec: &ColumnSpec, value: Value) -> Result<Value> {
    if value.is_zero() {
        return Ok(spec.kind.default_value());
    }
    if !spec.kind.is_complex() {
        return Ok(value);
    }
    match value {
        // Pre-serialized text must itself be JSON or load cannot read it back
        Value::Text(text) => serde_json::from_str::<serde_json::Value>(&text)
            .map(|_| Value::Text(text))
            .map_err(|e| TablewrightError::serialization("Complex field text is not valid JSON", e)),
        Value::Json(json) => serde_json::to_string(&json)
            .map(Value::Text)
            .map_err(|e| TablewrightError::serialization("Failed to serialize complex field", e)),
        other => Err(TablewrightError::validation(format!(
            "cannot store {} in a JSON column",
            other.type_name()
        ))),
    }
}

/// Converts a stored column value back into the field's value shape.
fn restore_value(spec: &ColumnSpec, value: Value) -> Result<Value> {
    Ok(match (&spec.kind, value) {
        (_, Value::Null) => Value::Null,
        (kind, Value::Text(text)) if kind.is_complex() => {
            let json = serde_json::from_str(&text).map_err(|e| {
                TablewrightError::serialization("Failed to parse JSON column", e)
            })?;
            Value::Json(json)
        }
        (kind, Value::Bytes(bytes)) if kind.is_complex() => {
            let json = serde_json::from_slice(&bytes).map_err(|e| {
                TablewrightError::serialization("Failed to parse JSON column", e)
            })?;
            Value::Json(json)
        }
        (FieldKind::Bool, Value::Int(i)) => Value::Bool(i != 0),
        (FieldKind::Timestamp, text @ Value::Text(_)) => {
            Value::Timestamp(DateTime::<Utc>::from_value(text)?)
        }
        (_, value) => value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::test_support::column;

    #[test]
    fn test_zero_values_replaced_by_defaults() {
        let text = column("name", FieldKind::Text);
        assert_eq!(
            storage_value(&text, Value::Null).unwrap(),
            Value::Text(String::new())
        );
        let tags = column("tags", FieldKind::Sequence);
        assert_eq!(
            storage_value(&tags, Value::Json(serde_json::json!([]))).unwrap(),
            Value::Text("[]".into())
        );
        let attrs = column("attrs", FieldKind::Map);
        assert_eq!(
            storage_value(&attrs, Value::Null).unwrap(),
            Value::Text("{}".into())
        );
        let score = column("score", FieldKind::float(64));
        assert_eq!(storage_value(&score, Value::Null).unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_complex_values_serialized() {
        let tags = column("tags", FieldKind::Sequence);
        assert_eq!(
            storage_value(&tags, Value::Json(serde_json::json!(["a", "b"]))).unwrap(),
            Value::Text(r#"["a","b"]"#.into())
        );
        assert_eq!(
            storage_value(&tags, Value::Text(r#"["x"]"#.into())).unwrap(),
            Value::Text(r#"["x"]"#.into())
        );
        assert!(storage_value(&tags, Value::Int(3)).is_err());
    }

    #[test]
    fn test_non_json_text_rejected_for_complex_column() {
        let attrs = column("attrs", FieldKind::Map);
        let err = storage_value(&attrs, Value::Text("lang=en".into())).unwrap_err();
        assert!(matches!(err, TablewrightError::Serialization { .. }));
    }

    #[test]
    fn test_restore_value() {
        let attrs = column("attrs", FieldKind::Map);
        assert_eq!(
            restore_value(&attrs, Value::Text(r#"{"k":1}"#.into())).unwrap(),
            Value::Json(serde_json::json!({"k": 1}))
        );
        assert!(restore_value(&attrs, Value::Text("not json".into())).is_err());

        let flag = column("active", FieldKind::Bool);
        assert_eq!(restore_value(&flag, Value::Int(1)).unwrap(), Value::Bool(true));

        let at = column("created_at", FieldKind::Timestamp);
        assert_eq!(
            restore_value(&at, Value::Text("1970-01-01T00:00:00+00:00".into())).unwrap(),
            Value::Timestamp(DateTime::<Utc>::UNIX_EPOCH)
        );
    }
}
