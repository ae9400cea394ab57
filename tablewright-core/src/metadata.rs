//! Entity metadata resolution and caching.
//!
//! Walks an entity's descriptor tree once per type, flattening embedded
//! sub-records depth-first, and produces an immutable [`EntityMetadata`].
//! Results are cached by [`TypeId`] for the lifetime of the resolver.
//!
//! # Concurrency
//! Lookups take a shared lock on the ready map. On a miss the resolver takes
//! a per-type build lock, checks the ready map again and only then builds, so
//! a type is never built twice while resolution of other types proceeds
//! unblocked.

use crate::{
    Result,
    error::TablewrightError,
    record::{Entity, FieldDef, FieldKind, FieldPath},
    tag::{TagDirective, is_valid_identifier, parse_tag, to_snake_case},
};
use serde::Serialize;
use std::{
    any::TypeId,
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Column name assumed when no primary key can be detected.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// One persisted column of an entity after flattening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name in the table
    pub column: String,
    /// Locator of the source field
    pub path: FieldPath,
    /// Value kind of the source field
    pub kind: FieldKind,
    /// Whether this is the table's primary key
    pub primary_key: bool,
    /// Whether the database assigns the value
    pub auto_increment: bool,
    /// Whether the column rejects NULL
    pub not_null: bool,
    /// Explicit native type override
    pub sql_type: Option<&'static str>,
    /// Size hint for bounded text types
    pub size: Option<u32>,
    /// Whether a managed single-column index is kept
    pub indexed: bool,
}

/// Derived table structure of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMetadata {
    /// Type identity the metadata was built for
    pub entity_type: TypeId,
    /// Rust type path, for logs
    pub type_name: &'static str,
    /// Table the entity maps to
    pub table_name: String,
    /// Primary key column, detected or defaulted
    pub primary_key_column: String,
    /// `None` when the key column was defaulted rather than detected
    pub primary_key_path: Option<FieldPath>,
    /// Column name to field locator
    pub column_to_field: HashMap<String, FieldPath>,
    /// Dotted field path to column name
    pub field_name_to_column: HashMap<String, String>,
    /// Column names in declaration order after flattening
    pub all_columns: Vec<String>,
    /// Column details in declaration order
    pub columns: Vec<ColumnSpec>,
    /// Whether any column is auto-increment
    pub has_auto_increment: bool,
    /// Non-fatal issues found while resolving
    pub warnings: Vec<String>,
}

impl EntityMetadata {
    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.column == name)
    }

    /// The primary key column, if it maps to a declared field.
    pub fn primary_key(&self) -> Option<&ColumnSpec> {
        self.column(&self.primary_key_column)
    }

    /// Columns that declare a managed index.
    pub fn indexed_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.indexed && !c.primary_key)
    }

    /// Short summary for logs and the CLI.
    pub fn summary(&self) -> MetadataSummary {
        MetadataSummary {
            type_name: self.type_name.to_string(),
            table_name: self.table_name.clone(),
            primary_key_column: self.primary_key_column.clone(),
            columns: self.all_columns.clone(),
            has_auto_increment: self.has_auto_increment,
            warnings: self.warnings.clone(),
        }
    }
}

/// Serializable view of [`EntityMetadata`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataSummary {
    /// Rust type path
    pub type_name: String,
    /// Table the entity maps to
    pub table_name: String,
    /// Primary key column
    pub primary_key_column: String,
    /// Column names in declaration order
    pub columns: Vec<String>,
    /// Whether any column is auto-increment
    pub has_auto_increment: bool,
    /// Non-fatal resolution issues
    pub warnings: Vec<String>,
}

type BuildSlot = Arc<Mutex<()>>;

/// Type-keyed cache of resolved entity metadata.
#[derive(Debug, Default)]
pub struct MetadataResolver {
    ready: RwLock<HashMap<TypeId, Arc<EntityMetadata>>>,
    building: Mutex<HashMap<TypeId, BuildSlot>>,
    build_count: AtomicUsize,
}

impl MetadataResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the metadata for `E`, building it on first use.
    ///
    /// # Errors
    /// Returns a metadata error when no table name can be derived or a field
    /// carries a malformed tag. Failed builds are not cached.
    pub fn resolve<E: Entity>(&self, entity: &E) -> Result<Arc<EntityMetadata>> {
        let id = TypeId::of::<E>();
        if let Some(found) = self.lookup(id) {
            return Ok(found);
        }

        let slot = {
            let mut building = self.building.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(building.entry(id).or_default())
        };
        let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(found) = self.lookup(id) {
            return Ok(found);
        }

        let built = Arc::new(build_metadata::<E>(entity)?);
        self.build_count.fetch_add(1, Ordering::SeqCst);
        for warning in &built.warnings {
            tracing::warn!(entity = built.type_name, "{}", warning);
        }
        tracing::debug!(
            entity = built.type_name,
            table = %built.table_name,
            columns = built.all_columns.len(),
            "Resolved entity metadata"
        );

        self.ready
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&built));
        Ok(built)
    }

    /// Cached metadata for `E`, without building.
    pub fn cached<E: Entity>(&self) -> Option<Arc<EntityMetadata>> {
        self.lookup(TypeId::of::<E>())
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.ready
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.building
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of cached entity types.
    pub fn len(&self) -> usize {
        self.ready.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been resolved yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of metadata builds performed since creation.
    pub fn build_count(&self) -> usize {
        self.build_count.load(Ordering::SeqCst)
    }

    fn lookup(&self, id: TypeId) -> Option<Arc<EntityMetadata>> {
        self.ready
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }
}

/// Primary key detection tier, lowest value wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum KeyTier {
    Tag,
    Marker,
    NameConvention,
}

#[derive(Default)]
struct Collector {
    columns: Vec<ColumnSpec>,
    key: Option<(KeyTier, usize)>,
    warnings: Vec<String>,
}

/// Builds metadata for `E` without consulting any cache.
///
/// # Errors
/// See [`MetadataResolver::resolve`].
pub fn build_metadata<E: Entity>(entity: &E) -> Result<EntityMetadata> {
    let type_name = std::any::type_name::<E>();
    let table_name = resolve_table_name(type_name, &entity.table_name())?;

    let mut collector = Collector::default();
    flatten(type_name, &E::fields(), &FieldPath::new(Vec::new()), &mut collector)?;

    let Collector {
        mut columns,
        key,
        mut warnings,
    } = collector;

    let (primary_key_column, primary_key_path) = match key {
        Some((_, index)) => {
            let spec = &mut columns[index];
            spec.primary_key = true;
            (spec.column.clone(), Some(spec.path.clone()))
        }
        None => {
            warnings.push(format!(
                "no primary key detected on table '{table_name}', assuming '{DEFAULT_PRIMARY_KEY}'"
            ));
            (DEFAULT_PRIMARY_KEY.to_string(), None)
        }
    };

    let column_to_field = columns
        .iter()
        .map(|c| (c.column.clone(), c.path.clone()))
        .collect();
    let field_name_to_column = columns
        .iter()
        .map(|c| (c.path.to_string(), c.column.clone()))
        .collect();
    let all_columns = columns.iter().map(|c| c.column.clone()).collect();
    let has_auto_increment = columns.iter().any(|c| c.auto_increment);

    Ok(EntityMetadata {
        entity_type: TypeId::of::<E>(),
        type_name,
        table_name,
        primary_key_column,
        primary_key_path,
        column_to_field,
        field_name_to_column,
        all_columns,
        columns,
        has_auto_increment,
        warnings,
    })
}

fn resolve_table_name(type_name: &str, declared: &str) -> Result<String> {
    let declared = declared.trim();
    let name = if declared.is_empty() {
        derive_table_name(type_name)
    } else {
        declared.to_string()
    };

    if name.is_empty() {
        return Err(TablewrightError::metadata(
            type_name,
            "entity has no table name and none can be derived",
        ));
    }
    if !is_valid_identifier(&name) {
        return Err(TablewrightError::metadata(
            type_name,
            format!("table name '{name}' is not a valid identifier"),
        ));
    }
    Ok(name)
}

/// Derives `order_items` from a type path such as `app::OrderItem<T>`.
fn derive_table_name(type_name: &str) -> String {
    let without_generics = type_name.split('<').next().unwrap_or_default();
    let last = without_generics.rsplit("::").next().unwrap_or_default();
    let snake = to_snake_case(last);
    if snake.is_empty() {
        return snake;
    }
    format!("{snake}s")
}

fn flatten(
    type_name: &'static str,
    fields: &[FieldDef],
    parent: &FieldPath,
    out: &mut Collector,
) -> Result<()> {
    for field in fields {
        if !field.public {
            continue;
        }
        let path = parent.child(field.name);

        if let FieldKind::Embedded(children) = &field.kind {
            if field.tag.is_some_and(|t| parse_tag(field.name, Some(t)) == TagDirective::Skip) {
                continue;
            }
            flatten(type_name, children, &path, out)?;
            continue;
        }

        let tag = match parse_tag(field.name, field.tag) {
            TagDirective::Include(tag) => tag,
            TagDirective::Skip => continue,
            TagDirective::Error(reason) => {
                return Err(TablewrightError::metadata(type_name, reason));
            }
        };

        if out.columns.iter().any(|c| c.column == tag.column) {
            out.warnings.push(format!(
                "field '{path}' maps to duplicate column '{}', keeping the first declaration",
                tag.column
            ));
            continue;
        }

        let tier = if tag.primary_key {
            Some(KeyTier::Tag)
        } else if field.primary_key {
            Some(KeyTier::Marker)
        } else if field.tag.is_none() && matches!(field.name, "id" | "ID" | "Id") {
            // an explicit tag without primary_key opts the field out
            Some(KeyTier::NameConvention)
        } else {
            None
        };
        let index = out.columns.len();
        if let Some(tier) = tier {
            match out.key {
                Some((current, _)) if current <= tier => {}
                _ => out.key = Some((tier, index)),
            }
        }

        out.columns.push(ColumnSpec {
            column: tag.column,
            path,
            kind: field.kind.clone(),
            primary_key: false,
            auto_increment: tag.auto_increment,
            not_null: tag.not_null,
            sql_type: field.sql_type,
            size: field.size,
            indexed: field.indexed,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Record, Value, unknown_field};

    struct Fixture {
        table: &'static str,
    }

    // Field list swapped per test; tests run on separate threads.
    thread_local! {
        static FIELDS: std::cell::Cell<fn() -> Vec<FieldDef>> = std::cell::Cell::new(Vec::new);
    }

    impl Record for Fixture {
        fn fields() -> Vec<FieldDef> {
            FIELDS.with(|f| f.get())()
        }
        fn get(&self, path: &[&str]) -> Result<Value> {
            Err(unknown_field(path))
        }
        fn set(&mut self, path: &[&str], _value: Value) -> Result<()> {
            Err(unknown_field(path))
        }
    }

    impl Entity for Fixture {
        fn table_name(&self) -> String {
            self.table.to_string()
        }
    }

    fn build(table: &'static str, fields: fn() -> Vec<FieldDef>) -> Result<EntityMetadata> {
        FIELDS.with(|f| f.set(fields));
        build_metadata(&Fixture { table })
    }

    #[test]
    fn test_flattens_embedded_depth_first() {
        let meta = build("accounts", || {
            vec![
                FieldDef::new("id", FieldKind::integer(64)).tag("id,primary_key,auto_increment"),
                FieldDef::embedded(
                    "audit",
                    vec![
                        FieldDef::new("created_by", FieldKind::Text),
                        FieldDef::embedded("stamp", vec![FieldDef::new("at", FieldKind::Timestamp)]),
                    ],
                ),
                FieldDef::new("email", FieldKind::Text),
            ]
        })
        .unwrap();

        assert_eq!(meta.all_columns, vec!["id", "created_by", "at", "email"]);
        assert_eq!(meta.column_to_field["at"].to_string(), "audit.stamp.at");
        assert_eq!(meta.field_name_to_column["audit.created_by"], "created_by");
        assert!(meta.has_auto_increment);
        assert!(meta.warnings.is_empty());
    }

    #[test]
    fn test_skip_rules() {
        let meta = build("accounts", || {
            vec![
                FieldDef::new("id", FieldKind::integer(64)),
                FieldDef::new("secret", FieldKind::Text).private(),
                FieldDef::new("cache", FieldKind::Text).tag("-"),
                FieldDef::new("scratch", FieldKind::Text).tag("scratch,skip"),
                FieldDef::new("name", FieldKind::Text),
            ]
        })
        .unwrap();
        assert_eq!(meta.all_columns, vec!["id", "name"]);
    }

    #[test]
    fn test_duplicate_column_keeps_first() {
        let meta = build("accounts", || {
            vec![
                FieldDef::new("id", FieldKind::integer(64)),
                FieldDef::new("name", FieldKind::Text),
                FieldDef::new("alias", FieldKind::Text).tag("name"),
            ]
        })
        .unwrap();
        assert_eq!(meta.all_columns, vec!["id", "name"]);
        assert_eq!(meta.column_to_field["name"].to_string(), "name");
        assert_eq!(meta.warnings.len(), 1);
    }

    #[test]
    fn test_primary_key_precedence() {
        // tag marker beats standalone marker and name convention
        let meta = build("t", || {
            vec![
                FieldDef::new("ID", FieldKind::integer(64)).tag("legacy_id"),
                FieldDef::new("code", FieldKind::Text).primary_key(),
                FieldDef::new("uuid", FieldKind::Text).tag("uuid,primary_key"),
            ]
        })
        .unwrap();
        assert_eq!(meta.primary_key_column, "uuid");
        assert!(meta.column("uuid").unwrap().primary_key);
        assert!(!meta.column("legacy_id").unwrap().primary_key);

        // standalone marker beats name convention
        let meta = build("t", || {
            vec![
                FieldDef::new("ID", FieldKind::integer(64)),
                FieldDef::new("code", FieldKind::Text).primary_key(),
            ]
        })
        .unwrap();
        assert_eq!(meta.primary_key_column, "code");

        // name convention alone
        let meta = build("t", || {
            vec![
                FieldDef::new("name", FieldKind::Text),
                FieldDef::new("Id", FieldKind::integer(64)),
            ]
        })
        .unwrap();
        assert_eq!(meta.primary_key_column, "id");
        assert!(meta.primary_key_path.is_some());
    }

    #[test]
    fn test_explicit_tag_opts_out_of_name_convention() {
        let meta = build("t", || {
            vec![
                FieldDef::new("ID", FieldKind::integer(64)).tag("legacy_id"),
                FieldDef::new("name", FieldKind::Text),
            ]
        })
        .unwrap();
        assert!(!meta.column("legacy_id").unwrap().primary_key);
        assert_eq!(meta.primary_key_column, DEFAULT_PRIMARY_KEY);
        assert!(meta.primary_key_path.is_none());
        assert_eq!(meta.warnings.len(), 1);
    }

    #[test]
    fn test_missing_primary_key_is_a_warning() {
        let meta = build("t", || vec![FieldDef::new("name", FieldKind::Text)]).unwrap();
        assert_eq!(meta.primary_key_column, DEFAULT_PRIMARY_KEY);
        assert!(meta.primary_key_path.is_none());
        assert_eq!(meta.warnings.len(), 1);
    }

    #[test]
    fn test_table_name_derivation() {
        let meta = build("", || vec![FieldDef::new("id", FieldKind::integer(64))]).unwrap();
        assert_eq!(meta.table_name, "fixtures");
        assert_eq!(derive_table_name("app::models::OrderItem<u8>"), "order_items");

        let err = build("bad name", || vec![]).unwrap_err();
        assert!(matches!(err, TablewrightError::Metadata { .. }));
    }

    #[test]
    fn test_malformed_tag_fails_resolution() {
        let err = build("t", || {
            vec![FieldDef::new("name", FieldKind::Text).tag("name,unique_ish")]
        })
        .unwrap_err();
        assert!(err.to_string().contains("unique_ish"));
    }
}
