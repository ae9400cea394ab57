//! Metadata resolver integration tests.
//!
//! Covers concurrent first-use resolution, cache identity and the
//! primary key precedence tiers on realistic entity definitions.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Barrier};
use tablewright_core::{
    Entity, FieldDef, FieldKind, MetadataResolver, Record, Result, TablewrightError, Value,
    record::unknown_field,
};

#[derive(Debug, Default)]
struct Customer {
    id: i64,
    name: String,
}

impl Record for Customer {
    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new("id", FieldKind::integer(64)).tag("id,primary_key,auto_increment"),
            FieldDef::new("name", FieldKind::Text).tag("name,not_null").indexed(),
        ]
    }

    fn get(&self, path: &[&str]) -> Result<Value> {
        match path {
            ["id"] => Ok(self.id.into()),
            ["name"] => Ok(self.name.clone().into()),
            _ => Err(unknown_field(path)),
        }
    }

    fn set(&mut self, path: &[&str], value: Value) -> Result<()> {
        match path {
            ["id"] => self.id = value.to_typed()?,
            ["name"] => self.name = value.to_typed()?,
            _ => return Err(unknown_field(path)),
        }
        Ok(())
    }
}

impl Entity for Customer {
    fn table_name(&self) -> String {
        "customers".to_string()
    }
}

/// Name-convention `ID` field overridden by an explicit tag elsewhere.
#[derive(Debug, Default)]
struct LegacyOrder {
    legacy: i64,
    number: String,
}

impl Record for LegacyOrder {
    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new("ID", FieldKind::integer(64)).tag("legacy_id"),
            FieldDef::new("number", FieldKind::Text).tag("order_number,primary_key"),
        ]
    }

    fn get(&self, path: &[&str]) -> Result<Value> {
        match path {
            ["ID"] => Ok(self.legacy.into()),
            ["number"] => Ok(self.number.clone().into()),
            _ => Err(unknown_field(path)),
        }
    }

    fn set(&mut self, path: &[&str], value: Value) -> Result<()> {
        match path {
            ["ID"] => self.legacy = value.to_typed()?,
            ["number"] => self.number = value.to_typed()?,
            _ => return Err(unknown_field(path)),
        }
        Ok(())
    }
}

impl Entity for LegacyOrder {
    fn table_name(&self) -> String {
        String::new()
    }
}

/// Single `ID` field whose tag renames it without marking it as the key.
#[derive(Debug, Default)]
struct ArchivedInvoice {
    legacy: i64,
    name: String,
}

impl Record for ArchivedInvoice {
    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new("ID", FieldKind::integer(64)).tag("legacy_id"),
            FieldDef::new("name", FieldKind::Text),
        ]
    }

    fn get(&self, path: &[&str]) -> Result<Value> {
        match path {
            ["ID"] => Ok(self.legacy.into()),
            ["name"] => Ok(self.name.clone().into()),
            _ => Err(unknown_field(path)),
        }
    }

    fn set(&mut self, path: &[&str], value: Value) -> Result<()> {
        match path {
            ["ID"] => self.legacy = value.to_typed()?,
            ["name"] => self.name = value.to_typed()?,
            _ => return Err(unknown_field(path)),
        }
        Ok(())
    }
}

impl Entity for ArchivedInvoice {
    fn table_name(&self) -> String {
        "archived_invoices".to_string()
    }
}

#[derive(Debug, Default)]
struct Broken;

impl Record for Broken {
    fn fields() -> Vec<FieldDef> {
        vec![FieldDef::new("id", FieldKind::integer(64)).tag("id,primary_key,unique")]
    }

    fn get(&self, path: &[&str]) -> Result<Value> {
        Err(unknown_field(path))
    }

    fn set(&mut self, path: &[&str], _value: Value) -> Result<()> {
        Err(unknown_field(path))
    }
}

impl Entity for Broken {
    fn table_name(&self) -> String {
        "broken".to_string()
    }
}

#[test]
fn test_concurrent_resolution_builds_once() {
    let resolver = Arc::new(MetadataResolver::new());
    let barrier = Arc::new(Barrier::new(16));

    let resolved: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                let barrier = Arc::clone(&barrier);
                scope.spawn(move || {
                    barrier.wait();
                    resolver.resolve(&Customer::default()).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(resolver.build_count(), 1);
    assert_eq!(resolver.len(), 1);
    let first = &resolved[0];
    assert!(resolved.iter().all(|m| Arc::ptr_eq(m, first)));
    assert_eq!(first.table_name, "customers");
    assert_eq!(first.all_columns, vec!["id", "name"]);
    assert_eq!(first.indexed_columns().count(), 1);
}

#[test]
fn test_resolution_is_idempotent() {
    let resolver = MetadataResolver::new();
    let first = resolver.resolve(&Customer::default()).unwrap();
    let second = resolver.resolve(&Customer::default()).unwrap();
    assert_eq!(*first, *second);
    assert_eq!(resolver.build_count(), 1);

    resolver.resolve(&LegacyOrder::default()).unwrap();
    assert_eq!(resolver.build_count(), 2);
    assert!(resolver.cached::<Customer>().is_some());

    resolver.clear();
    assert!(resolver.is_empty());
    resolver.resolve(&Customer::default()).unwrap();
    assert_eq!(resolver.build_count(), 3);
}

#[test]
fn test_explicit_tag_beats_name_convention() {
    let resolver = MetadataResolver::new();
    let meta = resolver.resolve(&LegacyOrder::default()).unwrap();
    assert_eq!(meta.table_name, "legacy_orders");
    assert_eq!(meta.primary_key_column, "order_number");
    assert!(!meta.column("legacy_id").unwrap().primary_key);
}

#[test]
fn test_explicit_non_key_tag_on_id_field() {
    let resolver = MetadataResolver::new();
    let meta = resolver.resolve(&ArchivedInvoice::default()).unwrap();
    assert!(!meta.column("legacy_id").unwrap().primary_key);
    assert_ne!(meta.primary_key_column, "legacy_id");
    assert!(meta.primary_key_path.is_none());
}

#[test]
fn test_failed_resolution_not_cached() {
    let resolver = MetadataResolver::new();
    let err = resolver.resolve(&Broken).unwrap_err();
    assert!(matches!(err, TablewrightError::Metadata { .. }));
    assert!(resolver.cached::<Broken>().is_none());
    assert_eq!(resolver.build_count(), 0);
}
