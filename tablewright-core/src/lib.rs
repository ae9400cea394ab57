//! Core library for tablewright.
//!
//! Maps application records to relational tables and keeps the live schema
//! in step with them. Record types describe their fields through the
//! [`record::Record`] capability; the metadata resolver turns that into a
//! cached table layout, dialects render DDL and DML for each database family,
//! and the scheduler applies planned changes concurrently under an explicit
//! permission policy.
//!
//! # Safety Guarantees
//! - Every DDL statement passes the permission policy before it runs
//! - Dry-run mode never sends DDL to the database
//! - Connection strings are redacted in every error and log line
//!
//! # Architecture
//! - Strategy pattern for dialect-specific SQL ([`dialect::Dialect`])
//! - Factory pattern for dialect and executor instantiation
//! - Explicitly constructed services instead of process-wide singletons:
//!   [`MetadataResolver`], [`DialectFactory`] and [`PermissionPolicy`] are
//!   created once and shared by reference

pub mod config;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metadata;
pub mod planner;
pub mod policy;
pub mod record;
pub mod scheduler;
pub mod store;
pub mod sync;
pub mod tag;

// Re-export commonly used types
pub use config::{ConnectionConfig, MigrationConfig, SchedulerConfig};
pub use dialect::{CatalogSnapshot, ColumnInfo, Dialect, DialectFactory};
pub use error::{QueryErrorKind, Result, TablewrightError};
pub use executor::{ExecResult, Executor, Row};
pub use metadata::{ColumnSpec, EntityMetadata, MetadataResolver};
pub use planner::{MigrationTask, plan};
pub use policy::{OperationKind, PermissionPolicy, PolicyConfig, PolicyPreset};
pub use record::{Entity, FieldDef, FieldKind, FieldPath, Record, Value};
pub use scheduler::{
    MigrationJob, MigrationReport, MigrationResult, MigrationScheduler, SchedulerStats,
    TaskOutcome,
};
pub use store::EntityStore;
pub use sync::SchemaSynchronizer;
