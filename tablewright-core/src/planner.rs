//! Synchronization planning.
//!
//! [`plan`] compares an entity's resolved columns with a [`CatalogSnapshot`]
//! of the live table and emits the DDL needed to converge them. Planning is
//! pure: it reads only the snapshot it is given and never touches the
//! database.
//!
//! Column types of columns present on both sides are not compared; changing
//! an existing column is left to explicitly configured tasks.

use crate::{
    Result,
    dialect::{CatalogSnapshot, Dialect, managed_index_prefix},
    error::TablewrightError,
    metadata::EntityMetadata,
    policy::{OperationKind, PermissionPolicy},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// One DDL statement scheduled against one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationTask {
    /// Target table
    pub table: String,
    /// Column or index the statement concerns, if any
    pub column: Option<String>,
    /// Operation kind gated by the policy
    pub operation: OperationKind,
    /// Single DDL statement
    pub sql: String,
    /// Execution order inside a job, lowest first
    pub priority: u8,
}

impl MigrationTask {
    /// Creates a task with the default priority for its operation.
    pub fn new(
        table: impl Into<String>,
        column: Option<String>,
        operation: OperationKind,
        sql: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            column,
            operation,
            sql: sql.into(),
            priority: default_priority(operation),
        }
    }

    /// Overrides the priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// Order of sub-steps inside a per-table job.
///
/// Obsolete indexes go first so dropped columns are not still indexed; new
/// indexes go after the columns they cover exist.
pub fn default_priority(operation: OperationKind) -> u8 {
    match operation {
        OperationKind::DeleteIndex => 0,
        OperationKind::CreateTable => 1,
        OperationKind::CreateColumn => 2,
        OperationKind::DeleteColumn => 3,
        OperationKind::CreateIndex => 4,
        OperationKind::UpdateColumn => 5,
    }
}

/// Plans the DDL converging the live table towards `metadata`.
///
/// - Missing table: one `CreateTable` task, plus `CreateIndex` tasks for
///   indexed columns.
/// - Existing table: `CreateColumn` for every entity column missing live;
///   `DeleteColumn` for every live column the entity no longer declares,
///   only when the policy allows `DeleteColumn`.
/// - Managed indexes (`idx_<table>_<column>`) are created when declared and
///   missing, and dropped when no longer declared if `DeleteIndex` is
///   allowed. Indexes outside the naming convention are never touched.
///
/// # Errors
/// Returns a validation error when the snapshot describes a different table.
pub fn plan(
    metadata: &EntityMetadata,
    dialect: &dyn Dialect,
    snapshot: &CatalogSnapshot,
    policy: &PermissionPolicy,
) -> Result<Vec<MigrationTask>> {
    let table = metadata.table_name.as_str();
    if !snapshot.table.eq_ignore_ascii_case(table) {
        return Err(TablewrightError::validation(format!(
            "catalog snapshot for '{}' cannot plan table '{table}'",
            snapshot.table
        )));
    }

    let mut tasks = Vec::new();

    if !snapshot.exists {
        tasks.push(MigrationTask::new(
            table,
            None,
            OperationKind::CreateTable,
            dialect.create_table(metadata),
        ));
        for column in metadata.indexed_columns() {
            tasks.push(MigrationTask::new(
                table,
                Some(column.column.clone()),
                OperationKind::CreateIndex,
                dialect.create_index(table, &column.column),
            ));
        }
        return Ok(tasks);
    }

    let live: HashSet<String> = snapshot
        .columns
        .iter()
        .map(|c| c.name.to_ascii_lowercase())
        .collect();
    let declared: HashSet<String> = metadata
        .all_columns
        .iter()
        .map(|c| c.to_ascii_lowercase())
        .collect();

    for column in &metadata.columns {
        if !live.contains(&column.column.to_ascii_lowercase()) {
            tasks.push(MigrationTask::new(
                table,
                Some(column.column.clone()),
                OperationKind::CreateColumn,
                dialect.add_column(table, column),
            ));
        }
    }

    if policy.is_allowed(OperationKind::DeleteColumn) {
        for info in &snapshot.columns {
            if declared.contains(&info.name.to_ascii_lowercase()) {
                continue;
            }
            if info.is_primary {
                tracing::warn!(
                    table,
                    column = %info.name,
                    "Live primary key column is not declared; leaving it in place"
                );
                continue;
            }
            tasks.push(MigrationTask::new(
                table,
                Some(info.name.clone()),
                OperationKind::DeleteColumn,
                dialect.drop_column(table, &info.name),
            ));
        }
    }

    plan_indexes(metadata, dialect, snapshot, policy, &mut tasks);

    tasks.sort_by_key(|t| t.priority);
    Ok(tasks)
}

fn plan_indexes(
    metadata: &EntityMetadata,
    dialect: &dyn Dialect,
    snapshot: &CatalogSnapshot,
    policy: &PermissionPolicy,
    tasks: &mut Vec<MigrationTask>,
) {
    let table = metadata.table_name.as_str();
    let live: BTreeSet<String> = snapshot
        .indexes
        .iter()
        .map(|i| i.to_ascii_lowercase())
        .collect();

    let mut wanted = BTreeSet::new();
    for column in metadata.indexed_columns() {
        let name = dialect.index_name(table, &column.column);
        if !live.contains(&name.to_ascii_lowercase()) {
            tasks.push(MigrationTask::new(
                table,
                Some(column.column.clone()),
                OperationKind::CreateIndex,
                dialect.create_index(table, &column.column),
            ));
        }
        wanted.insert(name.to_ascii_lowercase());
    }

    if !policy.is_allowed(OperationKind::DeleteIndex) {
        return;
    }
    let managed_prefix = managed_index_prefix(table).to_ascii_lowercase();
    for index in &snapshot.indexes {
        let lower = index.to_ascii_lowercase();
        if lower.starts_with(&managed_prefix) && !wanted.contains(&lower) {
            tasks.push(MigrationTask::new(
                table,
                Some(index.clone()),
                OperationKind::DeleteIndex,
                dialect.drop_index(table, index),
            ));
        }
    }
}
