//! Entity-driven schema synchronization.
//!
//! Ties the pieces together for one entity type: resolve its metadata, read
//! the live catalog, plan the DDL and hand the plan to the scheduler as a
//! single per-table job.

use crate::{
    Result,
    dialect::Dialect,
    executor::Executor,
    metadata::MetadataResolver,
    planner::{self, MigrationTask},
    policy::PermissionPolicy,
    record::Entity,
    scheduler::{MigrationJob, MigrationScheduler},
};
use std::sync::Arc;

/// Plans and submits schema changes for entity types.
#[derive(Debug, Clone)]
pub struct SchemaSynchronizer {
    dialect: Arc<dyn Dialect>,
    resolver: Arc<MetadataResolver>,
    policy: PermissionPolicy,
}

impl SchemaSynchronizer {
    /// Creates a synchronizer planning with `policy`.
    pub fn new(
        dialect: Arc<dyn Dialect>,
        resolver: Arc<MetadataResolver>,
        policy: PermissionPolicy,
    ) -> Self {
        Self {
            dialect,
            resolver,
            policy,
        }
    }

    /// The policy used for planning.
    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    /// Plans the DDL bringing the live table of `E` in line with its fields.
    ///
    /// Returns no tasks when auto-migration is disabled.
    ///
    /// # Errors
    /// Returns a metadata error if `E` cannot be resolved and a query error
    /// if the catalog cannot be read.
    pub async fn plan_entity<E: Entity>(
        &self,
        entity: &E,
        db: &dyn Executor,
    ) -> Result<Vec<MigrationTask>> {
        let metadata = self.resolver.resolve(entity)?;
        if !self.policy.auto_migrate() {
            tracing::info!(table = %metadata.table_name, "Auto-migration disabled; skipping");
            return Ok(Vec::new());
        }
        let snapshot = self.dialect.snapshot(db, &metadata.table_name).await?;
        let tasks = planner::plan(&metadata, self.dialect.as_ref(), &snapshot, &self.policy)?;
        tracing::debug!(
            table = %metadata.table_name,
            exists = snapshot.exists,
            tasks = tasks.len(),
            "Planned schema changes"
        );
        Ok(tasks)
    }

    /// Plans `E` and submits the plan as one job.
    ///
    /// Returns the number of submitted tasks; nothing is submitted when the
    /// table is already in sync.
    ///
    /// # Errors
    /// See [`SchemaSynchronizer::plan_entity`]; also fails if the scheduler
    /// no longer accepts work.
    pub async fn sync<E: Entity>(
        &self,
        entity: &E,
        db: &dyn Executor,
        scheduler: &MigrationScheduler,
    ) -> Result<usize> {
        let tasks = self.plan_entity(entity, db).await?;
        let Some(first) = tasks.first() else {
            return Ok(0);
        };
        let table = first.table.clone();
        let count = tasks.len();
        scheduler.submit(MigrationJob::new(table, tasks)).await?;
        Ok(count)
    }
}
