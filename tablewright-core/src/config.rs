//! Runtime configuration: connection pool, scheduler and migration sources.
//!
//! Every struct deserializes with `serde` defaults and exposes a
//! `validate()` that reports problems as configuration errors.

use crate::{
    Result,
    error::TablewrightError,
    planner::MigrationTask,
    policy::{OperationKind, PolicyConfig},
    scheduler::MigrationJob,
    tag::is_valid_identifier,
};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// Connection pool settings for the sqlx executors.
///
/// # Example
/// ```rust
/// use tablewright_core::config::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig::default()
///     .with_max_connections(4)
///     .with_statement_timeout(Duration::from_secs(10));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Maximum number of pooled connections
    pub max_connections: u32,
    /// Pool acquire timeout
    pub connect_timeout: Duration,
    /// Per-statement timeout, where the backend supports one
    pub statement_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connect_timeout: Duration::from_secs(30),
            statement_timeout: None,
        }
    }
}

impl ConnectionConfig {
    /// Validates pool settings.
    ///
    /// # Errors
    /// Returns a configuration error if a value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(TablewrightError::configuration(
                "max_connections must be greater than 0",
            ));
        }
        if self.max_connections > 100 {
            return Err(TablewrightError::configuration(
                "max_connections should not exceed 100",
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(TablewrightError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }
        if self.statement_timeout.is_some_and(|t| t.is_zero()) {
            return Err(TablewrightError::configuration(
                "statement_timeout must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Builder method to set the pool size.
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Builder method to set the acquire timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder method to set the statement timeout.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }
}

/// Worker pool settings for the migration scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// Jobs buffered before submission waits
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
        }
    }
}

impl SchedulerConfig {
    /// Upper bound on the worker count.
    pub const MAX_WORKERS: usize = 64;

    /// Validates scheduler settings.
    ///
    /// # Errors
    /// Returns a configuration error if a value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(TablewrightError::configuration(
                "workers must be greater than 0",
            ));
        }
        if self.workers > Self::MAX_WORKERS {
            return Err(TablewrightError::configuration(format!(
                "workers should not exceed {}",
                Self::MAX_WORKERS
            )));
        }
        if self.queue_capacity == 0 {
            return Err(TablewrightError::configuration(
                "queue_capacity must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Builder method to set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Builder method to set the queue capacity.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }
}

/// One statement of a configured job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Operation kind gated by the policy
    pub operation: OperationKind,
    /// Column or index the statement concerns
    #[serde(default)]
    pub column: Option<String>,
    /// Single statement to execute
    pub sql: String,
    /// Overrides the operation's default priority
    #[serde(default)]
    pub priority: Option<u8>,
}

/// A per-table unit of configured statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Target table
    pub table: String,
    /// Statements run in priority order
    pub tasks: Vec<TaskSpec>,
}

/// JSON migration source consumed by the `apply` command.
///
/// ```json
/// {
///   "dialect": "postgres",
///   "scheduler": { "workers": 4 },
///   "policy": { "preset": "safe", "dry_run": true },
///   "jobs": [
///     { "table": "users", "tasks": [
///       { "operation": "create_column", "column": "email",
///         "sql": "ALTER TABLE users ADD COLUMN email TEXT" }
///     ] }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Expected dialect of the target database
    pub dialect: Option<String>,
    /// Worker pool sizing
    pub scheduler: SchedulerConfig,
    /// Permission policy for the run
    pub policy: PolicyConfig,
    /// Per-table jobs
    pub jobs: Vec<JobSpec>,
}

impl MigrationConfig {
    /// Parses and validates a JSON migration source.
    ///
    /// # Errors
    /// Returns a configuration error for malformed JSON or invalid content.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            TablewrightError::configuration(format!("Malformed migration config: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a migration source file.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be read and a configuration
    /// error for malformed or invalid content.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TablewrightError::Io {
                context: format!("Failed to read migration config {}", path.display()),
                source: e,
            })?;
        Self::from_json(&json)
    }

    /// Validates every job and task, naming the offending entry.
    ///
    /// # Errors
    /// Returns a configuration error for the first invalid entry.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        for (job_index, job) in self.jobs.iter().enumerate() {
            if !is_valid_identifier(&job.table) {
                return Err(TablewrightError::configuration(format!(
                    "job {job_index}: invalid table name '{}'",
                    job.table
                )));
            }
            if job.tasks.is_empty() {
                return Err(TablewrightError::configuration(format!(
                    "job {job_index} ({}): no tasks",
                    job.table
                )));
            }
            for (task_index, task) in job.tasks.iter().enumerate() {
                if task.sql.trim().is_empty() {
                    return Err(TablewrightError::configuration(format!(
                        "job {job_index} ({}) task {task_index}: empty sql",
                        job.table
                    )));
                }
                if let Some(column) = &task.column {
                    if !is_valid_identifier(column) {
                        return Err(TablewrightError::configuration(format!(
                            "job {job_index} ({}) task {task_index}: invalid column name '{column}'",
                            job.table
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Converts the configured jobs into scheduler jobs.
    pub fn to_jobs(&self) -> Vec<MigrationJob> {
        self.jobs
            .iter()
            .map(|job| {
                let tasks = job
                    .tasks
                    .iter()
                    .map(|spec| {
                        let task = MigrationTask::new(
                            job.table.clone(),
                            spec.column.clone(),
                            spec.operation,
                            spec.sql.clone(),
                        );
                        match spec.priority {
                            Some(priority) => task.with_priority(priority),
                            None => task,
                        }
                    })
                    .collect();
                MigrationJob::new(job.table.clone(), tasks)
            })
            .collect()
    }

    /// Total number of configured statements.
    pub fn task_count(&self) -> usize {
        self.jobs.iter().map(|job| job.tasks.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_validation() {
        assert!(SchedulerConfig::default().validate().is_ok());
        assert!(SchedulerConfig::default().with_workers(0).validate().is_err());
        assert!(SchedulerConfig::default().with_workers(65).validate().is_err());
        assert!(SchedulerConfig::default().with_queue_capacity(0).validate().is_err());
    }

    #[test]
    fn test_connection_config_validation() {
        assert!(ConnectionConfig::default().validate().is_ok());
        assert!(ConnectionConfig::default().with_max_connections(0).validate().is_err());
        assert!(
            ConnectionConfig::default()
                .with_statement_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_migration_config_parses_and_orders() {
        let json = r#"{
            "policy": {"preset": "safe"},
            "jobs": [{"table": "users", "tasks": [
                {"operation": "create_index", "column": "email", "sql": "CREATE INDEX idx_users_email ON users (email)"},
                {"operation": "create_column", "column": "email", "sql": "ALTER TABLE users ADD COLUMN email TEXT"}
            ]}]
        }"#;
        let config = MigrationConfig::from_json(json).unwrap();
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert_eq!(config.task_count(), 2);

        let jobs = config.to_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].tasks[0].operation, OperationKind::CreateColumn);
        assert_eq!(jobs[0].tasks[1].operation, OperationKind::CreateIndex);
    }

    #[test]
    fn test_migration_config_names_offending_entry() {
        let json = r#"{"jobs": [{"table": "users", "tasks": [{"operation": "delete_column", "sql": " "}]}]}"#;
        let err = MigrationConfig::from_json(json).unwrap_err();
        assert!(matches!(err, TablewrightError::Configuration { .. }));
        assert!(err.to_string().contains("job 0 (users) task 0"));

        let err = MigrationConfig::from_json("{ not json").unwrap_err();
        assert!(err.to_string().contains("Malformed"));

        let json = r#"{"jobs": [{"table": "bad table", "tasks": []}]}"#;
        assert!(MigrationConfig::from_json(json).is_err());
    }
}
