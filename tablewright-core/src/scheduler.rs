//! Concurrent migration scheduler.
//!
//! Jobs are per-table units of ordered [`MigrationTask`]s. They travel over a
//! bounded queue to a fixed pool of tokio workers; one worker runs every task
//! of a job in priority order before pulling the next job, so statements for
//! one table never interleave. Jobs for different tables run in no
//! particular order.
//!
//! Each task moves through:
//!
//! ```text
//! Queued -> permission check -> Denied
//!                            -> DryRun
//!                            -> Executing -> Succeeded | Failed
//! ```
//!
//! Task errors are recorded in the task's [`MigrationResult`] and never stop
//! sibling tasks. [`MigrationScheduler::shutdown`] closes the queue and waits
//! for the workers to drain it. [`MigrationScheduler::abort`] stops workers
//! from starting further tasks; tasks not yet started are never recorded.

use crate::{
    Result,
    config::SchedulerConfig,
    error::TablewrightError,
    executor::Executor,
    planner::MigrationTask,
    policy::PermissionPolicy,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};

/// Per-table unit of work executed by a single worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationJob {
    /// Target table
    pub table: String,
    /// Tasks in execution order
    pub tasks: Vec<MigrationTask>,
}

impl MigrationJob {
    /// Creates a job, ordering its tasks by priority.
    ///
    /// Tasks with equal priority keep their given order.
    pub fn new(table: impl Into<String>, mut tasks: Vec<MigrationTask>) -> Self {
        tasks.sort_by_key(|t| t.priority);
        Self {
            table: table.into(),
            tasks,
        }
    }

    /// Wraps one task into a job of its own.
    pub fn single(task: MigrationTask) -> Self {
        Self {
            table: task.table.clone(),
            tasks: vec![task],
        }
    }
}

/// Terminal state of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The statement ran
    Succeeded,
    /// The database rejected the statement
    Failed,
    /// Rejected by the permission policy; never sent to the database
    Denied,
    /// Recorded as successful without execution
    DryRun,
}

/// Immutable record of one resolved task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    /// The task that ran
    pub task: MigrationTask,
    /// How the task ended
    pub outcome: TaskOutcome,
    /// `true` for succeeded and dry-run tasks
    pub success: bool,
    /// Failure or denial reason
    pub error: Option<String>,
    /// Wall time spent on the task
    pub duration_ms: u64,
    /// When the task finished
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time view of the scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Tasks submitted
    pub total: usize,
    /// Tasks with a recorded result
    pub completed: usize,
    /// Tasks that succeeded or were dry-run
    pub succeeded: usize,
    /// Tasks that failed or were denied
    pub failed: usize,
    /// Tasks submitted but not yet recorded
    pub pending: usize,
}

/// Final report returned when the scheduler shuts down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Counters at shutdown
    pub stats: SchedulerStats,
    /// Whether the policy was in dry-run mode
    pub dry_run: bool,
    /// Whether the run was aborted
    pub aborted: bool,
    /// Per-task results in completion order
    pub results: Vec<MigrationResult>,
}

impl MigrationReport {
    /// Whether every recorded task succeeded and nothing was left pending.
    pub fn is_success(&self) -> bool {
        self.stats.failed == 0 && self.stats.pending == 0
    }

    /// Results that did not succeed.
    pub fn failures(&self) -> impl Iterator<Item = &MigrationResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> SchedulerStats {
        let total = self.total.load(Ordering::SeqCst);
        let succeeded = self.succeeded.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        // completed is derived so a mid-run snapshot always adds up
        let completed = succeeded + failed;
        SchedulerStats {
            total,
            completed,
            succeeded,
            failed,
            pending: total.saturating_sub(completed),
        }
    }
}

struct Shared {
    db: Arc<dyn Executor>,
    policy: PermissionPolicy,
    counters: Counters,
    results: RwLock<Vec<MigrationResult>>,
}

impl Shared {
    fn record(&self, result: MigrationResult) {
        if result.success {
            self.counters.succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.results
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result);
    }
}

/// Bounded worker pool applying migration jobs under a permission policy.
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use tablewright_core::{
///     config::SchedulerConfig, executor, planner::MigrationTask,
///     policy::{OperationKind, PermissionPolicy}, scheduler::MigrationScheduler,
/// };
///
/// # async fn run() -> tablewright_core::Result<()> {
/// let db = executor::connect("sqlite::memory:").await?;
/// let scheduler = MigrationScheduler::start(db, PermissionPolicy::safe(), SchedulerConfig::default())?;
/// scheduler
///     .submit_task(MigrationTask::new(
///         "users",
///         Some("email".into()),
///         OperationKind::CreateColumn,
///         "ALTER TABLE users ADD COLUMN email TEXT",
///     ))
///     .await?;
/// let report = scheduler.shutdown().await;
/// assert_eq!(report.stats.total, 1);
/// # Ok(())
/// # }
/// ```
pub struct MigrationScheduler {
    sender: mpsc::Sender<MigrationJob>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
    abort: watch::Sender<bool>,
}

impl std::fmt::Debug for MigrationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationScheduler")
            .field("workers", &self.workers.len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl MigrationScheduler {
    /// Spawns the worker pool on the current tokio runtime.
    ///
    /// # Errors
    /// Returns a configuration error if `config` is invalid.
    pub fn start(
        db: Arc<dyn Executor>,
        policy: PermissionPolicy,
        config: SchedulerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let (abort, abort_rx) = watch::channel(false);

        tracing::info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            dry_run = policy.dry_run(),
            "Starting migration scheduler"
        );

        let shared = Arc::new(Shared {
            db,
            policy,
            counters: Counters::default(),
            results: RwLock::new(Vec::new()),
        });

        let workers = (0..config.workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&shared),
                    Arc::clone(&receiver),
                    abort_rx.clone(),
                ))
            })
            .collect();

        Ok(Self {
            sender,
            workers,
            shared,
            abort,
        })
    }

    /// Queues a job, waiting while the queue is full.
    ///
    /// # Errors
    /// Returns a validation error once the workers have stopped.
    pub async fn submit(&self, job: MigrationJob) -> Result<()> {
        let count = job.tasks.len();
        if count == 0 {
            return Ok(());
        }
        self.shared.counters.total.fetch_add(count, Ordering::SeqCst);
        if self.sender.send(job).await.is_err() {
            self.shared.counters.total.fetch_sub(count, Ordering::SeqCst);
            return Err(TablewrightError::validation(
                "migration scheduler is no longer accepting work",
            ));
        }
        Ok(())
    }

    /// Queues a single task as a one-step job.
    ///
    /// # Errors
    /// See [`MigrationScheduler::submit`].
    pub async fn submit_task(&self, task: MigrationTask) -> Result<()> {
        self.submit(MigrationJob::single(task)).await
    }

    /// Current counters.
    pub fn stats(&self) -> SchedulerStats {
        self.shared.counters.snapshot()
    }

    /// Copy of every result recorded so far.
    pub fn results(&self) -> Vec<MigrationResult> {
        self.shared
            .results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The policy every task is checked against.
    pub fn policy(&self) -> &PermissionPolicy {
        &self.shared.policy
    }

    /// Signals workers to stop before their next task.
    ///
    /// A task already executing runs to completion and is recorded; queued
    /// tasks are abandoned. Call [`MigrationScheduler::shutdown`] afterwards
    /// to wait for the workers.
    pub fn abort(&self) {
        tracing::warn!("Aborting migration scheduler");
        self.abort.send_replace(true);
    }

    /// Whether [`MigrationScheduler::abort`] has been called.
    pub fn is_aborted(&self) -> bool {
        *self.abort.borrow()
    }

    /// Closes the queue, waits for every worker to finish and returns the
    /// final report.
    pub async fn shutdown(self) -> MigrationReport {
        let Self {
            sender,
            workers,
            shared,
            abort,
        } = self;
        drop(sender);

        for outcome in futures::future::join_all(workers).await {
            if let Err(e) = outcome {
                tracing::error!("Migration worker terminated abnormally: {}", e);
            }
        }

        let stats = shared.counters.snapshot();
        let aborted = *abort.borrow();
        let results = shared
            .results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        tracing::info!(
            total = stats.total,
            succeeded = stats.succeeded,
            failed = stats.failed,
            pending = stats.pending,
            aborted,
            "Migration scheduler finished"
        );

        MigrationReport {
            stats,
            dry_run: shared.policy.dry_run(),
            aborted,
            results,
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    shared: Arc<Shared>,
    receiver: Arc<Mutex<mpsc::Receiver<MigrationJob>>>,
    mut abort: watch::Receiver<bool>,
) {
    tracing::debug!(worker_id, "Migration worker started");
    while let Some(job) = next_job(&receiver, &mut abort).await {
        tracing::debug!(worker_id, table = %job.table, tasks = job.tasks.len(), "Running migration job");
        for task in job.tasks {
            if *abort.borrow() {
                break;
            }
            let result = run_task(&shared, task).await;
            shared.record(result);
        }
    }
    tracing::debug!(worker_id, "Migration worker stopped");
}

async fn next_job(
    receiver: &Mutex<mpsc::Receiver<MigrationJob>>,
    abort: &mut watch::Receiver<bool>,
) -> Option<MigrationJob> {
    if *abort.borrow() {
        return None;
    }
    let mut receiver = receiver.lock().await;
    let aborted = tokio::select! {
        biased;
        signal = abort.wait_for(|aborted| *aborted) => signal.is_ok(),
        job = receiver.recv() => return job,
    };
    if aborted {
        None
    } else {
        // Abort handle dropped without signalling; keep draining.
        receiver.recv().await
    }
}

async fn run_task(shared: &Shared, task: MigrationTask) -> MigrationResult {
    let started = Instant::now();
    let timestamp = Utc::now();

    let (outcome, error) = if let Some(missing) = shared.policy.check(task.operation) {
        let denied = TablewrightError::permission_denied(missing, &task.table, task.column.clone());
        tracing::warn!(table = %task.table, operation = %task.operation, "{}", denied);
        (TaskOutcome::Denied, Some(denied.to_string()))
    } else if shared.policy.dry_run() {
        tracing::info!(
            table = %task.table,
            operation = %task.operation,
            sql = %task.sql,
            "Dry run: statement not executed"
        );
        (TaskOutcome::DryRun, None)
    } else {
        match shared.db.execute(&task.sql, &[]).await {
            Ok(_) => {
                tracing::debug!(table = %task.table, operation = %task.operation, "Statement applied");
                (TaskOutcome::Succeeded, None)
            }
            Err(e) => {
                tracing::error!(
                    table = %task.table,
                    operation = %task.operation,
                    column = task.column.as_deref().unwrap_or(""),
                    "Migration statement failed: {}",
                    e
                );
                (TaskOutcome::Failed, Some(e.to_string()))
            }
        }
    };

    MigrationResult {
        success: matches!(outcome, TaskOutcome::Succeeded | TaskOutcome::DryRun),
        outcome,
        error,
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        timestamp,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::OperationKind;

    fn task(operation: OperationKind, column: &str) -> MigrationTask {
        MigrationTask::new("t", Some(column.to_string()), operation, format!("-- {column}"))
    }

    #[test]
    fn test_job_orders_by_priority_stably() {
        let job = MigrationJob::new(
            "t",
            vec![
                task(OperationKind::CreateIndex, "a"),
                task(OperationKind::CreateColumn, "b"),
                task(OperationKind::CreateColumn, "c"),
                task(OperationKind::DeleteIndex, "d"),
            ],
        );
        let order: Vec<_> = job.tasks.iter().filter_map(|t| t.column.as_deref()).collect();
        assert_eq!(order, vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn test_stats_snapshot_consistent_while_recording() {
        let counters = Arc::new(Counters::default());
        counters.total.store(4000, Ordering::SeqCst);

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let counters = Arc::clone(&counters);
                scope.spawn(move || {
                    for i in 0..1000 {
                        let counter = if (worker + i) % 3 == 0 {
                            &counters.failed
                        } else {
                            &counters.succeeded
                        };
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
            for _ in 0..1000 {
                let stats = counters.snapshot();
                assert_eq!(stats.succeeded + stats.failed, stats.completed);
                assert_eq!(stats.completed + stats.pending, stats.total);
            }
        });

        let stats = counters.snapshot();
        assert_eq!(stats.completed, 4000);
        assert_eq!(stats.pending, 0);
    }

    #[test]
    fn test_report_success_requires_no_pending() {
        let mut report = MigrationReport {
            stats: SchedulerStats {
                total: 2,
                completed: 2,
                succeeded: 2,
                ..SchedulerStats::default()
            },
            dry_run: false,
            aborted: false,
            results: Vec::new(),
        };
        assert!(report.is_success());
        report.stats.pending = 1;
        assert!(!report.is_success());
    }
}
