//! Schema inspection and migration runner.
//!
//! Connects to a database, reads the live catalog of a table, or applies a
//! JSON migration source through the concurrent scheduler under an explicit
//! permission policy.
//!
//! # Safety Guarantees
//! - Every statement passes the permission policy before it runs
//! - `--dry-run` never sends DDL to the database
//! - Credentials in connection strings are never logged

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tablewright_core::{
    DialectFactory, MigrationConfig, MigrationReport, MigrationScheduler,
    error::redact_database_url,
    executor::{self, detect_backend},
    logging::init_logging,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "tablewright")]
#[command(about = "Schema inspection and policy-gated migration runner")]
#[command(version)]
#[command(long_about = "
tablewright - Schema synchronization toolkit

Reads live table catalogs and applies migration jobs concurrently, one
worker per table job, under a permission policy that can deny destructive
operations or turn the whole run into a dry run.

SUPPORTED DATABASES:
- PostgreSQL (postgres://)
- MySQL / MariaDB (mysql://) [if compiled with --features mysql]
- SQLite (sqlite:// or .db/.sqlite files)

EXAMPLES:
  tablewright --database-url sqlite://app.db inspect --table users
  tablewright --database-url postgres://localhost/app apply --config migrate.json --dry-run
  tablewright dialects
")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    /// Database connection URL
    #[arg(
        long,
        global = true,
        env = "DATABASE_URL",
        help = "Database connection string (credentials will be sanitized in logs)"
    )]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the live catalog of a table as JSON
    Inspect(InspectArgs),
    /// Apply a JSON migration source
    Apply(ApplyArgs),
    /// List registered dialect identifiers
    Dialects,
}

#[derive(Args)]
struct InspectArgs {
    /// Table to inspect
    #[arg(short, long)]
    table: String,
}

#[derive(Args)]
struct ApplyArgs {
    /// Migration source file
    #[arg(short, long)]
    config: PathBuf,

    /// Record statements without executing them
    #[arg(long)]
    dry_run: bool,

    /// Use the safe policy preset, denying column and index deletion
    #[arg(long)]
    safe: bool,

    /// Override the configured worker count
    #[arg(long)]
    workers: Option<usize>,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all output except errors")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose, cli.global.quiet)?;

    let factory = DialectFactory::with_builtins();
    match &cli.command {
        Command::Inspect(args) => inspect(require_url(&cli)?, args, &factory).await,
        Command::Apply(args) => apply(require_url(&cli)?, args, &factory).await,
        Command::Dialects => {
            for name in factory.names() {
                let canonical = factory.require(name)?.name();
                println!("{name}\t{canonical}");
            }
            Ok(())
        }
    }
}

fn require_url(cli: &Cli) -> anyhow::Result<&str> {
    cli.database_url
        .as_deref()
        .context("Database URL is required (--database-url or DATABASE_URL)")
}

/// Prints the catalog snapshot of one table.
async fn inspect(database_url: &str, args: &InspectArgs, factory: &DialectFactory) -> anyhow::Result<()> {
    info!("Target: {}", redact_database_url(database_url));
    let backend = detect_backend(database_url)?;
    let dialect = factory.for_backend(backend);
    let db = executor::connect(database_url).await?;

    let snapshot = dialect.snapshot(db.as_ref(), &args.table).await?;
    if !snapshot.exists {
        warn!("Table '{}' does not exist", args.table);
    }
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

/// Runs every configured job and reports per-task outcomes.
async fn apply(database_url: &str, args: &ApplyArgs, factory: &DialectFactory) -> anyhow::Result<()> {
    let mut config = MigrationConfig::from_file(&args.config).await?;
    if let Some(workers) = args.workers {
        config.scheduler = config.scheduler.with_workers(workers);
        config.validate()?;
    }
    if args.safe {
        config.policy.enforce_safe();
    }
    if args.dry_run {
        config.policy.dry_run = true;
    }

    let backend = detect_backend(database_url)?;
    if let Some(expected) = &config.dialect {
        let expected = factory.require(expected)?;
        if expected.name() != backend.dialect_name() {
            bail!(
                "Migration source targets {} but the database is {}",
                expected.name(),
                backend.dialect_name()
            );
        }
    }

    info!("Target: {}", redact_database_url(database_url));
    info!(
        "Applying {} tasks in {} jobs from {}",
        config.task_count(),
        config.jobs.len(),
        args.config.display()
    );

    let db = executor::connect(database_url).await?;
    let scheduler = MigrationScheduler::start(db, config.policy.to_policy(), config.scheduler)?;
    for job in config.to_jobs() {
        scheduler.submit(job).await?;
    }
    let report = scheduler.shutdown().await;

    write_report(&report, args.output.as_ref()).await?;

    if !report.is_success() {
        for failure in report.failures() {
            warn!(
                "{} on {}: {}",
                failure.task.operation,
                failure.task.table,
                failure.error.as_deref().unwrap_or("unknown error")
            );
        }
        bail!(
            "{} of {} migration tasks failed",
            report.stats.failed,
            report.stats.total
        );
    }
    info!("Applied {} tasks", report.stats.succeeded);
    Ok(())
}

async fn write_report(report: &MigrationReport, output: Option<&PathBuf>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    match output {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
