use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hunt_jobs::config::{AppConfig, CliConfig, FileConfig};
use hunt_jobs::status_store::{JobStatusSink, SqliteJobStore};
use hunt_jobs::{JobQueue, JobStatus};
use std::path::PathBuf;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

fn parse_status(s: &str) -> Result<JobStatus, String> {
    JobStatus::parse(s).ok_or_else(|| {
        format!("unknown status '{s}', expected one of queued, running, completed, failed, cancelled")
    })
}

#[derive(Parser, Debug)]
#[command(name = "job-engine", about = "Administration of the hunt job engine")]
struct CliArgs {
    /// Path to a TOML config file. Its values override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding jobs.db.
    #[clap(long, env = "JOBS_DB_DIR", value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Number of concurrent job workers.
    #[clap(long, env = "WORKER_COUNT")]
    pub worker_count: Option<usize>,

    /// Queue depth at which submissions log backlog warnings.
    #[clap(long, env = "MAX_BACKLOG")]
    pub max_backlog: Option<usize>,

    /// Maximum number of finished jobs kept in memory.
    #[clap(long, env = "RETAIN_COMPLETED")]
    pub retain_completed: Option<usize>,

    /// Seconds between cleanup runs (minimum 10).
    #[clap(long, env = "CLEANUP_INTERVAL_SECONDS")]
    pub cleanup_interval_secs: Option<u64>,

    /// Finished jobs older than this many seconds are reclaimed.
    #[clap(long, env = "CLEANUP_MAX_AGE_SECONDS")]
    pub cleanup_max_age_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Starts the engine on jobs.db, reconciling the previous run, and keeps
    /// it running until Ctrl-C.
    Run,

    /// Marks jobs left queued or running by a previous process as failed.
    Reconcile,

    /// Shows persisted job records, most recently updated first.
    History {
        #[clap(long, value_parser = parse_status)]
        status: Option<JobStatus>,

        #[clap(long, default_value_t = 20)]
        limit: usize,
    },

    /// Prints the resolved job queue settings.
    ShowConfig,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            worker_count: self.worker_count,
            max_backlog: self.max_backlog,
            retain_completed: self.retain_completed,
            cleanup_interval_secs: self.cleanup_interval_secs,
            cleanup_max_age_secs: self.cleanup_max_age_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    hunt_jobs::metrics::init_metrics();

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    match cli_args.command {
        Command::Run => {
            let queue = JobQueue::from_config(&config)?;
            queue.start();

            let mut status_report = tokio::time::interval(config.job_queue.cleanup_interval());
            status_report.tick().await;
            loop {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        result.context("Failed to listen for shutdown signal")?;
                        info!("Received shutdown signal");
                        break;
                    }
                    _ = status_report.tick() => {
                        let stats = queue.stats();
                        info!(
                            "Job queue: {} jobs, {} queued, {} active workers",
                            stats.total, stats.queued_depth, stats.active_workers
                        );
                    }
                }
            }
            queue.stop().await;
        }
        Command::Reconcile => {
            let store = SqliteJobStore::new(config.jobs_db_path())?;
            let count = store.mark_stale_jobs_failed()?;
            info!("Marked {} stale jobs as failed", count);
            println!("{count}");
        }
        Command::History { status, limit } => {
            let store = SqliteJobStore::new(config.jobs_db_path())?;
            let counts = store.count_by_status()?;
            let summary: Vec<String> = counts
                .iter()
                .map(|(status, count)| format!("{status}={count}"))
                .collect();
            println!("{}", summary.join(" "));

            for record in store.list_job_records(status, limit)? {
                let note = record.error.as_deref().or(record.message.as_deref());
                println!(
                    "{}  {:<14} {:<9} {:>5.1}%  {}  {}",
                    record.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    record.job_type,
                    record.status,
                    record.progress,
                    record.job_id,
                    note.unwrap_or_default()
                );
            }
        }
        Command::ShowConfig => {
            let settings = &config.job_queue;
            println!("db_dir                 = {:?}", config.db_dir);
            println!("worker_count           = {}", settings.worker_count);
            println!("max_backlog            = {}", settings.max_backlog);
            println!("retain_completed       = {}", settings.retain_completed);
            println!(
                "cleanup_interval_secs  = {} (effective {:?})",
                settings.cleanup_interval_secs,
                settings.cleanup_interval()
            );
            println!("cleanup_max_age_secs   = {}", settings.cleanup_max_age_secs);
            println!("poll_interval_ms       = {}", settings.poll_interval_ms);
            println!("shutdown_grace_secs    = {}", settings.shutdown_grace_secs);
        }
    }

    Ok(())
}
