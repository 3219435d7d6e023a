mod file_config;

pub use file_config::{FileConfig, JobQueueConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Cleanup never runs more often than this, whatever is configured.
pub const MIN_CLEANUP_INTERVAL_SECS: u64 = 10;

/// CLI arguments that can be used for config resolution.
/// Engine knobs left unset fall back to `JobQueueSettings::default()`.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub worker_count: Option<usize>,
    pub max_backlog: Option<usize>,
    pub retain_completed: Option<usize>,
    pub cleanup_interval_secs: Option<u64>,
    pub cleanup_max_age_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub job_queue: JobQueueSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let defaults = JobQueueSettings::default();
        let jq_file = file.job_queue.unwrap_or_default();
        let job_queue = JobQueueSettings {
            worker_count: jq_file
                .worker_count
                .or(cli.worker_count)
                .unwrap_or(defaults.worker_count),
            max_backlog: jq_file
                .max_backlog
                .or(cli.max_backlog)
                .unwrap_or(defaults.max_backlog),
            retain_completed: jq_file
                .retain_completed
                .or(cli.retain_completed)
                .unwrap_or(defaults.retain_completed),
            cleanup_interval_secs: jq_file
                .cleanup_interval_secs
                .or(cli.cleanup_interval_secs)
                .unwrap_or(defaults.cleanup_interval_secs),
            cleanup_max_age_secs: jq_file
                .cleanup_max_age_secs
                .or(cli.cleanup_max_age_secs)
                .unwrap_or(defaults.cleanup_max_age_secs),
            poll_interval_ms: jq_file
                .poll_interval_ms
                .unwrap_or(defaults.poll_interval_ms),
            shutdown_grace_secs: jq_file
                .shutdown_grace_secs
                .unwrap_or(defaults.shutdown_grace_secs),
        };

        Ok(Self { db_dir, job_queue })
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.db_dir.join("jobs.db")
    }
}

/// Knobs of the job engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobQueueSettings {
    /// Number of concurrent worker loops.
    pub worker_count: usize,
    /// Queue depth at which submissions start logging backlog warnings.
    pub max_backlog: usize,
    /// Upper bound on terminal jobs kept in memory.
    pub retain_completed: usize,
    pub cleanup_interval_secs: u64,
    /// Terminal jobs older than this are reclaimed by cleanup.
    pub cleanup_max_age_secs: u64,
    /// How long an idle worker waits before re-checking the queue.
    pub poll_interval_ms: u64,
    /// How long `stop()` lets a running handler finish before aborting it.
    pub shutdown_grace_secs: u64,
}

impl Default for JobQueueSettings {
    fn default() -> Self {
        Self {
            worker_count: 3,
            max_backlog: 2000,
            retain_completed: 3000,
            cleanup_interval_secs: 60,
            cleanup_max_age_secs: 3600,
            poll_interval_ms: 500,
            shutdown_grace_secs: 30,
        }
    }
}

impl JobQueueSettings {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(MIN_CLEANUP_INTERVAL_SECS))
    }

    pub fn cleanup_max_age(&self) -> Duration {
        Duration::from_secs(self.cleanup_max_age_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
