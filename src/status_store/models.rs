use crate::background_jobs::{Job, JobStatus, JobType};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Error recorded on jobs failed by restart reconciliation.
pub const RECOVERED_AFTER_RESTART: &str = "Job was interrupted (recovered after restart)";

/// Status fields mirrored to the sink after every status change.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatusUpdate {
    pub job_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: f64,
    pub message: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobStatusUpdate {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            job_type: job.job_type,
            status: job.status,
            progress: job.progress,
            message: job.message.clone(),
            error: job.error.clone(),
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// A job record as stored by `SqliteJobStore`.
#[derive(Debug, Clone, Serialize)]
pub struct PersistedJob {
    pub job_id: String,
    /// Kept as text so records written by other versions still load.
    pub job_type: String,
    pub status: JobStatus,
    pub progress: f64,
    pub message: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
