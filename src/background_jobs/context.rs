use super::handler::JobError;
use super::job::{Job, JobEntry, JobType};
use super::params::JobParams;
use super::queue::JobQueue;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Context provided to a handler while it executes a job.
///
/// Gives access to the job's params, lets the handler report progress, and
/// exposes the job's cancellation signal. The queue handle allows submitting
/// follow-on jobs.
#[derive(Clone)]
pub struct JobContext {
    entry: Arc<JobEntry>,
    queue: JobQueue,
}

impl JobContext {
    pub(crate) fn new(entry: Arc<JobEntry>, queue: JobQueue) -> Self {
        Self { entry, queue }
    }

    pub fn job_id(&self) -> &str {
        &self.entry.id
    }

    pub fn job_type(&self) -> JobType {
        self.entry.job_type
    }

    pub fn params(&self) -> &JobParams {
        &self.entry.params
    }

    /// Parse the params into the typed struct for this job type.
    pub fn parse_params<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        serde_json::from_value(serde_json::Value::Object(self.entry.params.clone()))
            .map_err(|e| JobError::InvalidParams(e.to_string()))
    }

    pub fn set_progress(&self, progress: f64) {
        self.entry.set_progress(progress);
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.entry.set_message(message.into());
    }

    /// Snapshot of the job as currently recorded.
    pub fn snapshot(&self) -> Job {
        self.entry.snapshot()
    }

    /// Check if cancellation has been requested.
    ///
    /// Handlers should check this between units of work and return
    /// `JobError::Cancelled` if true.
    pub fn is_cancelled(&self) -> bool {
        self.entry.cancel_token().is_cancelled()
    }

    /// Resolves once the job is cancelled.
    pub async fn cancelled(&self) {
        self.entry.cancel_token().cancelled().await
    }

    /// Submit a follow-on job.
    pub fn submit(&self, job_type: JobType, params: JobParams) -> Job {
        self.queue.submit(job_type, params)
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }
}
