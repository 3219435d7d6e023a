use super::context::JobContext;
use super::job::JobType;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Errors a job can end with.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("no handler registered for job type {0}")]
    NoHandler(JobType),

    #[error("invalid job params: {0}")]
    InvalidParams(String),

    /// Handler failure, recorded on the job verbatim.
    #[error("{0}")]
    Failed(String),

    #[error("job was cancelled")]
    Cancelled,

    #[error("interrupted by shutdown")]
    Interrupted,
}

impl From<anyhow::Error> for JobError {
    fn from(e: anyhow::Error) -> Self {
        JobError::Failed(format!("{:#}", e))
    }
}

/// Executor for one job type.
///
/// Handlers run on a worker, in their own task, with no timeout imposed by
/// the queue. Long-running handlers should poll `ctx.is_cancelled()` (or
/// select on `ctx.cancelled()`) and return `JobError::Cancelled` to honour
/// caller cancellation.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> Result<JsonValue, JobError>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonValue, JobError>> + Send + 'static,
{
    async fn run(&self, ctx: JobContext) -> Result<JsonValue, JobError> {
        (self)(ctx).await
    }
}

/// Job type to handler mapping.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    /// Registers `handler`, returning true if it replaced an existing one.
    pub fn register(&mut self, job_type: JobType, handler: Arc<dyn JobHandler>) -> bool {
        self.handlers.insert(job_type, handler).is_some()
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    pub fn contains(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }
}
