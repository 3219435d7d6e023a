//! Hunt Jobs Library
//!
//! Background job engine for long-running hunt analysis work, plus its
//! configuration and persistent status store.

pub mod background_jobs;
pub mod config;
pub mod metrics;
pub mod status_store;

// Re-export commonly used types for convenience
pub use background_jobs::{
    CompletionObserver, Job, JobContext, JobError, JobHandler, JobQueue, JobStatus, JobType,
    PipelineOutcome, PipelineTracker,
};
pub use config::{AppConfig, JobQueueSettings};
pub use status_store::{JobStatusSink, NullStatusSink, SqliteJobStore};
