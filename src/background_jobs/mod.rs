//! Background job scheduling and execution.
//!
//! A [`JobQueue`] accepts typed jobs, collapses duplicate submissions of
//! still-active work, and runs them on a fixed pool of workers. Finished jobs
//! are announced to completion observers (see [`PipelineTracker`]) and
//! mirrored to a [`crate::status_store::JobStatusSink`].

mod cleanup;
mod context;
mod handler;
mod job;
mod observer;
pub mod params;
mod pipeline;
mod queue;
mod worker;

pub use context::JobContext;
pub use handler::{JobError, JobHandler};
pub use job::{Job, JobStatus, JobType, CANCELLED_BY_CALLER, RUNNING_PROGRESS_FLOOR};
pub use observer::CompletionObserver;
pub use params::{
    params_from_json, DatasetParams, HostProfileParams, HuntParams, JobParams, QueryParams,
};
pub use pipeline::{PipelineOutcome, PipelineReporter, PipelineTracker};
pub use queue::{JobQueue, JobQueueStats, WeakJobQueue};
