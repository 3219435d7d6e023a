//! Durable mirror of job status.
//!
//! The queue's in-memory records are authoritative; the sink only receives a
//! best-effort copy of every status change, and is asked once per process
//! start to fail records left in flight by a previous run.

mod models;
mod schema;
mod sqlite_job_store;

pub use models::{JobStatusUpdate, PersistedJob, RECOVERED_AFTER_RESTART};
pub use schema::{BASE_DB_VERSION, JOB_STORE_SCHEMAS};
pub use sqlite_job_store::SqliteJobStore;

use anyhow::Result;

#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait JobStatusSink: Send + Sync {
    /// Insert or replace the record for `update.job_id`.
    fn upsert(&self, update: &JobStatusUpdate) -> Result<()>;

    /// Mark every record still queued or running as failed. Returns how many
    /// records were touched.
    fn mark_stale_jobs_failed(&self) -> Result<usize>;
}

/// Sink that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStatusSink;

impl JobStatusSink for NullStatusSink {
    fn upsert(&self, _update: &JobStatusUpdate) -> Result<()> {
        Ok(())
    }

    fn mark_stale_jobs_failed(&self) -> Result<usize> {
        Ok(0)
    }
}
