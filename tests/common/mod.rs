//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{dataset, test_queue, wait_for_status};
//! use hunt_jobs::{JobStatus, JobType};
//!
//! #[tokio::test]
//! async fn test_no_handler() {
//!     let queue = test_queue(1);
//!     queue.start();
//!     let job = queue.submit(JobType::Report, dataset("d1"));
//!     wait_for_status(&queue, &job.id, JobStatus::Failed).await;
//! }
//! ```

mod constants;
mod sink;

pub use constants::*;
pub use sink::RecordingSink;

use hunt_jobs::background_jobs::{params_from_json, JobParams};
use hunt_jobs::config::JobQueueSettings;
use hunt_jobs::{Job, JobQueue, JobStatus};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Settings tuned for fast tests.
pub fn test_settings(worker_count: usize) -> JobQueueSettings {
    JobQueueSettings {
        worker_count,
        poll_interval_ms: POLL_INTERVAL_MS,
        shutdown_grace_secs: 1,
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn test_queue(worker_count: usize) -> JobQueue {
    JobQueue::in_memory(test_settings(worker_count))
}

#[allow(dead_code)]
pub fn recording_queue(worker_count: usize) -> (JobQueue, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let queue = JobQueue::new(test_settings(worker_count), sink.clone());
    (queue, sink)
}

pub fn dataset(dataset_id: &str) -> JobParams {
    params_from_json(json!({ "dataset_id": dataset_id }))
}

#[allow(dead_code)]
pub fn hunt(hunt_id: &str) -> JobParams {
    params_from_json(json!({ "hunt_id": hunt_id }))
}

/// Poll until the job reaches `status`, panicking after `WAIT_TIMEOUT`.
pub async fn wait_for_status(queue: &JobQueue, job_id: &str, status: JobStatus) -> Job {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        let job = queue.get_job(job_id);
        if let Some(job) = &job {
            if job.status == status {
                return job.clone();
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "job {job_id} did not reach {status} within {WAIT_TIMEOUT:?}, last seen {:?}",
                job.map(|j| j.status)
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `condition` holds, panicking after `WAIT_TIMEOUT`.
#[allow(dead_code)]
pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
