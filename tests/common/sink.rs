use anyhow::Result;
use hunt_jobs::status_store::{JobStatusSink, JobStatusUpdate};
use hunt_jobs::JobStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Status sink that keeps every update in memory.
#[derive(Default)]
pub struct RecordingSink {
    updates: Mutex<Vec<JobStatusUpdate>>,
    stale_jobs: AtomicUsize,
    reconcile_calls: AtomicUsize,
}

#[allow(dead_code)]
impl RecordingSink {
    /// A sink that reports `count` stale jobs on reconciliation.
    pub fn with_stale_jobs(count: usize) -> Self {
        let sink = Self::default();
        sink.stale_jobs.store(count, Ordering::SeqCst);
        sink
    }

    pub fn updates(&self) -> Vec<JobStatusUpdate> {
        self.updates.lock().unwrap().clone()
    }

    /// Statuses synced for `job_id`, in order.
    pub fn statuses_for(&self, job_id: &str) -> Vec<JobStatus> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.job_id == job_id)
            .map(|u| u.status)
            .collect()
    }

    pub fn reconcile_calls(&self) -> usize {
        self.reconcile_calls.load(Ordering::SeqCst)
    }
}

impl JobStatusSink for RecordingSink {
    fn upsert(&self, update: &JobStatusUpdate) -> Result<()> {
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }

    fn mark_stale_jobs_failed(&self) -> Result<usize> {
        self.reconcile_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.stale_jobs.swap(0, Ordering::SeqCst))
    }
}
