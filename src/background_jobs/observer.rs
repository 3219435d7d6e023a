//! Completion callbacks.
//!
//! Observers are invoked once for every job that reaches a terminal state.
//! There is no ordering between observers. Each call is isolated: an error
//! or a panic is logged and the remaining observers still run.

use super::job::Job;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

pub trait CompletionObserver: Send + Sync {
    fn on_job_finished(&self, job: &Job) -> anyhow::Result<()>;
}

impl<F> CompletionObserver for F
where
    F: Fn(&Job) -> anyhow::Result<()> + Send + Sync,
{
    fn on_job_finished(&self, job: &Job) -> anyhow::Result<()> {
        (self)(job)
    }
}

#[derive(Default, Clone)]
pub(crate) struct ObserverList {
    observers: Vec<Arc<dyn CompletionObserver>>,
}

impl ObserverList {
    pub fn push(&mut self, observer: Arc<dyn CompletionObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Notify every observer, returning how many of them failed.
    pub fn notify(&self, job: &Job) -> usize {
        let mut failures = 0;
        for (index, observer) in self.observers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| observer.on_job_finished(job))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(
                        "Completion observer #{} failed for job {} ({}): {:#}",
                        index, job.id, job.job_type, e
                    );
                }
                Err(_) => {
                    failures += 1;
                    warn!(
                        "Completion observer #{} panicked for job {} ({})",
                        index, job.id, job.job_type
                    );
                }
            }
        }
        failures
    }
}
