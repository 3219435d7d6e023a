//! Pipeline completion tracking.
//!
//! A pipeline group is the set of registered stage jobs sharing a
//! `dataset_id`. The tracker looks the group up in the queue whenever one of
//! its stage jobs finishes and reports once no member is queued or running
//! and every stage has run. Jobs already counted in a report are left out of
//! later groups, so a rerun of the same dataset reports again.

use super::job::{Job, JobStatus, JobType};
use super::observer::CompletionObserver;
use super::queue::{JobQueue, WeakJobQueue};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// Every stage completed.
    Completed,
    /// At least one stage failed or was cancelled.
    CompletedWithErrors,
}

impl PipelineOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineOutcome::Completed => "completed",
            PipelineOutcome::CompletedWithErrors => "completed_with_errors",
        }
    }
}

impl fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives the aggregate outcome of a finished pipeline, e.g. to update the
/// dataset's processing status.
pub trait PipelineReporter: Send + Sync {
    fn report(&self, dataset_id: &str, outcome: PipelineOutcome) -> anyhow::Result<()>;
}

impl<F> PipelineReporter for F
where
    F: Fn(&str, PipelineOutcome) -> anyhow::Result<()> + Send + Sync,
{
    fn report(&self, dataset_id: &str, outcome: PipelineOutcome) -> anyhow::Result<()> {
        (self)(dataset_id, outcome)
    }
}

/// Completion observer that aggregates pipeline stages per dataset.
pub struct PipelineTracker {
    queue: WeakJobQueue,
    stages: Vec<JobType>,
    reporter: Arc<dyn PipelineReporter>,
    /// Per dataset, ids of stage jobs already counted in a report.
    reported: Mutex<HashMap<String, HashSet<String>>>,
}

impl PipelineTracker {
    /// Track the default stages, [`JobType::PIPELINE_STAGES`], of jobs in `queue`.
    pub fn new<R>(queue: &JobQueue, reporter: R) -> Self
    where
        R: PipelineReporter + 'static,
    {
        Self::with_stages(queue, &JobType::PIPELINE_STAGES, reporter)
    }

    pub fn with_stages<R>(queue: &JobQueue, stages: &[JobType], reporter: R) -> Self
    where
        R: PipelineReporter + 'static,
    {
        Self {
            queue: queue.downgrade(),
            stages: stages.to_vec(),
            reporter: Arc::new(reporter),
            reported: Mutex::new(HashMap::new()),
        }
    }

    /// Datasets with reported jobs still registered in the queue.
    pub fn tracked_datasets(&self) -> usize {
        self.reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Close the group of `dataset_id` if it is complete. `registered` is the
    /// queue's view of the dataset's jobs.
    fn record(
        &self,
        dataset_id: &str,
        job: &Job,
        registered: Vec<Job>,
    ) -> Option<PipelineOutcome> {
        let mut members: Vec<Job> = registered
            .into_iter()
            .filter(|j| self.stages.contains(&j.job_type))
            .collect();
        if !members.iter().any(|m| m.id == job.id) {
            members.push(job.clone());
        }

        let mut reported = self.reported.lock().unwrap_or_else(PoisonError::into_inner);
        let seen = reported.entry(dataset_id.to_string()).or_default();
        // Ids of reclaimed jobs are forgotten.
        seen.retain(|id| members.iter().any(|m| &m.id == id));
        members.retain(|m| !seen.contains(&m.id));

        let outcome = self.group_outcome(&members);
        if outcome.is_some() {
            seen.extend(members.iter().map(|m| m.id.clone()));
        }
        if seen.is_empty() {
            reported.remove(dataset_id);
        }
        outcome
    }

    /// Outcome of a group whose members are all terminal and cover every
    /// stage. The latest run of a stage decides its status.
    fn group_outcome(&self, members: &[Job]) -> Option<PipelineOutcome> {
        if let Some(active) = members.iter().find(|m| m.status.is_active()) {
            debug!(
                "Pipeline group still waiting on job {} ({}, {})",
                active.id, active.job_type, active.status
            );
            return None;
        }

        let mut latest: HashMap<JobType, JobStatus> = HashMap::new();
        for member in members {
            latest.insert(member.job_type, member.status);
        }
        if !self.stages.iter().all(|stage| latest.contains_key(stage)) {
            return None;
        }

        if latest.values().all(|s| *s == JobStatus::Completed) {
            Some(PipelineOutcome::Completed)
        } else {
            Some(PipelineOutcome::CompletedWithErrors)
        }
    }
}

impl CompletionObserver for PipelineTracker {
    fn on_job_finished(&self, job: &Job) -> anyhow::Result<()> {
        if !job.is_terminal() || !self.stages.contains(&job.job_type) {
            return Ok(());
        }
        let Some(dataset_id) = job.workload_key() else {
            return Ok(());
        };
        let Some(queue) = self.queue.upgrade() else {
            return Ok(());
        };

        match self.record(dataset_id, job, queue.jobs_for_workload(dataset_id)) {
            Some(outcome) => {
                info!("Pipeline for dataset {} finished: {}", dataset_id, outcome);
                self.reporter.report(dataset_id, outcome)
            }
            None => Ok(()),
        }
    }
}
