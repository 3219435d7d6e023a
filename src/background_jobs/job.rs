use super::params::{dedupe_signature, JobParams, WORKLOAD_KEY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;

/// Progress a job is floored at once a worker picks it up.
pub const RUNNING_PROGRESS_FLOOR: f64 = 1.0;

/// Message recorded on jobs cancelled through `JobQueue::cancel_job`.
pub const CANCELLED_BY_CALLER: &str = "cancelled by caller";

/// Kind of background analysis a job performs.
///
/// Each type documents the param keys its handler expects; see
/// [`super::params`] for the typed structs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// `{ dataset_id }`
    Triage,
    /// `{ hunt_id, hostname? }`
    HostProfile,
    /// `{ hunt_id }`
    Report,
    /// `{ dataset_id }`
    Anomaly,
    /// `{ dataset_id, question, mode? }`
    Query,
    /// `{ hunt_id }`
    HostInventory,
    /// `{ dataset_id }`
    KeywordScan,
    /// `{ dataset_id }`
    IocExtract,
}

impl JobType {
    pub const ALL: [JobType; 8] = [
        JobType::Triage,
        JobType::HostProfile,
        JobType::Report,
        JobType::Anomaly,
        JobType::Query,
        JobType::HostInventory,
        JobType::KeywordScan,
        JobType::IocExtract,
    ];

    /// Job types that make up the per-dataset analysis pipeline.
    pub const PIPELINE_STAGES: [JobType; 4] = [
        JobType::Triage,
        JobType::Anomaly,
        JobType::KeywordScan,
        JobType::IocExtract,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Triage => "TRIAGE",
            JobType::HostProfile => "HOST_PROFILE",
            JobType::Report => "REPORT",
            JobType::Anomaly => "ANOMALY",
            JobType::Query => "QUERY",
            JobType::HostInventory => "HOST_INVENTORY",
            JobType::KeywordScan => "KEYWORD_SCAN",
            JobType::IocExtract => "IOC_EXTRACT",
        }
    }

    /// Case-insensitive parse of the wire name.
    pub fn parse(s: &str) -> Option<Self> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
    }

    pub fn is_pipeline_stage(&self) -> bool {
        JobType::PIPELINE_STAGES.contains(self)
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a job, as handed out to callers and observers.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: f64,
    pub message: Option<String>,
    pub error: Option<String>,
    pub result: Option<JsonValue>,
    pub params: JobParams,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub elapsed_ms: i64,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The dataset this job belongs to, if any.
    pub fn workload_key(&self) -> Option<&str> {
        self.params.get(WORKLOAD_KEY).and_then(JsonValue::as_str)
    }
}

/// How a dispatched job ended.
#[derive(Debug)]
pub(crate) enum JobOutcome {
    Completed(JsonValue),
    Failed(String),
    Cancelled,
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    progress: f64,
    message: Option<String>,
    error: Option<String>,
    result: Option<JsonValue>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

/// A registered job: immutable identity plus lock-guarded mutable state.
///
/// Transitions are only applied from the states that allow them, so a
/// terminal job can never be moved again. That is what makes caller
/// cancellation win over a handler outcome that lands later.
pub(crate) struct JobEntry {
    pub id: String,
    pub job_type: JobType,
    pub params: JobParams,
    pub signature: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Submission order, used to break `created_at` ties.
    pub seq: u64,
    cancel_token: CancellationToken,
    state: RwLock<JobState>,
}

impl JobEntry {
    pub fn new(job_type: JobType, params: JobParams, seq: u64) -> Self {
        let signature = dedupe_signature(&params);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_type,
            params,
            signature,
            created_at: Utc::now(),
            seq,
            cancel_token: CancellationToken::new(),
            state: RwLock::new(JobState {
                status: JobStatus::Queued,
                progress: 0.0,
                message: None,
                error: None,
                result: None,
                started_at: None,
                completed_at: None,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, JobState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, JobState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn status(&self) -> JobStatus {
        self.read().status
    }

    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    /// Whether this job collapses a new submission of `job_type` with `signature`.
    pub fn dedupes(&self, job_type: JobType, signature: &str) -> bool {
        self.job_type == job_type
            && self.signature.as_deref() == Some(signature)
            && self.is_active()
    }

    /// Completion time for terminal jobs, creation time otherwise.
    pub fn age_reference(&self) -> DateTime<Utc> {
        self.read().completed_at.unwrap_or(self.created_at)
    }

    pub fn snapshot(&self) -> Job {
        let state = self.read();
        let end = state.completed_at.unwrap_or_else(Utc::now);
        let start = state.started_at.unwrap_or(self.created_at);
        Job {
            id: self.id.clone(),
            job_type: self.job_type,
            status: state.status,
            progress: state.progress,
            message: state.message.clone(),
            error: state.error.clone(),
            result: state.result.clone(),
            params: self.params.clone(),
            created_at: self.created_at,
            started_at: state.started_at,
            completed_at: state.completed_at,
            elapsed_ms: (end - start).num_milliseconds().max(0),
        }
    }

    /// QUEUED -> RUNNING. Fails if the job was cancelled or already picked up.
    pub fn try_start(&self) -> bool {
        let mut state = self.write();
        if state.status != JobStatus::Queued || self.cancel_token.is_cancelled() {
            return false;
        }
        state.status = JobStatus::Running;
        state.started_at = Some(Utc::now());
        state.progress = state.progress.max(RUNNING_PROGRESS_FLOOR);
        true
    }

    /// QUEUED -> FAILED, for jobs that can never be dispatched.
    pub fn fail_unstarted(&self, error: String) -> bool {
        let mut state = self.write();
        if state.status != JobStatus::Queued {
            return false;
        }
        state.status = JobStatus::Failed;
        state.message = Some(error.clone());
        state.error = Some(error);
        state.completed_at = Some(Utc::now());
        true
    }

    /// RUNNING -> terminal. Returns false when the job already left RUNNING,
    /// in which case the outcome is dropped.
    pub fn finish(&self, outcome: JobOutcome) -> bool {
        let mut state = self.write();
        if state.status != JobStatus::Running {
            return false;
        }
        match outcome {
            JobOutcome::Completed(result) => {
                state.status = JobStatus::Completed;
                state.progress = 100.0;
                state.result = Some(result);
            }
            JobOutcome::Failed(error) => {
                state.status = JobStatus::Failed;
                state.error = Some(error);
            }
            JobOutcome::Cancelled => {
                state.status = JobStatus::Cancelled;
                if state.message.is_none() {
                    state.message = Some("cancelled by handler".to_string());
                }
                self.cancel_token.cancel();
            }
        }
        state.completed_at = Some(Utc::now());
        true
    }

    /// Any active state -> CANCELLED. Fires the cancellation signal even if a
    /// handler is mid-flight; the handler decides whether to observe it.
    pub fn cancel(&self) -> bool {
        let mut state = self.write();
        if state.status.is_terminal() {
            return false;
        }
        self.cancel_token.cancel();
        state.status = JobStatus::Cancelled;
        state.message = Some(CANCELLED_BY_CALLER.to_string());
        state.completed_at = Some(Utc::now());
        true
    }

    /// Progress is clamped to 0-100. Ignored once the job is terminal.
    pub fn set_progress(&self, progress: f64) {
        let mut state = self.write();
        if state.status.is_active() && progress.is_finite() {
            state.progress = progress.clamp(0.0, 100.0);
        }
    }

    pub fn set_message(&self, message: String) {
        let mut state = self.write();
        if state.status.is_active() {
            state.message = Some(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::params::params_from_json;
    use serde_json::json;

    fn entry(job_type: JobType) -> JobEntry {
        JobEntry::new(job_type, params_from_json(json!({"dataset_id": "d1"})), 1)
    }

    #[test]
    fn test_job_type_round_trips_through_wire_name() {
        for job_type in JobType::ALL {
            assert_eq!(JobType::parse(job_type.as_str()), Some(job_type));
        }
        assert_eq!(JobType::parse("host_profile"), Some(JobType::HostProfile));
        assert_eq!(JobType::parse("nope"), None);
    }

    #[test]
    fn test_job_type_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&JobType::KeywordScan).unwrap();
        assert_eq!(json, "\"KEYWORD_SCAN\"");
    }

    #[test]
    fn test_pipeline_stages() {
        assert!(JobType::Triage.is_pipeline_stage());
        assert!(JobType::IocExtract.is_pipeline_stage());
        assert!(!JobType::HostProfile.is_pipeline_stage());
        assert!(!JobType::Report.is_pipeline_stage());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_new_entry_is_queued() {
        let entry = entry(JobType::Triage);
        let job = entry.snapshot();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0.0);
        assert!(job.started_at.is_none());
        assert_eq!(job.workload_key(), Some("d1"));
        assert_eq!(entry.signature.as_deref(), Some("dataset_id=d1"));
    }

    #[test]
    fn test_start_then_complete() {
        let entry = entry(JobType::Triage);
        assert!(entry.try_start());
        assert!(!entry.try_start());

        let running = entry.snapshot();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.progress, RUNNING_PROGRESS_FLOOR);
        assert!(running.started_at.is_some());

        assert!(entry.finish(JobOutcome::Completed(json!({"hosts": 3}))));
        let done = entry.snapshot();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100.0);
        assert_eq!(done.result, Some(json!({"hosts": 3})));
        assert!(done.completed_at.is_some());
        assert!(done.error.is_none());
    }

    #[test]
    fn test_failure_records_error() {
        let entry = entry(JobType::Anomaly);
        entry.try_start();
        assert!(entry.finish(JobOutcome::Failed("model unreachable".to_string())));
        let job = entry.snapshot();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("model unreachable"));
    }

    #[test]
    fn test_cancel_queued_job_prevents_start() {
        let entry = entry(JobType::Triage);
        assert!(entry.cancel());
        assert!(entry.cancel_token().is_cancelled());
        assert!(!entry.try_start());

        let job = entry.snapshot();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.message.as_deref(), Some(CANCELLED_BY_CALLER));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_cancel_wins_over_late_handler_outcome() {
        let entry = entry(JobType::Triage);
        entry.try_start();
        assert!(entry.cancel());
        assert!(!entry.finish(JobOutcome::Completed(json!(null))));
        assert_eq!(entry.status(), JobStatus::Cancelled);
        assert!(entry.snapshot().result.is_none());
    }

    #[test]
    fn test_terminal_job_cannot_be_cancelled() {
        let entry = entry(JobType::Triage);
        entry.try_start();
        entry.finish(JobOutcome::Failed("boom".to_string()));
        assert!(!entry.cancel());
        assert_eq!(entry.status(), JobStatus::Failed);
    }

    #[test]
    fn test_fail_unstarted_only_from_queued() {
        let entry = entry(JobType::Report);
        assert!(entry.fail_unstarted("no handler".to_string()));
        assert_eq!(entry.status(), JobStatus::Failed);
        assert!(!entry.fail_unstarted("again".to_string()));
    }

    #[test]
    fn test_progress_is_clamped_and_frozen_when_terminal() {
        let entry = entry(JobType::Triage);
        entry.try_start();
        entry.set_progress(250.0);
        assert_eq!(entry.snapshot().progress, 100.0);
        entry.set_progress(-3.0);
        assert_eq!(entry.snapshot().progress, 0.0);

        entry.finish(JobOutcome::Failed("x".to_string()));
        entry.set_progress(42.0);
        entry.set_message("late".to_string());
        let job = entry.snapshot();
        assert_eq!(job.progress, 0.0);
        assert!(job.message.is_none());
    }

    #[test]
    fn test_dedupes_only_active_same_type() {
        let entry = entry(JobType::Triage);
        assert!(entry.dedupes(JobType::Triage, "dataset_id=d1"));
        assert!(!entry.dedupes(JobType::Anomaly, "dataset_id=d1"));
        assert!(!entry.dedupes(JobType::Triage, "dataset_id=d2"));
        entry.cancel();
        assert!(!entry.dedupes(JobType::Triage, "dataset_id=d1"));
    }
}
