//! End-to-end tests for status mirroring and restart reconciliation.

mod common;

use common::{dataset, test_settings, wait_for_status, wait_until, RecordingSink, DATASET_1};
use hunt_jobs::status_store::{JobStatusSink, JobStatusUpdate, RECOVERED_AFTER_RESTART};
use hunt_jobs::config::{AppConfig, CliConfig};
use hunt_jobs::{JobContext, JobError, JobQueue, JobStatus, JobType, SqliteJobStore};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn stale_record(job_id: &str, status: JobStatus) -> JobStatusUpdate {
    JobStatusUpdate {
        job_id: job_id.to_string(),
        job_type: JobType::Triage,
        status,
        progress: 30.0,
        message: Some("working".to_string()),
        error: None,
        started_at: Some(chrono::Utc::now()),
        completed_at: None,
    }
}

#[tokio::test]
async fn test_restart_fails_previous_in_flight_jobs() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("jobs.db");

    // Left behind by a previous process
    {
        let previous = SqliteJobStore::new(&db_path).unwrap();
        previous.upsert(&stale_record("old-running", JobStatus::Running)).unwrap();
        previous.upsert(&stale_record("old-queued", JobStatus::Queued)).unwrap();
        let mut done = stale_record("old-done", JobStatus::Completed);
        done.completed_at = Some(chrono::Utc::now());
        previous.upsert(&done).unwrap();
    }

    let store = Arc::new(SqliteJobStore::new(&db_path).unwrap());
    let queue = JobQueue::new(test_settings(1), store.clone());
    queue.register_handler(JobType::Triage, |_ctx: JobContext| async {
        Ok::<_, JobError>(json!({ "hosts": 12 }))
    });

    // Submitted before start, must survive reconciliation
    let job = queue.submit(JobType::Triage, dataset(DATASET_1));
    queue.start();
    wait_for_status(&queue, &job.id, JobStatus::Completed).await;
    queue.stop().await;

    for id in ["old-running", "old-queued"] {
        let record = store.get_job_record(id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some(RECOVERED_AFTER_RESTART));
        assert!(record.completed_at.is_some());
    }
    let done = store.get_job_record("old-done").unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);

    let record = store.get_job_record(&job.id).unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.job_type, "TRIAGE");
    assert_eq!(record.progress, 100.0);
    assert!(record.started_at.is_some());

    let counts = store.count_by_status().unwrap();
    assert_eq!(counts.get(&JobStatus::Failed), Some(&2));
    assert_eq!(counts.get(&JobStatus::Completed), Some(&2));
}

#[tokio::test]
async fn test_failures_and_cancellations_are_persisted() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteJobStore::new(temp_dir.path().join("jobs.db")).unwrap());
    let queue = JobQueue::new(test_settings(1), store.clone());
    queue.register_handler(JobType::Anomaly, |_ctx: JobContext| async {
        Err::<serde_json::Value, _>(JobError::Failed("baseline missing".to_string()))
    });

    let cancelled = queue.submit(JobType::Triage, dataset("to-cancel"));
    queue.cancel_job(&cancelled.id);
    queue.start();
    let failed = queue.submit(JobType::Anomaly, dataset(DATASET_1));
    wait_for_status(&queue, &failed.id, JobStatus::Failed).await;
    wait_until("failure to be persisted", || {
        store
            .get_job_record(&failed.id)
            .unwrap()
            .map_or(false, |r| r.status == JobStatus::Failed)
    })
    .await;
    queue.stop().await;

    let record = store.get_job_record(&failed.id).unwrap().unwrap();
    assert_eq!(record.error.as_deref(), Some("baseline missing"));

    let record = store.get_job_record(&cancelled.id).unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);
    assert_eq!(record.message.as_deref(), Some("cancelled by caller"));

    let failed_only = store.list_job_records(Some(JobStatus::Failed), 10).unwrap();
    assert_eq!(failed_only.len(), 1);
    assert_eq!(failed_only[0].job_id, failed.id);
}

#[tokio::test]
async fn test_reconciliation_runs_once_per_queue() {
    let sink = Arc::new(RecordingSink::with_stale_jobs(3));
    let queue = JobQueue::new(test_settings(1), sink.clone());

    queue.start();
    queue.start();
    queue.stop().await;
    queue.start();
    queue.stop().await;

    assert_eq!(sink.reconcile_calls(), 1);
}

#[tokio::test]
async fn test_submission_alone_is_not_synced() {
    let sink = Arc::new(RecordingSink::default());
    let queue = JobQueue::new(test_settings(1), sink.clone());

    queue.submit(JobType::Triage, dataset(DATASET_1));
    assert!(sink.updates().is_empty());
}

#[tokio::test]
async fn test_queue_from_config_persists_to_jobs_db() {
    let temp_dir = TempDir::new().unwrap();
    let cli = CliConfig {
        db_dir: Some(temp_dir.path().to_path_buf()),
        worker_count: Some(1),
        ..Default::default()
    };
    let config = AppConfig::resolve(&cli, None).unwrap();
    SqliteJobStore::new(config.jobs_db_path())
        .unwrap()
        .upsert(&stale_record("crashed", JobStatus::Running))
        .unwrap();

    let queue = JobQueue::from_config(&config).unwrap();
    queue.register_handler(JobType::Triage, |_ctx: JobContext| async {
        Ok::<_, JobError>(json!({ "hosts": 1 }))
    });
    queue.start();
    let job = queue.submit(JobType::Triage, dataset(DATASET_1));
    wait_for_status(&queue, &job.id, JobStatus::Completed).await;
    queue.stop().await;

    let store = SqliteJobStore::new(config.jobs_db_path()).unwrap();
    let crashed = store.get_job_record("crashed").unwrap().unwrap();
    assert_eq!(crashed.status, JobStatus::Failed);
    let record = store.get_job_record(&job.id).unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Completed);
}
