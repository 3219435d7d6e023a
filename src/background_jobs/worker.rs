use super::context::JobContext;
use super::handler::JobError;
use super::job::{JobEntry, JobOutcome, JobStatus};
use super::queue::JobQueue;
use crate::metrics;
use serde_json::Value as JsonValue;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type HandlerTask = JoinHandle<Result<JsonValue, JobError>>;

/// One worker loop: take the next queued job, run it, repeat until shutdown.
pub(crate) async fn run_worker(queue: JobQueue, worker_id: usize, shutdown: CancellationToken) {
    debug!("Worker {} started", worker_id);
    let poll_interval = queue.settings().poll_interval();

    while !shutdown.is_cancelled() {
        let Some(job_id) = queue.inner.pop_pending() else {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = queue.inner.pending_notify.notified() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
            continue;
        };

        dispatch(&queue, &job_id, &shutdown).await;
    }

    debug!("Worker {} stopped", worker_id);
}

async fn dispatch(queue: &JobQueue, job_id: &str, shutdown: &CancellationToken) {
    let inner = &queue.inner;

    let Some(entry) = inner.entry(job_id) else {
        debug!("Job {} no longer registered, skipping", job_id);
        return;
    };
    if entry.status() != JobStatus::Queued {
        debug!(
            "Job {} ({}) is {}, skipping",
            entry.id,
            entry.job_type,
            entry.status()
        );
        return;
    }

    let Some(handler) = inner.handler_for(entry.job_type) else {
        let error = JobError::NoHandler(entry.job_type).to_string();
        if entry.fail_unstarted(error) {
            warn!(
                "No handler registered for job {} ({}), marking failed",
                entry.id, entry.job_type
            );
            inner.publish_terminal(&entry.snapshot());
        }
        return;
    };

    if !entry.try_start() {
        debug!("Job {} ({}) was cancelled before start", entry.id, entry.job_type);
        return;
    }
    inner.sync_status(&entry.snapshot());
    // A cancel landing during the write above may have been mirrored first.
    if entry.status().is_terminal() {
        inner.sync_status(&entry.snapshot());
    }

    let active = inner.active_workers.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_active_workers(active);
    info!("Running job {} ({})", entry.id, entry.job_type);

    let start_time = Instant::now();
    let ctx = JobContext::new(Arc::clone(&entry), queue.clone());
    let task = tokio::spawn(async move { handler.run(ctx).await });
    let outcome = await_outcome(&entry, task, shutdown, queue.settings().shutdown_grace()).await;
    let elapsed = start_time.elapsed();

    let active = inner.active_workers.fetch_sub(1, Ordering::SeqCst) - 1;
    metrics::set_active_workers(active);
    metrics::record_job_duration(entry.job_type.as_str(), elapsed);

    if !entry.finish(outcome) {
        debug!(
            "Job {} ({}) was cancelled while running, discarding handler outcome",
            entry.id, entry.job_type
        );
        return;
    }

    let job = entry.snapshot();
    match job.status {
        JobStatus::Completed => {
            info!("Job {} ({}) completed in {:?}", job.id, job.job_type, elapsed)
        }
        JobStatus::Cancelled => {
            info!("Job {} ({}) was cancelled after {:?}", job.id, job.job_type, elapsed)
        }
        _ => error!(
            "Job {} ({}) failed after {:?}: {}",
            job.id,
            job.job_type,
            elapsed,
            job.error.as_deref().unwrap_or("unknown error")
        ),
    }
    inner.publish_terminal(&job);
}

/// Wait for the handler task. On shutdown the job is signalled and given
/// `grace` to return before its task is aborted.
async fn await_outcome(
    entry: &JobEntry,
    mut task: HandlerTask,
    shutdown: &CancellationToken,
    grace: Duration,
) -> JobOutcome {
    tokio::select! {
        result = &mut task => return outcome_from(result),
        _ = shutdown.cancelled() => {}
    }

    info!(
        "Shutdown requested, waiting up to {:?} for job {} ({})",
        grace, entry.id, entry.job_type
    );
    entry.cancel_token().cancel();

    match tokio::time::timeout(grace, &mut task).await {
        Ok(Ok(Err(JobError::Cancelled))) => JobOutcome::Failed(JobError::Interrupted.to_string()),
        Ok(result) => outcome_from(result),
        Err(_) => {
            task.abort();
            warn!(
                "Job {} ({}) did not finish within {:?} of shutdown, aborted",
                entry.id, entry.job_type, grace
            );
            JobOutcome::Failed(JobError::Interrupted.to_string())
        }
    }
}

fn outcome_from(result: Result<Result<JsonValue, JobError>, JoinError>) -> JobOutcome {
    match result {
        Ok(Ok(value)) => JobOutcome::Completed(value),
        Ok(Err(JobError::Cancelled)) => JobOutcome::Cancelled,
        Ok(Err(e)) => JobOutcome::Failed(e.to_string()),
        Err(e) if e.is_panic() => {
            JobOutcome::Failed(format!("handler panicked: {}", panic_message(e)))
        }
        Err(e) => JobOutcome::Failed(format!("handler task failed: {}", e)),
    }
}

fn panic_message(err: JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
