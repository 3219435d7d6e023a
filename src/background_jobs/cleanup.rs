//! Reclamation of finished jobs.
//!
//! Two independent policies bound the registry: an age limit, measured from
//! completion, and a cap on how many finished jobs are retained. Queued and
//! running jobs are never touched.

use super::queue::JobQueue;
use crate::metrics;
use chrono::Utc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

impl JobQueue {
    /// Remove terminal jobs that finished at least `max_age` ago. Returns the
    /// number of jobs removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let mut jobs = self.inner.write_jobs();
        let before = jobs.len();
        jobs.retain(|_, entry| !(entry.status().is_terminal() && entry.age_reference() <= cutoff));
        before - jobs.len()
    }

    /// Keep at most `keep` terminal jobs, evicting the oldest by creation
    /// time. Returns the number of jobs removed.
    pub fn enforce_retention(&self, keep: usize) -> usize {
        let mut jobs = self.inner.write_jobs();

        let mut terminal: Vec<_> = jobs
            .values()
            .filter(|entry| entry.status().is_terminal())
            .map(|entry| (entry.created_at, entry.seq, entry.id.clone()))
            .collect();
        if terminal.len() <= keep {
            return 0;
        }

        terminal.sort();
        let excess = terminal.len() - keep;
        for (_, _, id) in terminal.into_iter().take(excess) {
            jobs.remove(&id);
        }
        excess
    }

    /// Apply both policies with the configured limits.
    pub fn sweep(&self) -> usize {
        let settings = self.settings();
        let aged = self.cleanup(settings.cleanup_max_age());
        let evicted = self.enforce_retention(settings.retain_completed);
        let removed = aged + evicted;

        if removed > 0 {
            metrics::record_jobs_reclaimed(removed);
            info!(
                "Job cleanup removed {} jobs ({} expired, {} over retention cap)",
                removed, aged, evicted
            );
        } else {
            debug!("Job cleanup found nothing to remove");
        }
        removed
    }
}

pub(crate) async fn run_cleanup_loop(queue: JobQueue, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(queue.settings().cleanup_interval());
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                queue.sweep();
            }
        }
    }
    debug!("Job cleanup loop stopped");
}
