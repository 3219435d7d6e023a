use super::cleanup;
use super::handler::{HandlerRegistry, JobHandler};
use super::job::{Job, JobEntry, JobStatus, JobType};
use super::observer::{CompletionObserver, ObserverList};
use super::params::{dedupe_signature, JobParams, WORKLOAD_KEY};
use super::worker;
use crate::config::{AppConfig, JobQueueSettings};
use crate::metrics;
use crate::status_store::{JobStatusSink, JobStatusUpdate, NullStatusSink, SqliteJobStore};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Point-in-time counters of the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobQueueStats {
    /// Jobs currently registered, terminal ones included until reclaimed.
    pub total: usize,
    pub queued_depth: usize,
    pub active_workers: usize,
    pub by_status: BTreeMap<JobStatus, usize>,
}

/// Tasks spawned by `start()`.
struct PoolRuntime {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub(crate) struct QueueInner {
    pub settings: JobQueueSettings,
    jobs: RwLock<HashMap<String, Arc<JobEntry>>>,
    pending: Mutex<VecDeque<String>>,
    pub pending_notify: Notify,
    handlers: RwLock<HandlerRegistry>,
    observers: RwLock<ObserverList>,
    status_sink: Arc<dyn JobStatusSink>,
    pub active_workers: AtomicUsize,
    next_seq: AtomicU64,
    runtime: Mutex<Option<PoolRuntime>>,
    reconciled: AtomicBool,
}

impl QueueInner {
    pub fn read_jobs(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<JobEntry>>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write_jobs(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<JobEntry>>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_runtime(&self) -> MutexGuard<'_, Option<PoolRuntime>> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn entry(&self, job_id: &str) -> Option<Arc<JobEntry>> {
        self.read_jobs().get(job_id).cloned()
    }

    /// Next queued job id, in submission order.
    pub fn pop_pending(&self) -> Option<String> {
        let mut pending = self.lock_pending();
        let next = pending.pop_front();
        if next.is_some() {
            metrics::set_queue_depth(pending.len());
        }
        next
    }

    pub fn queued_depth(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn handler_for(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_type)
    }

    /// Mirror `job` to the status sink. Failures are logged only.
    pub fn sync_status(&self, job: &Job) {
        if let Err(e) = self.status_sink.upsert(&JobStatusUpdate::from(job)) {
            metrics::record_status_sync_error();
            warn!(
                "Failed to sync status of job {} ({}) as {}: {:#}",
                job.id, job.job_type, job.status, e
            );
        }
    }

    /// Called exactly once per job, right after it became terminal.
    pub fn publish_terminal(&self, job: &Job) {
        self.sync_status(job);
        metrics::record_job_finished(job.job_type.as_str(), job.status.as_str());

        // Observers may submit jobs, so none of our locks is held while they run.
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let failures = observers.notify(job);
        if failures > 0 {
            debug!(
                "{} completion observer(s) failed for job {}",
                failures, job.id
            );
        }
    }
}

/// The background job engine.
///
/// Cheap to clone: clones share the same registry, queue and workers. Jobs
/// can be submitted before `start()`; they wait in the queue until workers
/// are running. `start()` must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct JobQueue {
    pub(crate) inner: Arc<QueueInner>,
}

/// Non-owning handle to a [`JobQueue`], for observers registered on the
/// queue they look into.
#[derive(Clone)]
pub struct WeakJobQueue {
    inner: Weak<QueueInner>,
}

impl WeakJobQueue {
    pub fn upgrade(&self) -> Option<JobQueue> {
        self.inner.upgrade().map(|inner| JobQueue { inner })
    }
}

impl JobQueue {
    pub fn new(settings: JobQueueSettings, status_sink: Arc<dyn JobStatusSink>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                settings,
                jobs: RwLock::new(HashMap::new()),
                pending: Mutex::new(VecDeque::new()),
                pending_notify: Notify::new(),
                handlers: RwLock::new(HandlerRegistry::default()),
                observers: RwLock::new(ObserverList::default()),
                status_sink,
                active_workers: AtomicUsize::new(0),
                next_seq: AtomicU64::new(0),
                runtime: Mutex::new(None),
                reconciled: AtomicBool::new(false),
            }),
        }
    }

    /// A queue that keeps status in memory only.
    pub fn in_memory(settings: JobQueueSettings) -> Self {
        Self::new(settings, Arc::new(NullStatusSink))
    }

    /// A queue mirroring status into `jobs.db` under the configured directory.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let store = SqliteJobStore::new(config.jobs_db_path())?;
        info!("Job status store at {:?}", config.jobs_db_path());
        Ok(Self::new(config.job_queue.clone(), Arc::new(store)))
    }

    pub fn downgrade(&self) -> WeakJobQueue {
        WeakJobQueue {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn settings(&self) -> &JobQueueSettings {
        &self.inner.settings
    }

    pub fn register_handler<H>(&self, job_type: JobType, handler: H)
    where
        H: JobHandler + 'static,
    {
        let replaced = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(job_type, Arc::new(handler));
        if replaced {
            warn!("Replaced handler for job type {}", job_type);
        } else {
            debug!("Registered handler for job type {}", job_type);
        }
    }

    pub fn has_handler(&self, job_type: JobType) -> bool {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(job_type)
    }

    /// Add an observer invoked once for every job that reaches a terminal
    /// state.
    pub fn on_completion<O>(&self, observer: O)
    where
        O: CompletionObserver + 'static,
    {
        let mut observers = self
            .inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        observers.push(Arc::new(observer));
        debug!("Registered completion observer #{}", observers.len() - 1);
    }

    /// Submit a job, or return the active job it duplicates.
    ///
    /// Never rejects: past `max_backlog` a warning is logged and the job is
    /// still queued. Use [`JobQueue::can_accept`] to shed load beforehand.
    pub fn submit(&self, job_type: JobType, params: JobParams) -> Job {
        let inner = &self.inner;

        let entry = {
            let mut jobs = inner.write_jobs();
            if let Some(signature) = dedupe_signature(&params) {
                if let Some(existing) = jobs.values().find(|e| e.dedupes(job_type, &signature)) {
                    debug!(
                        "Submission of {} [{}] matches active job {}",
                        job_type, signature, existing.id
                    );
                    metrics::record_job_deduplicated(job_type.as_str());
                    return existing.snapshot();
                }
            }

            let seq = inner.next_seq.fetch_add(1, Ordering::Relaxed);
            let entry = Arc::new(JobEntry::new(job_type, params, seq));
            jobs.insert(entry.id.clone(), Arc::clone(&entry));
            entry
        };

        let depth = {
            let mut pending = inner.lock_pending();
            pending.push_back(entry.id.clone());
            pending.len()
        };
        inner.pending_notify.notify_one();

        metrics::record_job_submitted(job_type.as_str());
        metrics::set_queue_depth(depth);

        if depth >= inner.settings.max_backlog {
            warn!(
                "Job queue backlog at {} (threshold {}), accepting {} job {} anyway",
                depth, inner.settings.max_backlog, job_type, entry.id
            );
        }
        info!("Queued job {} ({})", entry.id, job_type);

        entry.snapshot()
    }

    /// Submit one job per pipeline stage for `dataset_id`.
    pub fn submit_pipeline(&self, dataset_id: &str) -> Vec<Job> {
        JobType::PIPELINE_STAGES
            .into_iter()
            .map(|stage| {
                let mut params = JobParams::new();
                params.insert(
                    WORKLOAD_KEY.to_string(),
                    JsonValue::String(dataset_id.to_string()),
                );
                self.submit(stage, params)
            })
            .collect()
    }

    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.inner.entry(job_id).map(|e| e.snapshot())
    }

    /// Registered jobs whose `dataset_id` is `workload_key`, in submission order.
    pub fn jobs_for_workload(&self, workload_key: &str) -> Vec<Job> {
        let mut entries: Vec<Arc<JobEntry>> = self
            .inner
            .read_jobs()
            .values()
            .filter(|e| {
                e.params.get(WORKLOAD_KEY).and_then(JsonValue::as_str) == Some(workload_key)
            })
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.iter().map(|e| e.snapshot()).collect()
    }

    /// Jobs matching the filters, newest first.
    pub fn list_jobs(
        &self,
        status: Option<JobStatus>,
        job_type: Option<JobType>,
        limit: usize,
    ) -> Vec<Job> {
        let mut entries: Vec<Arc<JobEntry>> = self
            .inner
            .read_jobs()
            .values()
            .filter(|e| job_type.map_or(true, |t| e.job_type == t))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.seq.cmp(&a.seq))
        });

        entries
            .iter()
            .map(|e| e.snapshot())
            .filter(|job| status.map_or(true, |s| job.status == s))
            .take(limit)
            .collect()
    }

    /// Cancel a queued or running job. Returns false if the job is unknown or
    /// already terminal.
    ///
    /// A queued job will never reach its handler. A running handler is not
    /// interrupted; it sees the signal through its context, and whatever it
    /// returns afterwards is discarded.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        let Some(entry) = self.inner.entry(job_id) else {
            return false;
        };
        if !entry.cancel() {
            return false;
        }

        {
            let mut pending = self.inner.lock_pending();
            pending.retain(|id| id != job_id);
            metrics::set_queue_depth(pending.len());
        }

        info!("Cancelled job {} ({})", entry.id, entry.job_type);
        self.inner.publish_terminal(&entry.snapshot());
        true
    }

    pub fn stats(&self) -> JobQueueStats {
        let mut by_status = BTreeMap::new();
        let total = {
            let jobs = self.inner.read_jobs();
            for entry in jobs.values() {
                *by_status.entry(entry.status()).or_insert(0) += 1;
            }
            jobs.len()
        };

        JobQueueStats {
            total,
            queued_depth: self.inner.queued_depth(),
            active_workers: self.inner.active_workers.load(Ordering::SeqCst),
            by_status,
        }
    }

    pub fn queued_depth(&self) -> usize {
        self.inner.queued_depth()
    }

    pub fn is_backlogged(&self) -> bool {
        self.inner.queued_depth() >= self.inner.settings.max_backlog
    }

    /// Whether `reserve` more jobs fit under the backlog threshold.
    pub fn can_accept(&self, reserve: usize) -> bool {
        self.inner.queued_depth().saturating_add(reserve) < self.inner.settings.max_backlog
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_runtime().is_some()
    }

    /// Spawn the workers and the cleanup loop. Calling it again while running
    /// does nothing.
    ///
    /// The first start of a queue also fails any job the status sink still
    /// holds as queued or running from a previous process.
    pub fn start(&self) {
        let mut runtime = self.inner.lock_runtime();
        if runtime.is_some() {
            debug!("Job queue already running");
            return;
        }

        self.reconcile_previous_run();

        let mut worker_count = self.inner.settings.worker_count;
        if worker_count == 0 {
            warn!("Job queue configured with 0 workers, using 1");
            worker_count = 1;
        }

        let shutdown = CancellationToken::new();
        let mut handles = Vec::with_capacity(worker_count + 1);
        for worker_id in 0..worker_count {
            handles.push(tokio::spawn(worker::run_worker(
                self.clone(),
                worker_id,
                shutdown.clone(),
            )));
        }
        handles.push(tokio::spawn(cleanup::run_cleanup_loop(
            self.clone(),
            shutdown.clone(),
        )));

        *runtime = Some(PoolRuntime { shutdown, handles });
        info!(
            "Job queue started with {} workers (backlog threshold {}, retaining {} finished jobs)",
            worker_count, self.inner.settings.max_backlog, self.inner.settings.retain_completed
        );
    }

    /// Signal workers and the cleanup loop to exit and wait for them.
    ///
    /// Running handlers get `shutdown_grace_secs` to return before their
    /// task is aborted and the job is recorded as failed.
    pub async fn stop(&self) {
        let Some(runtime) = self.inner.lock_runtime().take() else {
            return;
        };

        info!("Stopping job queue...");
        runtime.shutdown.cancel();
        for result in futures::future::join_all(runtime.handles).await {
            if let Err(e) = result {
                error!("Job queue task ended abnormally: {}", e);
            }
        }
        info!("Job queue stopped");
    }

    fn reconcile_previous_run(&self) {
        if self.inner.reconciled.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.inner.status_sink.mark_stale_jobs_failed() {
            Ok(count) if count > 0 => {
                info!("Marked {} stale jobs as failed from previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to mark stale jobs: {:#}", e);
            }
        }
    }
}
