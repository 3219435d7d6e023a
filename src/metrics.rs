use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all job engine metrics
const PREFIX: &str = "hunt_jobs";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref JOBS_SUBMITTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_submitted_total"), "Jobs accepted as new submissions"),
        &["job_type"]
    ).expect("Failed to create submitted_total metric");

    pub static ref JOBS_DEDUPLICATED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_deduplicated_total"),
            "Submissions collapsed onto an already active job"
        ),
        &["job_type"]
    ).expect("Failed to create deduplicated_total metric");

    pub static ref JOBS_FINISHED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_finished_total"), "Jobs that reached a terminal state"),
        &["job_type", "status"]
    ).expect("Failed to create finished_total metric");

    pub static ref JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_duration_seconds"),
            "Handler execution time in seconds"
        )
        .buckets(vec![0.1, 1.0, 5.0, 15.0, 60.0, 180.0, 600.0, 1800.0]),
        &["job_type"]
    ).expect("Failed to create duration_seconds metric");

    pub static ref QUEUE_DEPTH: Gauge = Gauge::new(
        format!("{PREFIX}_queue_depth"),
        "Jobs waiting for a worker"
    ).expect("Failed to create queue_depth metric");

    pub static ref ACTIVE_WORKERS: Gauge = Gauge::new(
        format!("{PREFIX}_active_workers"),
        "Workers currently executing a handler"
    ).expect("Failed to create active_workers metric");

    pub static ref JOBS_RECLAIMED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_reclaimed_total"),
        "Terminal jobs removed by cleanup"
    ).expect("Failed to create reclaimed_total metric");

    pub static ref STATUS_SYNC_ERRORS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_status_sync_errors_total"),
        "Failed writes to the job status sink"
    ).expect("Failed to create status_sync_errors_total metric");
}

/// Register all metrics. Safe to call more than once.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(JOBS_SUBMITTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_DEDUPLICATED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_FINISHED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(QUEUE_DEPTH.clone()));
    let _ = REGISTRY.register(Box::new(ACTIVE_WORKERS.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_RECLAIMED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(STATUS_SYNC_ERRORS_TOTAL.clone()));
}

pub fn record_job_submitted(job_type: &str) {
    JOBS_SUBMITTED_TOTAL.with_label_values(&[job_type]).inc();
}

pub fn record_job_deduplicated(job_type: &str) {
    JOBS_DEDUPLICATED_TOTAL.with_label_values(&[job_type]).inc();
}

pub fn record_job_finished(job_type: &str, status: &str) {
    JOBS_FINISHED_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
}

pub fn record_job_duration(job_type: &str, duration: Duration) {
    JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration.as_secs_f64());
}

pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(depth as f64);
}

pub fn set_active_workers(count: usize) {
    ACTIVE_WORKERS.set(count as f64);
}

pub fn record_jobs_reclaimed(count: usize) {
    JOBS_RECLAIMED_TOTAL.inc_by(count as f64);
}

pub fn record_status_sync_error() {
    STATUS_SYNC_ERRORS_TOTAL.inc();
}

/// Text exposition of every registered metric.
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => String::from_utf8(buffer).unwrap_or_default(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            String::new()
        }
    }
}
