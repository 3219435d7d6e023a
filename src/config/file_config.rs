use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub db_dir: Option<String>,

    pub job_queue: Option<JobQueueConfig>,
}

/// `[job_queue]` table. Every field overrides the matching CLI/env value.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobQueueConfig {
    pub worker_count: Option<usize>,
    pub max_backlog: Option<usize>,
    pub retain_completed: Option<usize>,
    pub cleanup_interval_secs: Option<u64>,
    pub cleanup_max_age_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
