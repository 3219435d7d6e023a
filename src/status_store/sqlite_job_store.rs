use super::models::{JobStatusUpdate, PersistedJob, RECOVERED_AFTER_RESTART};
use super::schema::{BASE_DB_VERSION, JOB_STORE_SCHEMAS};
use super::JobStatusSink;
use crate::background_jobs::JobStatus;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Job status sink backed by a single SQLite file.
#[derive(Clone)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open jobs database")?;
        let latest = JOB_STORE_SCHEMAS
            .last()
            .context("No job store schema defined")?;

        if is_new_db {
            info!("Creating new jobs database at {:?}", path);
            latest.create(&conn)?;
        } else {
            let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
            let db_version = raw_version - BASE_DB_VERSION as i64;

            if db_version < 1 {
                anyhow::bail!(
                    "Jobs database version {} is invalid (expected >= 1)",
                    db_version
                );
            }

            let schema = JOB_STORE_SCHEMAS
                .iter()
                .find(|s| s.version as i64 == db_version)
                .with_context(|| format!("Unknown jobs database version {}", db_version))?;
            schema.validate(&conn).with_context(|| {
                format!(
                    "Jobs database schema validation failed for version {}",
                    db_version
                )
            })?;

            if (db_version as usize) < latest.version {
                info!(
                    "Migrating jobs database from version {} to {}",
                    db_version, latest.version
                );
                Self::migrate(&mut conn, db_version as usize)?;
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate(conn: &mut Connection, from_version: usize) -> Result<()> {
        let tx = conn.transaction()?;
        let mut current = from_version;
        for schema in JOB_STORE_SCHEMAS.iter().filter(|s| s.version > from_version) {
            if let Some(migration_fn) = schema.migration {
                migration_fn(&tx).with_context(|| {
                    format!("Failed to run migration to version {}", schema.version)
                })?;
            }
            current = schema.version;
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + current),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    fn row_to_persisted_job(row: &rusqlite::Row) -> rusqlite::Result<PersistedJob> {
        let status_str: String = row.get("status")?;
        let started_at: Option<String> = row.get("started_at")?;
        let completed_at: Option<String> = row.get("completed_at")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(PersistedJob {
            job_id: row.get("job_id")?,
            job_type: row.get("job_type")?,
            status: JobStatus::parse(&status_str).unwrap_or(JobStatus::Failed),
            progress: row.get("progress")?,
            message: row.get("message")?,
            error: row.get("error")?,
            started_at: started_at.as_deref().and_then(Self::parse_datetime),
            completed_at: completed_at.as_deref().and_then(Self::parse_datetime),
            updated_at: Self::parse_datetime(&updated_at).unwrap_or_else(Utc::now),
        })
    }

    pub fn get_job_record(&self, job_id: &str) -> Result<Option<PersistedJob>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT job_id, job_type, status, progress, message, error,
                    started_at, completed_at, updated_at
             FROM job_records WHERE job_id = ?1",
        )?;
        let record = stmt
            .query_row(params![job_id], Self::row_to_persisted_job)
            .optional()?;
        Ok(record)
    }

    /// Most recently updated records first.
    pub fn list_job_records(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<PersistedJob>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT job_id, job_type, status, progress, message, error,
                    started_at, completed_at, updated_at
             FROM job_records
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY updated_at DESC
             LIMIT ?2",
        )?;
        let records = stmt
            .query_map(
                params![status.map(|s| s.as_str()), limit as i64],
                Self::row_to_persisted_job,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn count_by_status(&self) -> Result<BTreeMap<JobStatus, usize>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM job_records GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = BTreeMap::new();
        for (status, count) in rows {
            if let Some(status) = JobStatus::parse(&status) {
                *counts.entry(status).or_insert(0) += count as usize;
            }
        }
        Ok(counts)
    }
}

impl JobStatusSink for SqliteJobStore {
    fn upsert(&self, update: &JobStatusUpdate) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO job_records
                (job_id, job_type, status, progress, message, error,
                 started_at, completed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(job_id) DO UPDATE SET
                job_type = excluded.job_type,
                status = excluded.status,
                progress = excluded.progress,
                message = excluded.message,
                error = excluded.error,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                updated_at = excluded.updated_at",
            params![
                update.job_id,
                update.job_type.as_str(),
                update.status.as_str(),
                update.progress,
                update.message,
                update.error,
                update.started_at.as_ref().map(Self::format_datetime),
                update.completed_at.as_ref().map(Self::format_datetime),
                Self::format_datetime(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn mark_stale_jobs_failed(&self) -> Result<usize> {
        let conn = self.lock();
        let now = Self::format_datetime(&Utc::now());

        let count = conn.execute(
            "UPDATE job_records
             SET status = ?1, error = ?2, completed_at = ?3, updated_at = ?3
             WHERE status IN (?4, ?5)",
            params![
                JobStatus::Failed.as_str(),
                RECOVERED_AFTER_RESTART,
                now,
                JobStatus::Queued.as_str(),
                JobStatus::Running.as_str(),
            ],
        )?;

        Ok(count)
    }
}
