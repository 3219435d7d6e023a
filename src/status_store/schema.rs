//! SQLite schema definitions for the job status database.

use anyhow::{bail, Result};
use rusqlite::Connection;

/// Offset added to the schema version stored in `PRAGMA user_version`, so a
/// database created by something else is never mistaken for ours.
pub const BASE_DB_VERSION: usize = 71000;

pub struct JobStoreSchema {
    pub version: usize,
    /// Statements that create this version from scratch.
    pub create: &'static [&'static str],
    /// Expected `(table, columns)` after this version is applied.
    pub tables: &'static [(&'static str, &'static [&'static str])],
    /// Upgrade from the previous version.
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl JobStoreSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        for statement in self.create {
            conn.execute(statement, [])?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    /// Check that every table exists with exactly the expected columns.
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for (table, expected) in self.tables {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", table))?;
            let actual = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            if actual.is_empty() {
                bail!("Table {} is missing", table);
            }
            if actual.len() != expected.len()
                || expected.iter().any(|column| !actual.iter().any(|a| a == column))
            {
                bail!(
                    "Table {} has columns [{}], expected [{}]",
                    table,
                    actual.join(", "),
                    expected.join(", ")
                );
            }
        }
        Ok(())
    }
}

// =============================================================================
// Version 1 - Job records
// =============================================================================

const JOB_RECORDS_COLUMNS_V1: &[&str] = &[
    "job_id",
    "job_type",
    "status",
    "progress",
    "message",
    "error",
    "started_at",
    "completed_at",
    "updated_at",
];

const CREATE_V1: &[&str] = &[
    "CREATE TABLE job_records (
        job_id TEXT PRIMARY KEY,
        job_type TEXT NOT NULL,
        status TEXT NOT NULL,
        progress REAL NOT NULL DEFAULT 0,
        message TEXT,
        error TEXT,
        started_at TEXT,
        completed_at TEXT,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX idx_job_records_status ON job_records(status)",
    "CREATE INDEX idx_job_records_updated ON job_records(updated_at DESC)",
];

pub const JOB_STORE_SCHEMAS: &[JobStoreSchema] = &[JobStoreSchema {
    version: 1,
    create: CREATE_V1,
    tables: &[("job_records", JOB_RECORDS_COLUMNS_V1)],
    migration: None,
}];
