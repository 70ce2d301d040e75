//! Append-only audit log of scheduled archive executions.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{parse_datetime, Result};
use crate::models::AutoArchiveRun;

/// SQLite-backed archive-run audit log.
pub struct ArchiveRunRepository {
    db_path: PathBuf,
}

impl ArchiveRunRepository {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    fn connect(&self) -> Result<rusqlite::Connection> {
        super::connect(&self.db_path)
    }

    /// Append one audit record; written once per archive execution.
    pub fn append(
        &self,
        run_at: DateTime<Utc>,
        status: &str,
        archived_count: i64,
        archived_status_updated: i64,
        websites_count: i64,
        notes: Option<&str>,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO auto_archive_runs
                (run_at, status, archived_count, archived_status_updated, websites_count, notes)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                run_at.to_rfc3339(),
                status,
                archived_count,
                archived_status_updated,
                websites_count,
                notes,
            ],
        )?;
        Ok(())
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<AutoArchiveRun>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM auto_archive_runs ORDER BY id DESC LIMIT ?",
        )?;
        let runs = stmt
            .query_map(params![limit as i64], |row| {
                Ok(AutoArchiveRun {
                    id: row.get("id")?,
                    run_at: parse_datetime(&row.get::<_, String>("run_at")?),
                    status: row.get("status")?,
                    archived_count: row.get("archived_count")?,
                    archived_status_updated: row.get("archived_status_updated")?,
                    websites_count: row.get("websites_count")?,
                    notes: row.get("notes")?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}
