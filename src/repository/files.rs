//! Downloaded-file log repository.
//!
//! Append-only log of acquired assets, unique per
//! (tender, file name, file type). Supports the self-healing backfill used
//! by the download orchestrator's skip check.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::params;

use super::{parse_datetime, Result};
use crate::models::{DownloadedFile, FileType};

/// SQLite-backed downloaded-file log.
pub struct FileRepository {
    db_path: PathBuf,
}

impl FileRepository {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    fn connect(&self) -> Result<rusqlite::Connection> {
        super::connect(&self.db_path)
    }

    /// Record an acquired file. Re-logging the same (tender, name, type)
    /// refreshes the path and timestamp rather than duplicating.
    pub fn log(
        &self,
        tender_pk: i64,
        file_name: &str,
        file_type: FileType,
        source_url: &str,
        local_path: &str,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO downloaded_files
                (tender_pk, file_name, file_type, source_url, local_path, downloaded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(tender_pk, file_name, file_type) DO UPDATE SET
                source_url = excluded.source_url,
                local_path = excluded.local_path,
                downloaded_at = excluded.downloaded_at
            "#,
            params![
                tender_pk,
                file_name,
                file_type.as_str(),
                source_url,
                local_path,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Whether a file is present in the log for this tender, regardless of
    /// asset type.
    pub fn is_logged(&self, tender_pk: i64, file_name: &str) -> Result<bool> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM downloaded_files WHERE tender_pk = ?1 AND file_name = ?2",
            params![tender_pk, file_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn for_tender(&self, tender_pk: i64) -> Result<Vec<DownloadedFile>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM downloaded_files WHERE tender_pk = ? ORDER BY downloaded_at",
        )?;
        let files = stmt
            .query_map(params![tender_pk], |row| {
                Ok(DownloadedFile {
                    id: row.get("id")?,
                    tender_pk: row.get("tender_pk")?,
                    file_name: row.get("file_name")?,
                    file_type: FileType::from_str(&row.get::<_, String>("file_type")?)
                        .unwrap_or(FileType::Document),
                    source_url: row.get("source_url")?,
                    local_path: row.get("local_path")?,
                    downloaded_at: parse_datetime(&row.get::<_, String>("downloaded_at")?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(files)
    }
}
