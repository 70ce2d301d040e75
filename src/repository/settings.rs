//! String-keyed application settings store.

use std::path::{Path, PathBuf};

use rusqlite::params;

use super::Result;

/// Key for the persisted auto-archive gate timestamp (RFC3339).
pub const AUTO_ARCHIVE_LAST_RUN: &str = "auto_archive_last_run";

/// SQLite-backed settings repository.
pub struct SettingsRepository {
    db_path: PathBuf,
}

impl SettingsRepository {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    fn connect(&self) -> Result<rusqlite::Connection> {
        super::connect(&self.db_path)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connect()?;
        super::to_option(conn.query_row(
            "SELECT value FROM app_settings WHERE key = ?",
            params![key],
            |row| row.get(0),
        ))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO app_settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}
