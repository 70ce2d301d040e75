//! Website repository.

use std::path::{Path, PathBuf};

use rusqlite::params;

use super::Result;
use crate::models::Website;

/// SQLite-backed website repository.
pub struct WebsiteRepository {
    db_path: PathBuf,
}

impl WebsiteRepository {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    fn connect(&self) -> Result<rusqlite::Connection> {
        super::connect(&self.db_path)
    }

    /// Insert a website, or update its URLs if the name already exists.
    /// Returns the row id.
    pub fn upsert(&self, name: &str, listing_url: &str, status_url: &str) -> Result<i64> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO websites (name, listing_url, status_url)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO UPDATE SET
                listing_url = excluded.listing_url,
                status_url = excluded.status_url
            "#,
            params![name, listing_url, status_url],
        )?;
        conn.query_row(
            "SELECT id FROM websites WHERE name = ?",
            params![name],
            |row| row.get(0),
        )
    }

    pub fn get(&self, id: i64) -> Result<Option<Website>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM websites WHERE id = ?")?;
        super::to_option(stmt.query_row(params![id], |row| {
            Ok(Website {
                id: row.get("id")?,
                name: row.get("name")?,
                listing_url: row.get("listing_url")?,
                status_url: row.get("status_url")?,
            })
        }))
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<Website>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM websites WHERE name = ?")?;
        super::to_option(stmt.query_row(params![name], |row| {
            Ok(Website {
                id: row.get("id")?,
                name: row.get("name")?,
                listing_url: row.get("listing_url")?,
                status_url: row.get("status_url")?,
            })
        }))
    }

    pub fn get_all(&self) -> Result<Vec<Website>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM websites ORDER BY name")?;
        let websites = stmt
            .query_map([], |row| {
                Ok(Website {
                    id: row.get("id")?,
                    name: row.get("name")?,
                    listing_url: row.get("listing_url")?,
                    status_url: row.get("status_url")?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(websites)
    }

    /// Delete a website. Organizations, tenders, and downloaded-file logs
    /// cascade.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let conn = self.connect()?;
        let rows = conn.execute("DELETE FROM websites WHERE id = ?", params![id])?;
        Ok(rows > 0)
    }
}
