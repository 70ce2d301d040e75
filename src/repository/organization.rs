//! Organization repository.
//!
//! Organizations are upserted on every org-list fetch; the user-owned
//! `is_selected` flag is never touched by the upsert path.

use std::path::{Path, PathBuf};

use rusqlite::params;

use super::Result;
use crate::models::Organization;

/// SQLite-backed organization repository.
pub struct OrganizationRepository {
    db_path: PathBuf,
}

impl OrganizationRepository {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    fn connect(&self) -> Result<rusqlite::Connection> {
        super::connect(&self.db_path)
    }

    /// Insert or refresh an organization, preserving `is_selected`.
    pub fn upsert(
        &self,
        website_id: i64,
        name: &str,
        tender_count: i64,
        listing_url: &str,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO organizations (website_id, name, tender_count, listing_url)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(website_id, name) DO UPDATE SET
                tender_count = excluded.tender_count,
                listing_url = excluded.listing_url
            "#,
            params![website_id, name, tender_count, listing_url],
        )?;
        Ok(())
    }

    pub fn get_all(&self, website_id: i64) -> Result<Vec<Organization>> {
        self.query(
            "SELECT * FROM organizations WHERE website_id = ? ORDER BY name",
            website_id,
        )
    }

    /// Organizations the user has marked for crawling.
    pub fn get_selected(&self, website_id: i64) -> Result<Vec<Organization>> {
        self.query(
            "SELECT * FROM organizations WHERE website_id = ? AND is_selected = 1 ORDER BY name",
            website_id,
        )
    }

    fn query(&self, sql: &str, website_id: i64) -> Result<Vec<Organization>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let orgs = stmt
            .query_map(params![website_id], |row| {
                Ok(Organization {
                    id: row.get("id")?,
                    website_id: row.get("website_id")?,
                    name: row.get("name")?,
                    tender_count: row.get("tender_count")?,
                    listing_url: row.get("listing_url")?,
                    is_selected: row.get::<_, i64>("is_selected")? != 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(orgs)
    }

    /// Set the user-owned selection flag.
    pub fn set_selected(&self, website_id: i64, name: &str, selected: bool) -> Result<bool> {
        let conn = self.connect()?;
        let rows = conn.execute(
            "UPDATE organizations SET is_selected = ?1 WHERE website_id = ?2 AND name = ?3",
            params![selected as i64, website_id, name],
        )?;
        Ok(rows > 0)
    }

    /// Delete all organizations for a website (tenders cascade separately
    /// via the clear-data paths).
    pub fn clear(&self, website_id: i64) -> Result<usize> {
        let conn = self.connect()?;
        conn.execute(
            "DELETE FROM organizations WHERE website_id = ?",
            params![website_id],
        )
    }
}
