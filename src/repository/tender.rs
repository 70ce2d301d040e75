//! Tender repository: the upsert/dedup reconciliation engine.
//!
//! Reconciles crawled rows against persisted tenders. Match priority for an
//! existing row within a website: normalized URL, then tender_id, then the
//! (org_chain, title, closing_date) triple. Matched rows get all scraped
//! fields refreshed and `is_archived` cleared; the user-owned fields
//! (`is_downloaded`, `is_bookmarked`, `folder_path`, `last_downloaded_at`)
//! are preserved verbatim.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::{parse_datetime_opt, Result};
use crate::models::{ScrapedTender, Tender, UpsertOutcome};

/// SQLite-backed tender repository.
pub struct TenderRepository {
    db_path: PathBuf,
}

fn tender_from_row(row: &Row<'_>) -> rusqlite::Result<Tender> {
    Ok(Tender {
        id: row.get("id")?,
        website_id: row.get("website_id")?,
        org_chain: row.get("org_chain")?,
        tender_id: row.get("tender_id")?,
        title: row.get("title")?,
        value: row.get("value")?,
        emd: row.get("emd")?,
        closing_date: row.get("closing_date")?,
        opening_date: row.get("opening_date")?,
        location: row.get("location")?,
        category: row.get("category")?,
        prebid_meeting_date: row.get("prebid_meeting_date")?,
        work_description: row.get("work_description")?,
        tender_url: row.get("tender_url")?,
        normalized_tender_url: row.get("normalized_tender_url")?,
        status: row.get("status")?,
        is_archived: row.get::<_, i64>("is_archived")? != 0,
        is_downloaded: row.get::<_, i64>("is_downloaded")? != 0,
        is_bookmarked: row.get::<_, i64>("is_bookmarked")? != 0,
        folder_path: row.get("folder_path")?,
        last_downloaded_at: parse_datetime_opt(row.get("last_downloaded_at")?),
        first_seen_at: parse_datetime_opt(row.get("first_seen_at")?),
        last_seen_at: parse_datetime_opt(row.get("last_seen_at")?),
    })
}

impl TenderRepository {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection> {
        super::connect(&self.db_path)
    }

    /// Reconcile one scraped tender against persisted state.
    pub fn upsert(&self, scraped: &ScrapedTender) -> Result<UpsertOutcome> {
        let conn = self.connect()?;

        if let Some(id) = self.find_match(&conn, scraped)? {
            self.update_scraped(&conn, id, scraped)?;
            return Ok(UpsertOutcome::Updated);
        }

        let now = Utc::now().to_rfc3339();
        let inserted = conn.execute(
            r#"
            INSERT INTO tenders (
                website_id, org_chain, tender_id, title, value, emd,
                closing_date, opening_date, location, category,
                prebid_meeting_date, work_description, tender_url,
                normalized_tender_url, is_archived, first_seen_at, last_seen_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 0, ?15, ?15)
            "#,
            params![
                scraped.website_id,
                scraped.org_chain,
                scraped.tender_id,
                scraped.title,
                scraped.value,
                scraped.emd,
                scraped.closing_date,
                scraped.opening_date,
                scraped.location,
                scraped.category,
                scraped.prebid_meeting_date,
                scraped.work_description,
                scraped.tender_url,
                scraped.normalized_tender_url,
                now,
            ],
        );

        match inserted {
            Ok(_) => Ok(UpsertOutcome::Inserted),
            // Identity race: another identity path already inserted this
            // tender_id. Recover by updating the colliding row.
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let existing: Option<i64> = super::to_option(conn.query_row(
                    "SELECT id FROM tenders WHERE website_id = ?1 AND tender_id = ?2",
                    params![scraped.website_id, scraped.tender_id],
                    |row| row.get(0),
                ))?;
                match existing {
                    Some(id) => {
                        self.update_scraped(&conn, id, scraped)?;
                        Ok(UpsertOutcome::Updated)
                    }
                    None => Err(rusqlite::Error::SqliteFailure(e, None)),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn find_match(&self, conn: &Connection, scraped: &ScrapedTender) -> Result<Option<i64>> {
        if !scraped.normalized_tender_url.is_empty() {
            let hit: Option<i64> = super::to_option(conn.query_row(
                "SELECT id FROM tenders WHERE website_id = ?1 AND normalized_tender_url = ?2
                 ORDER BY id DESC LIMIT 1",
                params![scraped.website_id, scraped.normalized_tender_url],
                |row| row.get(0),
            ))?;
            if hit.is_some() {
                return Ok(hit);
            }
        }

        let hit: Option<i64> = super::to_option(conn.query_row(
            "SELECT id FROM tenders WHERE website_id = ?1 AND tender_id = ?2
             ORDER BY id DESC LIMIT 1",
            params![scraped.website_id, scraped.tender_id],
            |row| row.get(0),
        ))?;
        if hit.is_some() {
            return Ok(hit);
        }

        super::to_option(conn.query_row(
            "SELECT id FROM tenders WHERE website_id = ?1 AND org_chain = ?2
             AND title = ?3 AND closing_date = ?4 ORDER BY id DESC LIMIT 1",
            params![
                scraped.website_id,
                scraped.org_chain,
                scraped.title,
                scraped.closing_date
            ],
            |row| row.get(0),
        ))
    }

    /// Refresh all scraped fields on a matched row, un-archive it, and clear
    /// a legacy "Archived" status marker. User-owned fields are untouched.
    fn update_scraped(&self, conn: &Connection, id: i64, scraped: &ScrapedTender) -> Result<()> {
        conn.execute(
            r#"
            UPDATE tenders SET
                org_chain = ?1, tender_id = ?2, title = ?3, value = ?4, emd = ?5,
                closing_date = ?6, opening_date = ?7, location = ?8, category = ?9,
                prebid_meeting_date = ?10, work_description = ?11, tender_url = ?12,
                normalized_tender_url = ?13,
                is_archived = 0,
                status = CASE WHEN status = 'Archived' THEN '' ELSE status END,
                last_seen_at = ?14
            WHERE id = ?15
            "#,
            params![
                scraped.org_chain,
                scraped.tender_id,
                scraped.title,
                scraped.value,
                scraped.emd,
                scraped.closing_date,
                scraped.opening_date,
                scraped.location,
                scraped.category,
                scraped.prebid_meeting_date,
                scraped.work_description,
                scraped.tender_url,
                scraped.normalized_tender_url,
                Utc::now().to_rfc3339(),
                id,
            ],
        )?;
        Ok(())
    }

    /// Collapse duplicate rows sharing a canonical identity. The newest row
    /// (highest rowid) wins; user-owned booleans merge via OR and
    /// `folder_path`/`last_downloaded_at` via first-non-empty. Returns the
    /// number of rows removed.
    pub fn dedupe(&self, website_id: i64) -> Result<usize> {
        let conn = self.connect()?;
        let rows = self.query_tenders(
            &conn,
            "SELECT * FROM tenders WHERE website_id = ? ORDER BY id DESC",
            website_id,
        )?;

        let mut groups: HashMap<String, Vec<Tender>> = HashMap::new();
        for t in rows {
            let key = if !t.normalized_tender_url.is_empty() {
                format!("u:{}", t.normalized_tender_url)
            } else if !t.tender_id.is_empty() {
                format!("i:{}", t.tender_id)
            } else {
                format!("t:{}|{}|{}", t.org_chain, t.title, t.closing_date)
            };
            groups.entry(key).or_default().push(t);
        }

        let mut removed = 0;
        for dupes in groups.into_values() {
            if dupes.len() < 2 {
                continue;
            }
            let kept = &dupes[0];
            let mut is_downloaded = kept.is_downloaded;
            let mut is_bookmarked = kept.is_bookmarked;
            let mut folder_path = kept.folder_path.clone().filter(|p| !p.is_empty());
            let mut last_downloaded_at = kept.last_downloaded_at;

            for dup in &dupes[1..] {
                is_downloaded |= dup.is_downloaded;
                is_bookmarked |= dup.is_bookmarked;
                if folder_path.is_none() {
                    folder_path = dup.folder_path.clone().filter(|p| !p.is_empty());
                }
                if last_downloaded_at.is_none() {
                    last_downloaded_at = dup.last_downloaded_at;
                }
            }

            conn.execute(
                "UPDATE tenders SET is_downloaded = ?1, is_bookmarked = ?2,
                 folder_path = ?3, last_downloaded_at = ?4 WHERE id = ?5",
                params![
                    is_downloaded as i64,
                    is_bookmarked as i64,
                    folder_path,
                    last_downloaded_at.map(|dt| dt.to_rfc3339()),
                    kept.id,
                ],
            )?;

            for dup in &dupes[1..] {
                removed += conn.execute("DELETE FROM tenders WHERE id = ?", params![dup.id])?;
            }
        }

        Ok(removed)
    }

    /// Archive active tenders under an organization whose tender_id is
    /// missing from the crawl's seen set. Callers must skip organizations
    /// whose crawl did not complete.
    pub fn archive_missing(
        &self,
        website_id: i64,
        org_chain: &str,
        seen: &HashSet<String>,
    ) -> Result<usize> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, tender_id FROM tenders
             WHERE website_id = ?1 AND org_chain = ?2 AND is_archived = 0",
        )?;
        let active: Vec<(i64, String)> = stmt
            .query_map(params![website_id, org_chain], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut archived = 0;
        for (id, tender_id) in active {
            if !seen.contains(&tender_id) {
                archived += conn.execute(
                    "UPDATE tenders SET is_archived = 1 WHERE id = ?",
                    params![id],
                )?;
            }
        }
        Ok(archived)
    }

    /// Mark a single tender archived. Idempotent.
    pub fn set_archived(&self, id: i64, archived: bool) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE tenders SET is_archived = ?1 WHERE id = ?2",
            params![archived as i64, id],
        )?;
        Ok(())
    }

    /// Record the observed processing stage for a tender.
    pub fn update_status(&self, id: i64, status: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE tenders SET status = ?1 WHERE id = ?2",
            params![status, id],
        )?;
        Ok(())
    }

    /// Record a completed download for a tender.
    pub fn mark_downloaded(
        &self,
        id: i64,
        folder_path: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE tenders SET is_downloaded = 1, folder_path = ?1, last_downloaded_at = ?2
             WHERE id = ?3",
            params![folder_path, at.to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Set the user-owned download-selection flag.
    pub fn set_download_selected(&self, id: i64, selected: bool) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE tenders SET is_downloaded = ?1 WHERE id = ?2",
            params![selected as i64, id],
        )?;
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<Tender>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM tenders WHERE id = ?")?;
        super::to_option(stmt.query_row(params![id], tender_from_row))
    }

    pub fn get_by_tender_id(&self, website_id: i64, tender_id: &str) -> Result<Option<Tender>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM tenders WHERE website_id = ?1 AND tender_id = ?2
             ORDER BY id DESC LIMIT 1",
        )?;
        super::to_option(stmt.query_row(params![website_id, tender_id], tender_from_row))
    }

    pub fn get_active(&self, website_id: i64) -> Result<Vec<Tender>> {
        let conn = self.connect()?;
        self.query_tenders(
            &conn,
            "SELECT * FROM tenders WHERE website_id = ? AND is_archived = 0 ORDER BY id",
            website_id,
        )
    }

    pub fn get_archived(&self, website_id: i64) -> Result<Vec<Tender>> {
        let conn = self.connect()?;
        self.query_tenders(
            &conn,
            "SELECT * FROM tenders WHERE website_id = ? AND is_archived = 1 ORDER BY id",
            website_id,
        )
    }

    pub fn get_all(&self, website_id: i64) -> Result<Vec<Tender>> {
        let conn = self.connect()?;
        self.query_tenders(
            &conn,
            "SELECT * FROM tenders WHERE website_id = ? ORDER BY id",
            website_id,
        )
    }

    fn query_tenders(
        &self,
        conn: &Connection,
        sql: &str,
        website_id: i64,
    ) -> Result<Vec<Tender>> {
        let mut stmt = conn.prepare(sql)?;
        let tenders = stmt
            .query_map(params![website_id], tender_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tenders)
    }

    /// Delete active tenders for a website. Websites themselves are always
    /// preserved by clear operations.
    pub fn clear_active(&self, website_id: i64) -> Result<usize> {
        let conn = self.connect()?;
        conn.execute(
            "DELETE FROM tenders WHERE website_id = ? AND is_archived = 0",
            params![website_id],
        )
    }

    /// Delete archived tenders for a website.
    pub fn clear_archived(&self, website_id: i64) -> Result<usize> {
        let conn = self.connect()?;
        conn.execute(
            "DELETE FROM tenders WHERE website_id = ? AND is_archived = 1",
            params![website_id],
        )
    }
}
