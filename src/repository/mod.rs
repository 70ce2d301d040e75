//! Repository layer for SQLite persistence.
//!
//! All access goes through parameterized rusqlite statements; repositories
//! hold a database path and open a connection per call. Datetimes are stored
//! as RFC3339 text.

pub mod archive_runs;
pub mod files;
pub mod organization;
pub mod settings;
pub mod tender;
pub mod website;

pub use archive_runs::ArchiveRunRepository;
pub use files::FileRepository;
pub use organization::OrganizationRepository;
pub use settings::SettingsRepository;
pub use tender::TenderRepository;
pub use website::WebsiteRepository;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

pub type Result<T> = std::result::Result<T, rusqlite::Error>;

/// Open a connection with foreign keys enabled.
pub fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

/// Create all tables if they do not exist.
pub fn init_schema(db_path: &Path) -> Result<()> {
    let conn = connect(db_path)?;
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS websites (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            listing_url TEXT NOT NULL,
            status_url TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS organizations (
            id INTEGER PRIMARY KEY,
            website_id INTEGER NOT NULL REFERENCES websites(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            tender_count INTEGER NOT NULL DEFAULT 0,
            listing_url TEXT NOT NULL DEFAULT '',
            is_selected INTEGER NOT NULL DEFAULT 0,
            UNIQUE(website_id, name)
        );

        CREATE TABLE IF NOT EXISTS tenders (
            id INTEGER PRIMARY KEY,
            website_id INTEGER NOT NULL REFERENCES websites(id) ON DELETE CASCADE,
            org_chain TEXT NOT NULL DEFAULT '',
            tender_id TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT 'N/A',
            value TEXT NOT NULL DEFAULT 'N/A',
            emd TEXT NOT NULL DEFAULT 'N/A',
            closing_date TEXT NOT NULL DEFAULT '',
            opening_date TEXT NOT NULL DEFAULT '',
            location TEXT NOT NULL DEFAULT 'N/A',
            category TEXT NOT NULL DEFAULT 'N/A',
            prebid_meeting_date TEXT NOT NULL DEFAULT 'N/A',
            work_description TEXT NOT NULL DEFAULT 'N/A',
            tender_url TEXT NOT NULL DEFAULT '',
            normalized_tender_url TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT '',
            is_archived INTEGER NOT NULL DEFAULT 0,
            is_downloaded INTEGER NOT NULL DEFAULT 0,
            is_bookmarked INTEGER NOT NULL DEFAULT 0,
            folder_path TEXT,
            last_downloaded_at TEXT,
            first_seen_at TEXT,
            last_seen_at TEXT,
            UNIQUE(website_id, tender_id)
        );
        CREATE INDEX IF NOT EXISTS idx_tenders_norm_url
            ON tenders(website_id, normalized_tender_url);
        CREATE INDEX IF NOT EXISTS idx_tenders_org
            ON tenders(website_id, org_chain);

        CREATE TABLE IF NOT EXISTS downloaded_files (
            id INTEGER PRIMARY KEY,
            tender_pk INTEGER NOT NULL REFERENCES tenders(id) ON DELETE CASCADE,
            file_name TEXT NOT NULL,
            file_type TEXT NOT NULL,
            source_url TEXT NOT NULL DEFAULT '',
            local_path TEXT NOT NULL,
            downloaded_at TEXT NOT NULL,
            UNIQUE(tender_pk, file_name, file_type)
        );

        CREATE TABLE IF NOT EXISTS app_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS auto_archive_runs (
            id INTEGER PRIMARY KEY,
            run_at TEXT NOT NULL,
            status TEXT NOT NULL,
            archived_count INTEGER NOT NULL DEFAULT 0,
            archived_status_updated INTEGER NOT NULL DEFAULT 0,
            websites_count INTEGER NOT NULL DEFAULT 0,
            notes TEXT
        );
    "#,
    )?;
    Ok(())
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Convert a query_row result into an Option, mapping no-rows to None.
pub(crate) fn to_option<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Bundle of repositories over one database file.
#[derive(Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    /// Open (and initialize) the store at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        init_schema(db_path)?;
        Ok(Self {
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn websites(&self) -> WebsiteRepository {
        WebsiteRepository::new(&self.db_path)
    }

    pub fn organizations(&self) -> OrganizationRepository {
        OrganizationRepository::new(&self.db_path)
    }

    pub fn tenders(&self) -> TenderRepository {
        TenderRepository::new(&self.db_path)
    }

    pub fn files(&self) -> FileRepository {
        FileRepository::new(&self.db_path)
    }

    pub fn settings(&self) -> SettingsRepository {
        SettingsRepository::new(&self.db_path)
    }

    pub fn archive_runs(&self) -> ArchiveRunRepository {
        ArchiveRunRepository::new(&self.db_path)
    }
}
