//! Domain models for tender tracking and document acquisition.
//!
//! Tenders carry two kinds of state: scraped fields, overwritten on every
//! observation, and user-owned fields (`is_downloaded`, `is_bookmarked`,
//! `folder_path`, `last_downloaded_at`) that every write path must preserve.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tender stage strings after which no further transitions are expected.
pub const TERMINAL_STATUSES: &[&str] = &["AOC", "Concluded", "Cancelled", "Withdrawn", "Terminated"];

/// Check whether a free-text stage string is terminal.
///
/// Trimmed, case-insensitive equality; stage strings like
/// "Financial Bid Opening/AOC" are deliberately not matched.
pub fn is_terminal_status(status: &str) -> bool {
    let s = status.trim();
    TERMINAL_STATUSES.iter().any(|t| t.eq_ignore_ascii_case(s))
}

/// A portal being tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Website {
    pub id: i64,
    pub name: String,
    /// Entry URL for the organization listing.
    pub listing_url: String,
    /// Entry URL for the tender status lookup form.
    pub status_url: String,
}

/// An organization under a website. `is_selected` is user-owned and must
/// survive re-fetches of the organization list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub website_id: i64,
    pub name: String,
    pub tender_count: i64,
    pub listing_url: String,
    pub is_selected: bool,
}

/// A tender as persisted. At most one non-duplicate row exists per website
/// and canonical identity (normalized URL, else tender_id, else
/// org_chain+title+closing_date).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tender {
    pub id: i64,
    pub website_id: i64,
    /// Organization name the tender was scraped under.
    pub org_chain: String,
    /// Portal-issued identifier, or a derived/hashed substitute.
    pub tender_id: String,
    pub title: String,
    pub value: String,
    pub emd: String,
    pub closing_date: String,
    pub opening_date: String,
    pub location: String,
    pub category: String,
    pub prebid_meeting_date: String,
    pub work_description: String,
    pub tender_url: String,
    /// Canonicalized detail URL; the primary dedup key.
    pub normalized_tender_url: String,
    /// Free-text processing stage as last observed.
    pub status: String,
    pub is_archived: bool,
    pub is_downloaded: bool,
    pub is_bookmarked: bool,
    pub folder_path: Option<String>,
    pub last_downloaded_at: Option<DateTime<Utc>>,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Scraped fields for one tender, before reconciliation. Produced by the
/// listing crawler, consumed by the upsert engine.
#[derive(Debug, Clone, Default)]
pub struct ScrapedTender {
    pub website_id: i64,
    pub org_chain: String,
    pub tender_id: String,
    pub title: String,
    pub value: String,
    pub emd: String,
    pub closing_date: String,
    pub opening_date: String,
    pub location: String,
    pub category: String,
    pub prebid_meeting_date: String,
    pub work_description: String,
    pub tender_url: String,
    pub normalized_tender_url: String,
}

/// Outcome of reconciling one scraped tender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Kind of asset downloaded for a tender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Notice,
    Zip,
    Prebid,
    Corrigendum,
    Result,
    Document,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notice => "notice",
            Self::Zip => "zip",
            Self::Prebid => "prebid",
            Self::Corrigendum => "corrigendum",
            Self::Result => "result",
            Self::Document => "document",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "notice" => Some(Self::Notice),
            "zip" => Some(Self::Zip),
            "prebid" => Some(Self::Prebid),
            "corrigendum" => Some(Self::Corrigendum),
            "result" => Some(Self::Result),
            "document" => Some(Self::Document),
            _ => None,
        }
    }
}

/// Append-only record of one acquired file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadedFile {
    pub id: i64,
    /// Database row id of the owning tender.
    pub tender_pk: i64,
    pub file_name: String,
    pub file_type: FileType,
    pub source_url: String,
    pub local_path: String,
    pub downloaded_at: DateTime<Utc>,
}

/// Audit record written once per scheduled archive execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoArchiveRun {
    pub id: i64,
    pub run_at: DateTime<Utc>,
    pub status: String,
    pub archived_count: i64,
    pub archived_status_updated: i64,
    pub websites_count: i64,
    pub notes: Option<String>,
}

/// Download mode for one tender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadMode {
    /// First ever download: notice PDF, zip, pre-bid doc, corrigenda.
    Full,
    /// Incremental: pre-bid doc and corrigenda only.
    Update,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_matching() {
        assert!(is_terminal_status("AOC"));
        assert!(is_terminal_status(" cancelled "));
        assert!(is_terminal_status("CONCLUDED"));
        assert!(!is_terminal_status("Financial Bid Opening/AOC"));
        assert!(!is_terminal_status("Technical Evaluation"));
        assert!(!is_terminal_status(""));
    }

    #[test]
    fn file_type_round_trip() {
        for ft in [
            FileType::Notice,
            FileType::Zip,
            FileType::Prebid,
            FileType::Corrigendum,
            FileType::Result,
            FileType::Document,
        ] {
            assert_eq!(FileType::from_str(ft.as_str()), Some(ft));
        }
        assert_eq!(FileType::from_str("unknown"), None);
    }
}
