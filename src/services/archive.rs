//! Staleness archiver: terminal-status and overdue-deadline pass.
//!
//! Complements the missing-from-crawl trigger in the sync service. Runs on a
//! 12-hour gate persisted in app_settings and appends one audit record per
//! execution. Archiving an already-archived tender is a no-op.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tracing::{info, warn};

use crate::config::AUTO_ARCHIVE_INTERVAL_HOURS;
use crate::models::is_terminal_status;
use crate::repository::settings::AUTO_ARCHIVE_LAST_RUN;
use crate::repository::Store;

/// Formats with a time component, tried first.
const DATETIME_FORMATS: &[&str] = &[
    "%d-%b-%Y %I:%M %p",
    "%d-%b-%Y %H:%M",
    "%d/%m/%Y %H:%M",
    "%Y-%m-%d %H:%M",
];

/// Date-only formats; the deadline defaults to end of day.
const DATE_FORMATS: &[&str] = &["%d-%b-%Y", "%d/%m/%Y", "%Y-%m-%d"];

/// Parse a scraped closing-date string. Unparsable text yields None and the
/// tender is left untouched.
pub fn parse_closing_date(text: &str) -> Option<NaiveDateTime> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt);
        }
    }
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59)?;
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(d.and_time(end_of_day));
        }
    }
    None
}

/// Result of one archive execution.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveReport {
    pub archived: i64,
    /// Subset archived because their stage string was terminal.
    pub terminal: i64,
    pub websites: i64,
    pub skipped_by_gate: bool,
}

/// Archiver over one store.
pub struct ArchiveService {
    store: Store,
}

impl ArchiveService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Archive every active tender that is terminal or past its deadline,
    /// across all websites. Pure logic pass, no gate, no audit row.
    pub fn archive_completed_tenders(&self, now: NaiveDateTime) -> anyhow::Result<ArchiveReport> {
        let mut report = ArchiveReport::default();
        let tenders = self.store.tenders();

        for website in self.store.websites().get_all()? {
            report.websites += 1;
            for tender in tenders.get_active(website.id)? {
                let terminal = is_terminal_status(&tender.status);
                let overdue = parse_closing_date(&tender.closing_date)
                    .map(|deadline| deadline < now)
                    .unwrap_or(false);
                if terminal || overdue {
                    tenders.set_archived(tender.id, true)?;
                    report.archived += 1;
                    if terminal {
                        report.terminal += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    /// Scheduled execution: honor the persisted 12-hour gate (unless forced),
    /// run the pass, and append one audit record with the outcome.
    pub fn run_scheduled(&self, force: bool) -> anyhow::Result<ArchiveReport> {
        let settings = self.store.settings();

        if !force {
            if let Some(last) = settings.get(AUTO_ARCHIVE_LAST_RUN)? {
                let last = crate::repository::parse_datetime(&last);
                let elapsed = Utc::now() - last;
                if elapsed.num_hours() < AUTO_ARCHIVE_INTERVAL_HOURS {
                    info!(
                        "auto-archive ran {}h ago, gate not elapsed",
                        elapsed.num_hours()
                    );
                    return Ok(ArchiveReport {
                        skipped_by_gate: true,
                        ..Default::default()
                    });
                }
            }
        }

        let run_at = Utc::now();
        let runs = self.store.archive_runs();

        match self.archive_completed_tenders(chrono::Local::now().naive_local()) {
            Ok(report) => {
                runs.append(
                    run_at,
                    "success",
                    report.archived,
                    report.terminal,
                    report.websites,
                    None,
                )?;
                settings.set(AUTO_ARCHIVE_LAST_RUN, &run_at.to_rfc3339())?;
                info!(
                    "auto-archive: {} archived across {} websites",
                    report.archived, report.websites
                );
                Ok(report)
            }
            Err(e) => {
                warn!("auto-archive failed: {}", e);
                runs.append(run_at, "failed", 0, 0, 0, Some(&e.to_string()))?;
                settings.set(AUTO_ARCHIVE_LAST_RUN, &run_at.to_rfc3339())?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_portal_datetime_formats() {
        assert!(parse_closing_date("20-Aug-2026 03:00 PM").is_some());
        assert!(parse_closing_date("20-Aug-2026 15:00").is_some());
        assert!(parse_closing_date("20/08/2026 15:00").is_some());
        assert!(parse_closing_date("2026-08-20 15:00").is_some());
    }

    #[test]
    fn date_only_defaults_to_end_of_day() {
        let dt = parse_closing_date("20-Aug-2026").unwrap();
        assert_eq!(dt.format("%H:%M:%S").to_string(), "23:59:59");
    }

    #[test]
    fn unparsable_dates_are_none() {
        assert_eq!(parse_closing_date("N/A"), None);
        assert_eq!(parse_closing_date(""), None);
        assert_eq!(parse_closing_date("sometime soon"), None);
    }
}
