//! Integration tests for the reconciliation engine over a real SQLite file:
//! upsert identity matching, user-field preservation, dedup merging,
//! missing-from-crawl archiving, the staleness archiver, and the download
//! skip check.

use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use tempfile::TempDir;

use tenderacquire::models::{FileType, ScrapedTender, UpsertOutcome};
use tenderacquire::repository::Store;
use tenderacquire::scrapers::CrawlOutcome;
use tenderacquire::services::download::DownloadService;
use tenderacquire::services::sync::SyncReport;
use tenderacquire::services::{ArchiveService, SyncService};

fn open_store(dir: &TempDir) -> Store {
    Store::open(&dir.path().join("test.db")).unwrap()
}

fn seed_website(store: &Store) -> i64 {
    store
        .websites()
        .upsert(
            "testportal",
            "https://portal.example.in/nicgep/app?page=FrontEndListTendersbyOrganisation&service=page",
            "https://portal.example.in/nicgep/app?page=FrontEndTenderStatus&service=page",
        )
        .unwrap()
}

fn scraped(website_id: i64, tender_id: &str, title: &str, url: &str) -> ScrapedTender {
    ScrapedTender {
        website_id,
        org_chain: "Public Works".to_string(),
        tender_id: tender_id.to_string(),
        title: title.to_string(),
        closing_date: "20-Aug-2026 03:00 PM".to_string(),
        opening_date: "21-Aug-2026 10:00 AM".to_string(),
        tender_url: url.to_string(),
        normalized_tender_url: url.to_string(),
        ..ScrapedTender::default()
    }
}

#[test]
fn repeated_upsert_yields_one_row() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let website_id = seed_website(&store);
    let tenders = store.tenders();

    let t = scraped(website_id, "2026_PWD_1", "Road works", "https://x.in/app?id=1");
    assert_eq!(tenders.upsert(&t).unwrap(), UpsertOutcome::Inserted);
    assert_eq!(tenders.upsert(&t).unwrap(), UpsertOutcome::Updated);

    let all = tenders.get_all(website_id).unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].first_seen_at.is_some());
    assert!(all[0].last_seen_at.is_some());
}

#[test]
fn upsert_preserves_user_owned_fields() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let website_id = seed_website(&store);
    let tenders = store.tenders();

    let t = scraped(website_id, "2026_PWD_2", "Bridge repair", "https://x.in/app?id=2");
    tenders.upsert(&t).unwrap();
    let row = tenders.get_by_tender_id(website_id, "2026_PWD_2").unwrap().unwrap();
    tenders
        .mark_downloaded(row.id, "/data/docs/2026_PWD_2", Utc::now())
        .unwrap();

    // Re-observed with a corrected title: scraped fields refresh, the
    // download state survives.
    let mut changed = t.clone();
    changed.title = "Bridge repair (phase II)".to_string();
    assert_eq!(tenders.upsert(&changed).unwrap(), UpsertOutcome::Updated);

    let row = tenders.get(row.id).unwrap().unwrap();
    assert_eq!(row.title, "Bridge repair (phase II)");
    assert!(row.is_downloaded);
    assert_eq!(row.folder_path.as_deref(), Some("/data/docs/2026_PWD_2"));
    assert!(row.last_downloaded_at.is_some());
}

#[test]
fn upsert_matches_by_tender_id_when_url_changes() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let website_id = seed_website(&store);
    let tenders = store.tenders();

    let t = scraped(website_id, "2026_PWD_3", "Canal lining", "https://x.in/app?id=3");
    tenders.upsert(&t).unwrap();

    let mut moved = t.clone();
    moved.tender_url = "https://x.in/app?id=3&component=view".to_string();
    moved.normalized_tender_url = moved.tender_url.clone();
    assert_eq!(tenders.upsert(&moved).unwrap(), UpsertOutcome::Updated);
    assert_eq!(tenders.get_all(website_id).unwrap().len(), 1);
}

#[test]
fn upsert_unarchives_reappearing_tender() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let website_id = seed_website(&store);
    let tenders = store.tenders();

    let t = scraped(website_id, "2026_PWD_4", "Street lighting", "https://x.in/app?id=4");
    tenders.upsert(&t).unwrap();
    let row = tenders.get_by_tender_id(website_id, "2026_PWD_4").unwrap().unwrap();
    tenders.set_archived(row.id, true).unwrap();

    tenders.upsert(&t).unwrap();
    let row = tenders.get(row.id).unwrap().unwrap();
    assert!(!row.is_archived);
}

#[test]
fn dedupe_merges_user_flags_into_newest_row() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let website_id = seed_website(&store);
    let tenders = store.tenders();

    let a = scraped(website_id, "2026_PWD_5A", "Drainage", "https://x.in/app?id=5");
    let mut b = scraped(website_id, "2026_PWD_5B", "Drainage works", "https://x.in/app?id=5b");
    b.normalized_tender_url = "https://x.in/app?id=5b".to_string();
    tenders.upsert(&a).unwrap();
    tenders.upsert(&b).unwrap();

    let row_a = tenders.get_by_tender_id(website_id, "2026_PWD_5A").unwrap().unwrap();
    tenders.set_download_selected(row_a.id, true).unwrap();

    // Collapse the two rows onto one identity behind the engine's back, the
    // way two identity paths can briefly disagree mid-crawl.
    let conn = tenderacquire::repository::connect(&dir.path().join("test.db")).unwrap();
    conn.execute(
        "UPDATE tenders SET normalized_tender_url = 'https://x.in/app?id=5' WHERE tender_id = '2026_PWD_5B'",
        [],
    )
    .unwrap();

    let removed = tenders.dedupe(website_id).unwrap();
    assert_eq!(removed, 1);

    let survivors = tenders.get_all(website_id).unwrap();
    assert_eq!(survivors.len(), 1);
    // Newest row wins, and the older row's download flag merged in.
    assert_eq!(survivors[0].tender_id, "2026_PWD_5B");
    assert!(survivors[0].is_downloaded);
}

#[test]
fn archive_missing_only_touches_unseen_tenders() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let website_id = seed_website(&store);
    let tenders = store.tenders();

    tenders
        .upsert(&scraped(website_id, "2026_PWD_6", "Fencing", "https://x.in/app?id=6"))
        .unwrap();
    tenders
        .upsert(&scraped(website_id, "2026_PWD_7", "Painting", "https://x.in/app?id=7"))
        .unwrap();

    let seen: HashSet<String> = ["2026_PWD_6".to_string()].into_iter().collect();
    let archived = tenders
        .archive_missing(website_id, "Public Works", &seen)
        .unwrap();
    assert_eq!(archived, 1);

    let active = tenders.get_active(website_id).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].tender_id, "2026_PWD_6");

    // A complete crawl that saw everything archives nothing.
    let seen: HashSet<String> = ["2026_PWD_6".to_string()].into_iter().collect();
    assert_eq!(
        tenders.archive_missing(website_id, "Public Works", &seen).unwrap(),
        0
    );
}

#[test]
fn incomplete_crawl_never_archives_by_absence() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let website_id = seed_website(&store);
    let tenders = store.tenders();

    tenders
        .upsert(&scraped(website_id, "2026_PWD_13", "Retaining wall", "https://x.in/app?id=13"))
        .unwrap();

    let service = SyncService::new(store.clone(), std::time::Duration::from_secs(5));
    let mut report = SyncReport::default();

    // A crawl that never located a tender table saw nothing, but its
    // absence set must not archive anything.
    let failed = CrawlOutcome {
        tenders: Vec::new(),
        seen_ids: HashSet::new(),
        completed: false,
    };
    service.reconcile_organization(website_id, "Public Works", &failed, &mut report);
    assert_eq!(report.orgs_failed, 1);
    assert_eq!(report.archived_missing, 0);
    assert_eq!(tenders.get_active(website_id).unwrap().len(), 1);

    // The same empty outcome from a completed crawl does archive.
    let completed = CrawlOutcome {
        tenders: Vec::new(),
        seen_ids: HashSet::new(),
        completed: true,
    };
    service.reconcile_organization(website_id, "Public Works", &completed, &mut report);
    assert_eq!(report.archived_missing, 1);
    assert_eq!(tenders.get_active(website_id).unwrap().len(), 0);
}

#[test]
fn archiver_handles_terminal_overdue_and_unparsable() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let website_id = seed_website(&store);
    let tenders = store.tenders();

    let mut overdue = scraped(website_id, "2026_PWD_8", "Overdue", "https://x.in/app?id=8");
    overdue.closing_date = "01-Jan-2020 10:00 AM".to_string();
    tenders.upsert(&overdue).unwrap();

    let mut open = scraped(website_id, "2026_PWD_9", "Open", "https://x.in/app?id=9");
    open.closing_date = "01-Jan-2099 10:00 AM".to_string();
    tenders.upsert(&open).unwrap();

    let mut garbled = scraped(website_id, "2026_PWD_10", "Garbled", "https://x.in/app?id=10");
    garbled.closing_date = "to be announced".to_string();
    tenders.upsert(&garbled).unwrap();

    let mut terminal = scraped(website_id, "2026_PWD_11", "Done", "https://x.in/app?id=11");
    terminal.closing_date = "01-Jan-2099 10:00 AM".to_string();
    tenders.upsert(&terminal).unwrap();
    let row = tenders.get_by_tender_id(website_id, "2026_PWD_11").unwrap().unwrap();
    tenders.update_status(row.id, "AOC").unwrap();

    let now = NaiveDate::from_ymd_opt(2026, 8, 29).unwrap().and_hms_opt(12, 0, 0).unwrap();
    let report = ArchiveService::new(store.clone())
        .archive_completed_tenders(now)
        .unwrap();
    assert_eq!(report.archived, 2);
    assert_eq!(report.terminal, 1);

    let active: Vec<String> = tenders
        .get_active(website_id)
        .unwrap()
        .into_iter()
        .map(|t| t.tender_id)
        .collect();
    assert_eq!(active, vec!["2026_PWD_9".to_string(), "2026_PWD_10".to_string()]);
}

#[test]
fn scheduled_archive_gate_blocks_back_to_back_runs() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    seed_website(&store);
    let archive = ArchiveService::new(store.clone());

    let first = archive.run_scheduled(false).unwrap();
    assert!(!first.skipped_by_gate);

    let second = archive.run_scheduled(false).unwrap();
    assert!(second.skipped_by_gate);

    let forced = archive.run_scheduled(true).unwrap();
    assert!(!forced.skipped_by_gate);

    // Every non-skipped execution leaves an audit row.
    let runs = store.archive_runs().recent(10).unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.status == "success"));
}

#[test]
fn skip_check_backfills_unlogged_files() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let website_id = seed_website(&store);
    let tenders = store.tenders();

    tenders
        .upsert(&scraped(website_id, "2026_PWD_12", "Culvert", "https://x.in/app?id=12"))
        .unwrap();
    let row = tenders.get_by_tender_id(website_id, "2026_PWD_12").unwrap().unwrap();

    let docs = dir.path().join("documents");
    let tender_dir = docs.join("2026_PWD_12");
    std::fs::create_dir_all(&tender_dir).unwrap();

    let service = DownloadService::new(
        store.clone(),
        docs,
        String::new(),
        std::time::Duration::from_secs(5),
        std::time::Duration::from_secs(1),
    );

    // Absent from disk: never skipped, whatever the log says.
    assert!(!service
        .should_skip_file(row.id, &tender_dir, "Tendernotice_1.pdf", FileType::Notice, "https://x.in/n.pdf")
        .unwrap());

    // On disk but unlogged: the log self-heals and the file is skipped.
    std::fs::write(tender_dir.join("Tendernotice_1.pdf"), b"pdf").unwrap();
    assert!(service
        .should_skip_file(row.id, &tender_dir, "Tendernotice_1.pdf", FileType::Notice, "https://x.in/n.pdf")
        .unwrap());
    assert!(store.files().is_logged(row.id, "Tendernotice_1.pdf").unwrap());

    // On disk and logged: skipped.
    assert!(service
        .should_skip_file(row.id, &tender_dir, "Tendernotice_1.pdf", FileType::Notice, "https://x.in/n.pdf")
        .unwrap());
}

#[test]
fn two_pass_reconciliation_end_to_end() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let website_id = seed_website(&store);
    let tenders = store.tenders();

    // Pass 1 observes T1 and T2.
    let t1 = scraped(website_id, "2026_PWD_T1", "Water supply", "https://x.in/app?id=t1");
    let t2 = scraped(website_id, "2026_PWD_T2", "Sewerage", "https://x.in/app?id=t2");
    tenders.upsert(&t1).unwrap();
    tenders.upsert(&t2).unwrap();
    let seen: HashSet<String> = ["2026_PWD_T1", "2026_PWD_T2"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(tenders.archive_missing(website_id, "Public Works", &seen).unwrap(), 0);

    // Pass 2 observes T1 and a new T3; T2 has dropped off the listing.
    let t3 = scraped(website_id, "2026_PWD_T3", "Footpath", "https://x.in/app?id=t3");
    tenders.upsert(&t1).unwrap();
    tenders.upsert(&t3).unwrap();
    let seen: HashSet<String> = ["2026_PWD_T1", "2026_PWD_T3"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(tenders.archive_missing(website_id, "Public Works", &seen).unwrap(), 1);
    assert_eq!(tenders.dedupe(website_id).unwrap(), 0);

    let active: Vec<String> = tenders
        .get_active(website_id)
        .unwrap()
        .into_iter()
        .map(|t| t.tender_id)
        .collect();
    assert_eq!(active, vec!["2026_PWD_T1".to_string(), "2026_PWD_T3".to_string()]);

    let archived = tenders.get_archived(website_id).unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].tender_id, "2026_PWD_T2");
}
