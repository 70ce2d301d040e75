//! Tender synchronization: organization fetch, listing crawl, reconciliation.
//!
//! Data flow per website: listing crawler → identity resolver → upsert
//! engine → dedupe → missing-from-crawl archiving. Organizations whose crawl
//! never located a tender table are excluded from the archiving step.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::repository::Store;
use crate::scrapers::{CrawlOutcome, ListingCrawler, SessionManager};

/// Counters from one tender-fetch operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncReport {
    pub orgs_crawled: usize,
    pub orgs_failed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub archived_missing: usize,
    pub duplicates_removed: usize,
}

/// Synchronization service over one store.
pub struct SyncService {
    store: Store,
    fetch_timeout: Duration,
}

impl SyncService {
    pub fn new(store: Store, fetch_timeout: Duration) -> Self {
        Self {
            store,
            fetch_timeout,
        }
    }

    /// Fetch and upsert the organization list for a website. Selection flags
    /// survive the refresh. Returns the number of organizations seen.
    pub async fn fetch_organizations(&self, website_id: i64) -> anyhow::Result<usize> {
        let website = self
            .store
            .websites()
            .get(website_id)?
            .ok_or_else(|| anyhow::anyhow!("unknown website {}", website_id))?;

        let mut session = SessionManager::new(self.fetch_timeout);
        let mut crawler = ListingCrawler::new(&mut session, website_id);
        let orgs = crawler.fetch_organizations(&website.listing_url).await;

        let repo = self.store.organizations();
        let mut count = 0;
        for org in &orgs {
            match repo.upsert(website_id, &org.name, org.tender_count, &org.listing_url) {
                Ok(()) => count += 1,
                Err(e) => warn!("failed to save organization {}: {}", org.name, e),
            }
        }
        info!("saved {} organizations for {}", count, website.name);
        Ok(count)
    }

    /// Crawl tenders for every selected organization of a website and
    /// reconcile them against persisted state.
    pub async fn fetch_tenders(&self, website_id: i64) -> anyhow::Result<SyncReport> {
        let website = self
            .store
            .websites()
            .get(website_id)?
            .ok_or_else(|| anyhow::anyhow!("unknown website {}", website_id))?;

        let orgs = self.store.organizations().get_selected(website_id)?;
        if orgs.is_empty() {
            warn!("no organizations selected for {}", website.name);
            return Ok(SyncReport::default());
        }

        let mut report = SyncReport::default();
        let mut session = SessionManager::new(self.fetch_timeout);

        for org in &orgs {
            let mut crawler = ListingCrawler::new(&mut session, website_id);
            let outcome = crawler.crawl_organization(&org.name, &org.listing_url).await;
            self.reconcile_organization(website_id, &org.name, &outcome, &mut report);
        }

        // Collapse duplicates the identity paths may have briefly disagreed on.
        match self.store.tenders().dedupe(website_id) {
            Ok(n) => report.duplicates_removed = n,
            Err(e) => error!("dedupe failed for {}: {}", website.name, e),
        }

        info!(
            "sync of {}: +{} / ~{} tenders, {} archived, {} duplicates removed",
            website.name,
            report.inserted,
            report.updated,
            report.archived_missing,
            report.duplicates_removed
        );
        Ok(report)
    }

    /// Reconcile one organization's crawl outcome against persisted state:
    /// upsert every scraped row, then archive the tenders missing from the
    /// seen set. The staleness pass runs only for completed crawls; a failed
    /// crawl must never archive the organization's tenders by absence.
    pub fn reconcile_organization(
        &self,
        website_id: i64,
        org_name: &str,
        outcome: &CrawlOutcome,
        report: &mut SyncReport,
    ) {
        let tenders = self.store.tenders();
        for scraped in &outcome.tenders {
            match tenders.upsert(scraped) {
                Ok(crate::models::UpsertOutcome::Inserted) => report.inserted += 1,
                Ok(crate::models::UpsertOutcome::Updated) => report.updated += 1,
                Err(e) => error!("upsert failed for {}: {}", scraped.tender_id, e),
            }
        }

        if outcome.completed {
            report.orgs_crawled += 1;
            match tenders.archive_missing(website_id, org_name, &outcome.seen_ids) {
                Ok(n) => report.archived_missing += n,
                Err(e) => error!("archive-missing failed for {}: {}", org_name, e),
            }
        } else {
            report.orgs_failed += 1;
            warn!("crawl of {} did not complete, skipping staleness pass", org_name);
        }
    }

    /// Clear saved data for a website. Websites themselves are always kept.
    pub fn clear(&self, website_id: i64, scope: ClearScope) -> anyhow::Result<usize> {
        let removed = match scope {
            ClearScope::Organizations => self.store.organizations().clear(website_id)?,
            ClearScope::ActiveTenders => self.store.tenders().clear_active(website_id)?,
            ClearScope::ArchivedTenders => self.store.tenders().clear_archived(website_id)?,
        };
        info!("cleared {} rows ({:?})", removed, scope);
        Ok(removed)
    }
}

/// Scope for the clear-data operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    Organizations,
    ActiveTenders,
    ArchivedTenders,
}
