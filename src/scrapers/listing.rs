//! Paginated listing crawler.
//!
//! Walks organization tender tables page by page, enriches each row from its
//! detail page, and yields reconciliation-ready rows. A failed page fetch
//! ends that organization's pagination chain; rows gathered from earlier
//! pages are kept. Detail-page failures leave the enriched fields at "N/A"
//! without aborting the row.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use super::extract::{cell_text, detail_by_label};
use super::identity::{derive_tender_id, derive_tender_title, normalize_tender_url};
use super::session::SessionManager;
use crate::models::ScrapedTender;

/// One organization row from the organization-list page.
#[derive(Debug, Clone)]
pub struct OrgEntry {
    pub name: String,
    pub tender_count: i64,
    pub listing_url: String,
}

/// Result of crawling one organization.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub tenders: Vec<ScrapedTender>,
    /// Tender IDs observed in this crawl, consumed by the staleness archiver.
    pub seen_ids: HashSet<String>,
    /// False when no tender table was ever located; such organizations are
    /// excluded from missing-from-crawl archiving.
    pub completed: bool,
}

/// Crawler over one website's listing pages.
pub struct ListingCrawler<'a> {
    session: &'a mut SessionManager,
    website_id: i64,
}

impl<'a> ListingCrawler<'a> {
    pub fn new(session: &'a mut SessionManager, website_id: i64) -> Self {
        Self {
            session,
            website_id,
        }
    }

    /// Fetch and parse the organization list.
    pub async fn fetch_organizations(&mut self, listing_url: &str) -> Vec<OrgEntry> {
        let page = match self.session.fetch(listing_url).await {
            Some(p) => p,
            None => return Vec::new(),
        };
        let orgs = parse_org_table(&page.body, listing_url);
        info!("found {} organizations", orgs.len());
        orgs
    }

    /// Crawl all pages of one organization's tender listing.
    pub async fn crawl_organization(&mut self, org_name: &str, listing_url: &str) -> CrawlOutcome {
        let mut outcome = CrawlOutcome::default();
        let mut page_url = listing_url.to_string();
        let mut visited: HashSet<String> = HashSet::new();

        loop {
            if !visited.insert(page_url.clone()) {
                // Pagination loop guard.
                break;
            }

            let page = match self.session.fetch(&page_url).await {
                Some(p) => p,
                None => {
                    warn!("page fetch failed for {}, ending pagination", page_url);
                    break;
                }
            };

            let (rows, next) = {
                let doc = Html::parse_document(&page.body);
                match find_tender_table(&doc) {
                    Some(table) => {
                        outcome.completed = true;
                        (parse_tender_rows(table, &page_url), next_link(&doc, &page_url))
                    }
                    None => {
                        debug!("no tender table on {}", page_url);
                        (Vec::new(), None)
                    }
                }
            };

            for row in rows {
                let scraped = self.enrich_row(org_name, row).await;
                outcome.seen_ids.insert(scraped.tender_id.clone());
                outcome.tenders.push(scraped);
            }

            match next {
                Some(n) => page_url = n,
                None => break,
            }
        }

        info!(
            "crawled {}: {} tenders, completed={}",
            org_name,
            outcome.tenders.len(),
            outcome.completed
        );
        outcome
    }

    /// Fetch the detail page for a listing row and resolve all fields.
    /// Any failure leaves the detail-derived fields at "N/A".
    async fn enrich_row(&mut self, org_name: &str, row: ListingRow) -> ScrapedTender {
        let detail_doc = match self.session.fetch(&row.tender_url).await {
            Some(page) => Some(Html::parse_document(&page.body)),
            None => None,
        };
        let detail = detail_doc.as_ref();

        let field = |labels: &[&str], allow_contains: bool| {
            detail
                .and_then(|doc| detail_by_label(doc, labels, allow_contains))
                .unwrap_or_else(|| "N/A".to_string())
        };

        let tender_id = derive_tender_id(&row.title_text, detail, &row.tender_url);
        let title = derive_tender_title(&row.title_text, detail);

        ScrapedTender {
            website_id: self.website_id,
            org_chain: org_name.to_string(),
            tender_id,
            title,
            value: field(&["Tender Value", "Tender Value in Rs."], true),
            emd: field(&["EMD", "EMD Amount", "EMD Amount in Rs."], true),
            closing_date: row.closing_date,
            opening_date: row.opening_date,
            location: field(&["Location", "Pincode/Location"], true),
            // Strict: the contains tiers false-positive against
            // "Product Category" and similar labels.
            category: field(&["Tender Category"], false),
            prebid_meeting_date: field(&["Pre Bid Meeting Date", "Pre-Bid Meeting Date"], true),
            work_description: field(&["Work Description", "Description"], true),
            normalized_tender_url: normalize_tender_url(&row.tender_url),
            tender_url: row.tender_url,
        }
    }
}

/// One raw row from a tender listing table.
#[derive(Debug, Clone)]
struct ListingRow {
    title_text: String,
    tender_url: String,
    closing_date: String,
    opening_date: String,
}

/// Locate the tender table: known id/class first, then a header-cell
/// heuristic ("S.No" in a table that also carries "e-Published Date").
fn find_tender_table(doc: &Html) -> Option<ElementRef<'_>> {
    for sel in ["table#table", "table.list_table"] {
        let selector = Selector::parse(sel).expect("static selector");
        if let Some(table) = doc.select(&selector).next() {
            return Some(table);
        }
    }

    let table_sel = Selector::parse("table").expect("static selector");
    let cell_sel = Selector::parse("td, th").expect("static selector");
    doc.select(&table_sel).find(|table| {
        let mut has_sno = false;
        let mut has_published = false;
        for cell in table.select(&cell_sel) {
            let text = cell_text(cell);
            if text.contains("S.No") {
                has_sno = true;
            }
            if text.contains("e-Published Date") {
                has_published = true;
            }
        }
        has_sno && has_published
    })
}

/// Parse data rows: more than 4 cells, cell 4 holds the title link,
/// cells 2/3 the closing/opening date text.
fn parse_tender_rows(table: ElementRef<'_>, base_url: &str) -> Vec<ListingRow> {
    let row_sel = Selector::parse("tr").expect("static selector");
    let cell_sel = Selector::parse("td").expect("static selector");
    let anchor_sel = Selector::parse("a").expect("static selector");

    let mut rows = Vec::new();
    for tr in table.select(&row_sel) {
        let cells: Vec<ElementRef<'_>> = tr.select(&cell_sel).collect();
        if cells.len() <= 4 {
            continue;
        }

        let title_cell = cells[4];
        let anchor = match title_cell.select(&anchor_sel).next() {
            Some(a) => a,
            None => continue,
        };
        let href = match anchor.value().attr("href") {
            Some(h) if !h.trim().is_empty() => h,
            _ => continue,
        };

        rows.push(ListingRow {
            title_text: cell_text(title_cell),
            tender_url: resolve_url(base_url, href),
            closing_date: cell_text(cells[2]),
            opening_date: cell_text(cells[3]),
        });
    }
    rows
}

/// Find the pagination "Next" link on a page.
fn next_link(doc: &Html, base_url: &str) -> Option<String> {
    let anchor_sel = Selector::parse("a").expect("static selector");
    for a in doc.select(&anchor_sel) {
        let text = cell_text(a);
        if text.contains("Next") {
            if let Some(href) = a.value().attr("href") {
                if !href.trim().is_empty() && href != "#" {
                    return Some(resolve_url(base_url, href));
                }
            }
        }
    }
    None
}

/// Parse the organization-list table: rows carrying an anchor whose target
/// is that organization's tender listing, with a tender count alongside.
fn parse_org_table(body: &str, base_url: &str) -> Vec<OrgEntry> {
    let doc = Html::parse_document(body);
    let row_sel = Selector::parse("tr").expect("static selector");
    let cell_sel = Selector::parse("td").expect("static selector");
    let anchor_sel = Selector::parse("a").expect("static selector");

    let mut orgs = Vec::new();
    for tr in doc.select(&row_sel) {
        let cells: Vec<ElementRef<'_>> = tr.select(&cell_sel).collect();
        if cells.len() < 2 {
            continue;
        }
        let anchor = match tr.select(&anchor_sel).next() {
            Some(a) => a,
            None => continue,
        };
        let href = match anchor.value().attr("href") {
            Some(h) if !h.trim().is_empty() && h != "#" => h,
            _ => continue,
        };

        // Name is the first non-numeric cell. The count is usually the
        // anchor text itself; otherwise the last numeric cell, so the
        // leading serial-number column never wins.
        let name = cells
            .iter()
            .map(|c| cell_text(*c))
            .find(|t| !t.is_empty() && parse_count(t).is_none())
            .unwrap_or_default();
        if name.is_empty() || name.eq_ignore_ascii_case("Organisation Name") {
            continue;
        }
        let tender_count = parse_count(&cell_text(anchor))
            .or_else(|| {
                cells
                    .iter()
                    .rev()
                    .filter_map(|c| parse_count(&cell_text(*c)))
                    .next()
            })
            .unwrap_or(0);

        orgs.push(OrgEntry {
            name,
            tender_count,
            listing_url: resolve_url(base_url, href),
        });
    }
    orgs
}

fn parse_count(text: &str) -> Option<i64> {
    let cleaned: String = text.chars().filter(|c| *c != ',').collect();
    cleaned.trim().parse().ok()
}

/// Resolve a possibly-relative href against the page it appeared on.
fn resolve_url(base: &str, href: &str) -> String {
    match Url::parse(base).and_then(|b| b.join(href)) {
        Ok(u) => u.to_string(),
        Err(_) => href.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <html><body><table id="table">
            <tr><th>S.No</th><th>e-Published Date</th><th>Closing Date</th>
                <th>Opening Date</th><th>Title and Ref.No./Tender ID</th></tr>
            <tr><td>1</td><td>01-Aug-2026 10:00 AM</td><td>20-Aug-2026 03:00 PM</td>
                <td>21-Aug-2026 03:30 PM</td>
                <td><a href="/nicgep/app?page=Detail&amp;id=77">Road work [2026_PWD_777_1]</a></td></tr>
            <tr><td colspan="5">spacer</td></tr>
        </table>
        <a href="/nicgep/app?page=2">Next &#187;</a>
        </body></html>"#;

    #[test]
    fn finds_table_and_rows() {
        let doc = Html::parse_document(LISTING);
        let table = find_tender_table(&doc).expect("table");
        let rows = parse_tender_rows(table, "https://x.in/nicgep/app?page=1");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].closing_date, "20-Aug-2026 03:00 PM");
        assert_eq!(rows[0].opening_date, "21-Aug-2026 03:30 PM");
        assert!(rows[0].tender_url.starts_with("https://x.in/nicgep/app?page=Detail"));
        assert!(rows[0].title_text.contains("Road work"));
    }

    #[test]
    fn finds_table_by_header_heuristic() {
        let html = LISTING.replace(r#"<table id="table">"#, "<table>");
        let doc = Html::parse_document(&html);
        assert!(find_tender_table(&doc).is_some());
    }

    #[test]
    fn no_table_when_headers_missing() {
        let doc = Html::parse_document("<table><tr><td>S.No</td></tr></table>");
        assert!(find_tender_table(&doc).is_none());
    }

    #[test]
    fn follows_next_link() {
        let doc = Html::parse_document(LISTING);
        assert_eq!(
            next_link(&doc, "https://x.in/nicgep/app?page=1"),
            Some("https://x.in/nicgep/app?page=2".to_string())
        );
        let last = Html::parse_document("<html><body>no more</body></html>");
        assert_eq!(next_link(&last, "https://x.in/"), None);
    }

    #[test]
    fn parses_org_table() {
        let html = r#"<table>
            <tr><th>S.No</th><th>Organisation Name</th><th>Tender Count</th></tr>
            <tr><td>1</td><td>Public Works Department</td>
                <td><a href="/nicgep/app?page=Orgs&amp;org=PWD">1,204</a></td></tr>
            <tr><td>2</td><td>Water Board</td>
                <td><a href="/nicgep/app?page=Orgs&amp;org=WB">37</a></td></tr>
        </table>"#;
        let orgs = parse_org_table(html, "https://x.in/nicgep/app");
        assert_eq!(orgs.len(), 2);
        assert_eq!(orgs[0].name, "Public Works Department");
        // The serial-number column must never be read as the count.
        assert_eq!(orgs[0].tender_count, 1204);
        assert_eq!(orgs[1].tender_count, 37);
        assert!(orgs[1].listing_url.contains("org=WB"));
    }

    #[test]
    fn org_count_from_last_numeric_cell_when_anchor_wraps_name() {
        let html = r#"<table>
            <tr><td>3</td>
                <td><a href="/nicgep/app?page=Orgs&amp;org=RD">Roads Department</a></td>
                <td>52</td></tr>
        </table>"#;
        let orgs = parse_org_table(html, "https://x.in/nicgep/app");
        assert_eq!(orgs.len(), 1);
        assert_eq!(orgs[0].name, "Roads Department");
        assert_eq!(orgs[0].tender_count, 52);
    }
}
