//! Tender status poller.
//!
//! Drives the portal's status-lookup form for each tender: submit the tender
//! id, pass the challenge, and read the current processing stage out of the
//! results table. The stage column is resolved from the header row by name
//! because portal skins reorder columns. Tenders whose stage indicates an
//! opened or concluded bid also get their result documents harvested.

use std::time::Duration;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use crate::browser::{navigate_with_recovery, BrowserDriver, Locator};
use crate::captcha::{CaptchaOrchestrator, ChallengeForm};
use crate::error::{Result, ScrapeError};
use crate::models::{is_terminal_status, FileType, Tender};
use crate::repository::Store;
use crate::services::download::DownloadService;

/// Stages at which result documents are expected to exist.
const RESULT_STAGES: &[&str] = &["Financial Bid Opening"];

/// Counters from one status-poll batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusReport {
    pub polled: usize,
    pub failed: usize,
    pub updated: usize,
}

/// Status poller over one store.
pub struct StatusService {
    store: Store,
    element_wait: Duration,
}

fn status_challenge_form(wait: Duration) -> ChallengeForm {
    ChallengeForm {
        image: Locator::id("captchaImage"),
        input: Locator::id("captchaText"),
        submit: Locator::id("Search"),
        success: Locator::id("tabList"),
        wait,
    }
}

fn result_opener_chain(tender_id: &str) -> Vec<Locator> {
    vec![
        Locator::partial_link(tender_id),
        Locator::partial_link("Stage Summary"),
        Locator::id("DirectLink_0"),
    ]
}

impl StatusService {
    pub fn new(store: Store, element_wait: Duration) -> Self {
        Self {
            store,
            element_wait,
        }
    }

    /// Poll the processing stage for a batch of tenders. Per-tender failures
    /// are logged and the batch continues.
    pub async fn poll_batch<D: BrowserDriver + ?Sized>(
        &self,
        driver: &mut D,
        captcha: &mut CaptchaOrchestrator<'_>,
        status_url: &str,
        tenders: &[Tender],
    ) -> StatusReport {
        let mut report = StatusReport::default();
        for tender in tenders {
            match self.poll_tender(driver, captcha, status_url, tender).await {
                Ok(Some(stage)) => {
                    report.polled += 1;
                    report.updated += 1;
                    info!("{}: stage {}", tender.tender_id, stage);
                }
                Ok(None) => {
                    report.polled += 1;
                    debug!("{}: no stage found", tender.tender_id);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("status poll failed for {}: {}", tender.tender_id, e);
                }
            }
        }
        info!(
            "status batch: {} polled, {} updated, {} failed",
            report.polled, report.updated, report.failed
        );
        report
    }

    /// Poll stages and, where the stage indicates results exist, harvest the
    /// result documents through the downloader's popup path.
    pub async fn poll_results_batch<D: BrowserDriver + ?Sized>(
        &self,
        driver: &mut D,
        captcha: &mut CaptchaOrchestrator<'_>,
        downloader: &DownloadService,
        status_url: &str,
        tenders: &[Tender],
    ) -> StatusReport {
        let mut report = StatusReport::default();
        for tender in tenders {
            let stage = match self.poll_tender(driver, captcha, status_url, tender).await {
                Ok(Some(stage)) => {
                    report.polled += 1;
                    report.updated += 1;
                    stage
                }
                Ok(None) => {
                    report.polled += 1;
                    continue;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("status poll failed for {}: {}", tender.tender_id, e);
                    continue;
                }
            };

            if !has_results(&stage) {
                continue;
            }
            let dir = downloader.resolve_save_dir(tender);
            if let Err(e) = std::fs::create_dir_all(&dir) {
                warn!("cannot create {}: {}", dir.display(), e);
                continue;
            }
            let mut dl = crate::services::download::DownloadReport::default();
            downloader
                .harvest_popup_documents(
                    driver,
                    tender,
                    &dir,
                    FileType::Result,
                    &result_opener_chain(&tender.tender_id),
                    &mut dl,
                )
                .await;
            if dl.files_downloaded > 0 {
                info!(
                    "{}: {} result documents",
                    tender.tender_id, dl.files_downloaded
                );
            }
        }
        report
    }

    /// One lookup: navigate to the status form, submit the tender id through
    /// the challenge, and read the stage from the results table.
    async fn poll_tender<D: BrowserDriver + ?Sized>(
        &self,
        driver: &mut D,
        captcha: &mut CaptchaOrchestrator<'_>,
        status_url: &str,
        tender: &Tender,
    ) -> Result<Option<String>> {
        if !navigate_with_recovery(driver, status_url, status_url).await? {
            return Err(ScrapeError::StaleSession {
                url: status_url.to_string(),
            });
        }

        let input = Locator::id("tenderId");
        if !driver.wait_for(&input, self.element_wait).await? {
            return Err(ScrapeError::Parse("status form input not found".into()));
        }
        driver.type_text(&input, &tender.tender_id).await?;

        let form = status_challenge_form(self.element_wait);
        if !captcha.solve(driver, &form).await? {
            return Err(ScrapeError::CaptchaExhausted);
        }

        let html = driver.page_source().await?;
        let stage = parse_stage(&html);
        if let Some(stage) = &stage {
            self.store.tenders().update_status(tender.id, stage)?;
        }
        Ok(stage)
    }
}

/// Whether a stage string means result documents should exist.
pub fn has_results(stage: &str) -> bool {
    let s = stage.trim();
    is_terminal_status(s) || RESULT_STAGES.iter().any(|r| r.eq_ignore_ascii_case(s))
}

/// Extract the stage of the first result row from a status-results page.
///
/// The column is found by header name rather than position. When no header
/// row names it, the conventional last column is used.
pub fn parse_stage(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let table_sel = Selector::parse("table").ok()?;
    let row_sel = Selector::parse("tr").ok()?;
    let cell_sel = Selector::parse("td, th").ok()?;

    let mut last_column_fallback: Option<String> = None;
    for table in doc.select(&table_sel) {
        let rows: Vec<ElementRef> = table.select(&row_sel).collect();
        if rows.len() < 2 {
            continue;
        }
        let header: Vec<String> = rows[0]
            .select(&cell_sel)
            .map(|c| c.text().collect::<String>().trim().to_string())
            .collect();
        let idx = match stage_column_index(&header) {
            Some(idx) => idx,
            None => {
                // No stage-named column; remember the conventional last
                // column of the first multi-column data row in case no
                // table in the page names one.
                if last_column_fallback.is_none() {
                    last_column_fallback = rows[1..]
                        .iter()
                        .filter_map(|row| {
                            let cells: Vec<String> = row
                                .select(&cell_sel)
                                .map(|c| c.text().collect::<String>().trim().to_string())
                                .collect();
                            if cells.len() < 2 {
                                return None;
                            }
                            cells.last().filter(|s| !s.is_empty()).cloned()
                        })
                        .next();
                }
                continue;
            }
        };
        for row in &rows[1..] {
            let cells: Vec<String> = row
                .select(&cell_sel)
                .map(|c| c.text().collect::<String>().trim().to_string())
                .collect();
            if let Some(stage) = cells.get(idx) {
                if !stage.is_empty() {
                    return Some(stage.clone());
                }
            }
        }
    }
    last_column_fallback
}

/// Index of the stage column in a header row.
pub fn stage_column_index(header: &[String]) -> Option<usize> {
    header
        .iter()
        .position(|h| h.to_lowercase().contains("stage"))
        .or_else(|| header.iter().position(|h| h.to_lowercase().contains("status")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_stage_column_by_name() {
        let header = vec![
            "S.No".to_string(),
            "Tender ID".to_string(),
            "Title".to_string(),
            "Tender Stage".to_string(),
        ];
        assert_eq!(stage_column_index(&header), Some(3));

        let reordered = vec!["Current Status".to_string(), "Tender ID".to_string()];
        assert_eq!(stage_column_index(&reordered), Some(0));

        let none = vec!["S.No".to_string(), "Title".to_string()];
        assert_eq!(stage_column_index(&none), None);
    }

    #[test]
    fn parses_stage_from_results_table() {
        let html = r#"
            <html><body><table id="tabList">
                <tr><th>S.No</th><th>Tender ID</th><th>Tender Stage</th></tr>
                <tr><td>1</td><td>2026_PWD_1</td><td>Financial Bid Opening</td></tr>
            </table></body></html>
        "#;
        assert_eq!(parse_stage(html), Some("Financial Bid Opening".to_string()));
    }

    #[test]
    fn reordered_columns_still_resolve() {
        let html = r#"
            <html><body><table>
                <tr><th>Tender Stage</th><th>Tender ID</th></tr>
                <tr><td>AOC</td><td>2026_PWD_2</td></tr>
            </table></body></html>
        "#;
        assert_eq!(parse_stage(html), Some("AOC".to_string()));
    }

    #[test]
    fn unnamed_columns_fall_back_to_last_column() {
        let html = r#"
            <html><body><table>
                <tr><th>S.No</th><th>ID</th><th></th></tr>
                <tr><td>1</td><td>2026_PWD_3</td><td>Technical Evaluation</td></tr>
            </table></body></html>
        "#;
        assert_eq!(parse_stage(html), Some("Technical Evaluation".to_string()));
    }

    #[test]
    fn named_column_wins_over_fallback() {
        let html = r#"
            <html><body>
            <table>
                <tr><th>S.No</th><th>Detail</th></tr>
                <tr><td>1</td><td>not a stage</td></tr>
            </table>
            <table>
                <tr><th>Tender ID</th><th>Tender Stage</th></tr>
                <tr><td>2026_PWD_4</td><td>AOC</td></tr>
            </table>
            </body></html>
        "#;
        assert_eq!(parse_stage(html), Some("AOC".to_string()));
    }

    #[test]
    fn page_without_stage_table_yields_none() {
        let html = "<html><body><p>No records found</p></body></html>";
        assert_eq!(parse_stage(html), None);
    }

    #[test]
    fn result_stage_detection() {
        assert!(has_results("AOC"));
        assert!(has_results("financial bid opening"));
        assert!(has_results(" Concluded "));
        assert!(!has_results("Technical Evaluation"));
        assert!(!has_results(""));
    }
}
