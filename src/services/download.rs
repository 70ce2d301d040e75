//! Document download orchestrator.
//!
//! Drives the browser through each tender's detail page and fetches the
//! associated assets: tender-notice PDF, full document zip, pre-bid doc, and
//! corrigenda (plus result docs via the status poller). Every asset is
//! guarded by the downloaded-file log so repeated runs skip what is already
//! on disk, with a self-healing backfill when a file exists on disk but was
//! never logged.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::browser::{navigate_with_recovery, BrowserDriver, Locator};
use crate::captcha::{CaptchaOrchestrator, ChallengeForm};
use crate::error::{Result, ScrapeError};
use crate::models::{DownloadMode, FileType, Tender};
use crate::repository::Store;
use crate::scrapers::session::download_with_cookies;

/// Counters from one download batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct DownloadReport {
    pub tenders_done: usize,
    pub tenders_failed: usize,
    pub files_downloaded: usize,
    pub files_skipped: usize,
}

/// Download orchestrator over one store and documents directory.
pub struct DownloadService {
    store: Store,
    documents_dir: PathBuf,
    /// Known-good entry URL for stale-session recovery.
    entry_url: String,
    download_timeout: Duration,
    element_wait: Duration,
}

/// Locator fallback chains per asset. Portal skins vary in which control
/// they expose, so each is tried in order.
fn notice_chain() -> Vec<Locator> {
    vec![
        Locator::id("DirectLink_1"),
        Locator::partial_link("Tendernotice"),
        Locator::partial_link("NIT"),
    ]
}

fn zip_chain() -> Vec<Locator> {
    vec![
        Locator::id("DirectLink_Zip"),
        Locator::partial_link("Download as zip"),
        Locator::id("docDownoad"),
    ]
}

fn prebid_chain() -> Vec<Locator> {
    vec![
        Locator::id("DirectLink_PreBid"),
        Locator::partial_link("Pre Bid"),
        Locator::partial_link("PreBid"),
    ]
}

fn corrigendum_opener_chain() -> Vec<Locator> {
    vec![
        Locator::id("linkCorrigendum"),
        Locator::partial_link("Corrigendum"),
    ]
}

/// Challenge form layout on document-download pages.
fn download_challenge_form(wait: Duration) -> ChallengeForm {
    ChallengeForm {
        image: Locator::id("captchaImage"),
        input: Locator::id("captchaText"),
        submit: Locator::id("Submit"),
        success: Locator::id("DirectLink_1"),
        wait,
    }
}

impl DownloadService {
    pub fn new(
        store: Store,
        documents_dir: PathBuf,
        entry_url: String,
        download_timeout: Duration,
        element_wait: Duration,
    ) -> Self {
        Self {
            store,
            documents_dir,
            entry_url,
            download_timeout,
            element_wait,
        }
    }

    /// Download assets for a batch of tenders. Per-tender failures are
    /// logged and the batch continues; the caller tears the driver down
    /// unconditionally afterwards.
    pub async fn download_batch<D: BrowserDriver + ?Sized>(
        &self,
        driver: &mut D,
        captcha: &mut CaptchaOrchestrator<'_>,
        tenders: &[Tender],
        mode_override: Option<DownloadMode>,
    ) -> DownloadReport {
        let mut report = DownloadReport::default();
        for tender in tenders {
            match self
                .download_tender(driver, captcha, tender, mode_override, &mut report)
                .await
            {
                Ok(()) => report.tenders_done += 1,
                Err(e) => {
                    report.tenders_failed += 1;
                    warn!("download failed for {}: {}", tender.tender_id, e);
                }
            }
        }
        info!(
            "download batch: {} ok, {} failed, {} files ({} skipped)",
            report.tenders_done, report.tenders_failed, report.files_downloaded, report.files_skipped
        );
        report
    }

    async fn download_tender<D: BrowserDriver + ?Sized>(
        &self,
        driver: &mut D,
        captcha: &mut CaptchaOrchestrator<'_>,
        tender: &Tender,
        mode_override: Option<DownloadMode>,
        report: &mut DownloadReport,
    ) -> Result<()> {
        let mode = choose_mode(tender, mode_override);
        let dir = self.resolve_save_dir(tender);
        std::fs::create_dir_all(&dir)?;

        if !navigate_with_recovery(driver, &tender.tender_url, &self.entry_url).await? {
            return Err(ScrapeError::StaleSession {
                url: tender.tender_url.clone(),
            });
        }

        // Reaching the download links may require passing a challenge.
        let form = download_challenge_form(self.element_wait);
        if driver.is_present(&form.image).await? && !captcha.solve(driver, &form).await? {
            return Err(ScrapeError::CaptchaExhausted);
        }

        let before = report.files_downloaded;

        if mode == DownloadMode::Full {
            self.fetch_direct_asset(
                driver,
                tender,
                &dir,
                FileType::Notice,
                &notice_chain(),
                "Tendernotice_1.pdf",
                report,
            )
            .await;
            self.fetch_direct_asset(
                driver,
                tender,
                &dir,
                FileType::Zip,
                &zip_chain(),
                "TenderDocument.zip",
                report,
            )
            .await;
        }

        self.fetch_direct_asset(
            driver,
            tender,
            &dir,
            FileType::Prebid,
            &prebid_chain(),
            "PreBidMeetingDoc.pdf",
            report,
        )
        .await;

        self.harvest_popup_documents(
            driver,
            tender,
            &dir,
            FileType::Corrigendum,
            &corrigendum_opener_chain(),
            report,
        )
        .await;

        if report.files_downloaded > before {
            self.store.tenders().mark_downloaded(
                tender.id,
                &dir.to_string_lossy(),
                Utc::now(),
            )?;
        }
        Ok(())
    }

    /// Fetch one href-carrying asset through its locator fallback chain.
    /// Failures are logged, never raised: the remaining assets of the same
    /// tender must still be attempted.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_direct_asset<D: BrowserDriver + ?Sized>(
        &self,
        driver: &mut D,
        tender: &Tender,
        dir: &Path,
        file_type: FileType,
        chain: &[Locator],
        default_name: &str,
        report: &mut DownloadReport,
    ) {
        for locator in chain {
            let present = match driver.is_present(locator).await {
                Ok(p) => p,
                Err(e) => {
                    warn!("locator probe failed: {}", e);
                    return;
                }
            };
            if !present {
                continue;
            }

            let href = match driver.attribute(locator, "href").await {
                Ok(Some(h)) if !h.trim().is_empty() && h != "#" => h,
                _ => {
                    debug!("{:?} has no usable href, trying next locator", locator);
                    continue;
                }
            };
            let base = driver.current_url().await.unwrap_or_default();
            let url = resolve_href(&base, &href);
            let file_name = file_name_from_url(&url, default_name);

            match self.should_skip_file(tender.id, dir, &file_name, file_type, &url) {
                Ok(true) => {
                    report.files_skipped += 1;
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("skip check failed for {}: {}", file_name, e);
                    return;
                }
            }

            let cookies = match driver.cookies().await {
                Ok(c) => c,
                Err(e) => {
                    warn!("cookie read failed: {}", e);
                    return;
                }
            };
            match download_with_cookies(&url, &cookies, self.download_timeout).await {
                Some(bytes) => {
                    let path = dir.join(&file_name);
                    if let Err(e) = std::fs::write(&path, &bytes) {
                        warn!("write failed for {}: {}", path.display(), e);
                        return;
                    }
                    if let Err(e) = self.store.files().log(
                        tender.id,
                        &file_name,
                        file_type,
                        &url,
                        &path.to_string_lossy(),
                    ) {
                        warn!("file log failed for {}: {}", file_name, e);
                    }
                    report.files_downloaded += 1;
                }
                None => warn!("download failed for {}", url),
            }
            return;
        }
        debug!("no {} control found for {}", file_type.as_str(), tender.tender_id);
    }

    /// Corrigenda/result documents live behind a popup window: open it,
    /// harvest every pdf/xlsx/zip anchor, close it, and return focus to the
    /// main window (recovering defensively if the close itself fails).
    pub(crate) async fn harvest_popup_documents<D: BrowserDriver + ?Sized>(
        &self,
        driver: &mut D,
        tender: &Tender,
        dir: &Path,
        file_type: FileType,
        opener_chain: &[Locator],
        report: &mut DownloadReport,
    ) {
        let opener = {
            let mut found = None;
            for locator in opener_chain {
                match driver.is_present(locator).await {
                    Ok(true) => {
                        found = Some(locator.clone());
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("opener probe failed: {}", e);
                        return;
                    }
                }
            }
            match found {
                Some(l) => l,
                None => return,
            }
        };

        let before: Vec<String> = match driver.window_handles().await {
            Ok(h) => h,
            Err(e) => {
                warn!("window enumeration failed: {}", e);
                return;
            }
        };
        let main = before.first().cloned();

        if let Err(e) = driver.click(&opener).await {
            warn!("popup open failed: {}", e);
            return;
        }

        let popup = match self.wait_for_new_window(driver, &before).await {
            Some(h) => h,
            None => {
                warn!("popup never appeared for {}", tender.tender_id);
                return;
            }
        };
        if let Err(e) = driver.switch_to_window(&popup).await {
            warn!("switch to popup failed: {}", e);
            return;
        }

        let hrefs = driver.anchor_hrefs().await.unwrap_or_default();
        let base = driver.current_url().await.unwrap_or_default();
        let cookies = driver.cookies().await.unwrap_or_default();

        for href in hrefs.iter().filter(|h| is_document_href(h)) {
            let url = resolve_href(&base, href);
            let file_name = file_name_from_url(&url, "document.pdf");
            match self.should_skip_file(tender.id, dir, &file_name, file_type, &url) {
                Ok(true) => {
                    report.files_skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("skip check failed for {}: {}", file_name, e);
                    continue;
                }
            }
            match download_with_cookies(&url, &cookies, self.download_timeout).await {
                Some(bytes) => {
                    let path = dir.join(&file_name);
                    match std::fs::write(&path, &bytes) {
                        Ok(()) => {
                            if let Err(e) = self.store.files().log(
                                tender.id,
                                &file_name,
                                file_type,
                                &url,
                                &path.to_string_lossy(),
                            ) {
                                warn!("file log failed for {}: {}", file_name, e);
                            }
                            report.files_downloaded += 1;
                        }
                        Err(e) => warn!("write failed for {}: {}", path.display(), e),
                    }
                }
                None => warn!("download failed for {}", url),
            }
        }

        if let Err(e) = driver.close_window().await {
            warn!("popup close failed: {}", e);
        }
        if let Some(main) = main {
            if let Err(e) = driver.switch_to_window(&main).await {
                // Last resort: any surviving window keeps the batch alive.
                warn!("switch back to main failed: {}", e);
                if let Ok(handles) = driver.window_handles().await {
                    if let Some(first) = handles.first() {
                        let _ = driver.switch_to_window(first).await;
                    }
                }
            }
        }
    }

    async fn wait_for_new_window<D: BrowserDriver + ?Sized>(
        &self,
        driver: &mut D,
        before: &[String],
    ) -> Option<String> {
        let known: HashSet<&String> = before.iter().collect();
        let deadline = tokio::time::Instant::now() + self.element_wait;
        loop {
            if let Ok(handles) = driver.window_handles().await {
                if let Some(new) = handles.iter().find(|h| !known.contains(h)) {
                    return Some(new.clone());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Skip when the file is already on disk and logged. A file on disk but
    /// missing from the log is logged now and then skipped; a file absent
    /// from disk is never skipped, whatever the log says.
    pub fn should_skip_file(
        &self,
        tender_pk: i64,
        dir: &Path,
        file_name: &str,
        file_type: FileType,
        source_url: &str,
    ) -> Result<bool> {
        let path = dir.join(file_name);
        if !path.exists() {
            return Ok(false);
        }
        let files = self.store.files();
        if files.is_logged(tender_pk, file_name)? {
            return Ok(true);
        }
        // Self-healing backfill for log/filesystem divergence.
        files.log(
            tender_pk,
            file_name,
            file_type,
            source_url,
            &path.to_string_lossy(),
        )?;
        debug!("backfilled log entry for {}", file_name);
        Ok(true)
    }

    /// Reuse an existing folder_path only when it points at the same
    /// canonical per-tender directory; otherwise use the canonical one.
    pub fn resolve_save_dir(&self, tender: &Tender) -> PathBuf {
        let canonical = self.documents_dir.join(sanitize_filename(&tender.tender_id));
        if let Some(existing) = tender.folder_path.as_deref().filter(|p| !p.is_empty()) {
            let existing = PathBuf::from(existing);
            if existing.file_name() == canonical.file_name() && existing.is_dir() {
                return existing;
            }
        }
        canonical
    }
}

/// Mode selection: explicit override wins, otherwise "has been downloaded
/// before" selects the incremental update.
pub fn choose_mode(tender: &Tender, mode_override: Option<DownloadMode>) -> DownloadMode {
    mode_override.unwrap_or(if tender.last_downloaded_at.is_some() {
        DownloadMode::Update
    } else {
        DownloadMode::Full
    })
}

/// Whether a popup anchor points at a downloadable document.
pub fn is_document_href(href: &str) -> bool {
    let path = href
        .split(['?', '#'])
        .next()
        .unwrap_or("")
        .to_lowercase();
    path.ends_with(".pdf") || path.ends_with(".xlsx") || path.ends_with(".zip")
}

/// Derive a filesystem-safe file name from a URL, with a fallback.
pub fn file_name_from_url(url: &str, default_name: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or("");
    let name = path.rsplit('/').next().unwrap_or("").trim();
    if name.is_empty() {
        default_name.to_string()
    } else {
        sanitize_filename(name)
    }
}

/// Replace characters that are unsafe in file names.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn resolve_href(base: &str, href: &str) -> String {
    match url::Url::parse(base).and_then(|b| b.join(href)) {
        Ok(u) => u.to_string(),
        Err(_) => href.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_selection() {
        let fresh = Tender::default();
        assert_eq!(choose_mode(&fresh, None), DownloadMode::Full);

        let downloaded = Tender {
            last_downloaded_at: Some(Utc::now()),
            ..Tender::default()
        };
        assert_eq!(choose_mode(&downloaded, None), DownloadMode::Update);
        assert_eq!(
            choose_mode(&downloaded, Some(DownloadMode::Full)),
            DownloadMode::Full
        );
    }

    #[test]
    fn document_href_detection() {
        assert!(is_document_href("/docs/corrigendum1.PDF"));
        assert!(is_document_href("https://x.in/a/b.zip?sid=1"));
        assert!(is_document_href("boq.xlsx"));
        assert!(!is_document_href("https://x.in/app?page=Detail"));
        assert!(!is_document_href("image.png"));
    }

    #[test]
    fn file_names_from_urls() {
        assert_eq!(
            file_name_from_url("https://x.in/docs/Tendernotice_1.pdf?sid=9", "d.pdf"),
            "Tendernotice_1.pdf"
        );
        assert_eq!(file_name_from_url("https://x.in/docs/", "d.pdf"), "d.pdf");
        assert_eq!(
            file_name_from_url("https://x.in/a%20b.pdf", "d.pdf"),
            "a_20b.pdf"
        );
    }

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize_filename("a b/c:d.pdf"), "a_b_c_d.pdf");
        assert_eq!(sanitize_filename("2026_PWD_1.zip"), "2026_PWD_1.zip");
    }
}
