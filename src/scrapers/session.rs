//! HTTP session manager for portal pages.
//!
//! Detects portal-side session expiry via page-title markers, re-enters
//! through a canonical landing URL, and retries the original fetch once.
//! Transport failures discard the cookie jar; callers treat `None` as
//! "skip this page" and continue their outer loop.

use std::time::Duration;

use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, warn};

/// Landing-page query appended to the portal's `app?` entry point when
/// re-establishing a session.
const LANDING_QUERY: &str = "page=FrontEndHome&service=page";

/// Pause between re-entry and the retried fetch, giving the portal time to
/// mint the new session.
const REENTRY_PAUSE: Duration = Duration::from_secs(2);

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// A fetched portal page.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub body: String,
}

/// Session-aware HTTP fetcher with a 30s default timeout.
pub struct SessionManager {
    client: Client,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            timeout,
        }
    }

    /// Fetch a page, recovering once from a stale session. Never raises.
    pub async fn fetch(&mut self, url: &str) -> Option<Page> {
        let body = match self.get_text(url).await {
            Ok(b) => b,
            Err(e) => {
                warn!("fetch failed for {}: {}", url, e);
                // Connection-level failure: the cookie jar may be poisoned.
                self.client = build_client(self.timeout);
                return None;
            }
        };

        if !is_stale_page(&body) {
            return Some(Page {
                url: url.to_string(),
                body,
            });
        }

        warn!("stale session detected at {}, re-entering", url);
        let reentry = reentry_url(url);
        if let Err(e) = self.get_text(&reentry).await {
            warn!("re-entry fetch failed for {}: {}", reentry, e);
            self.client = build_client(self.timeout);
            return None;
        }
        tokio::time::sleep(REENTRY_PAUSE).await;

        match self.get_text(url).await {
            Ok(body) if !is_stale_page(&body) => Some(Page {
                url: url.to_string(),
                body,
            }),
            Ok(_) => {
                warn!("still stale after re-entry, skipping {}", url);
                None
            }
            Err(e) => {
                warn!("retry fetch failed for {}: {}", url, e);
                self.client = build_client(self.timeout);
                None
            }
        }
    }

    async fn get_text(&self, url: &str) -> Result<String, reqwest::Error> {
        debug!("GET {}", url);
        let resp = self.client.get(url).send().await?;
        resp.text().await
    }
}

fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .cookie_store(true)
        .gzip(true)
        .brotli(true)
        .build()
        .expect("Failed to create HTTP client")
}

/// Extract the `<title>` text of a page, if any.
pub fn page_title(body: &str) -> Option<String> {
    let doc = Html::parse_document(body);
    let selector = Selector::parse("title").ok()?;
    doc.select(&selector)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Whether the page title carries a stale-session or error marker.
pub fn is_stale_page(body: &str) -> bool {
    match page_title(body) {
        Some(title) => {
            let lower = title.to_lowercase();
            lower.contains("stale session") || lower.contains("error")
        }
        None => false,
    }
}

/// Canonical re-entry URL for a portal host: strip everything after `app?`
/// and append the default landing query, or fall back to scheme+host when
/// no `app?` segment exists.
pub fn reentry_url(url: &str) -> String {
    if let Some(idx) = url.find("app?") {
        return format!("{}{}", &url[..idx + 4], LANDING_QUERY);
    }
    match url::Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => format!("{}://{}/nicgep/app?{}", parsed.scheme(), host, LANDING_QUERY),
            None => url.to_string(),
        },
        Err(_) => url.to_string(),
    }
}

/// Fetch binary content with an explicit cookie set (used when the browser
/// session owns the authenticated cookies). Returns None on any failure.
pub async fn download_with_cookies(
    url: &str,
    cookies: &[(String, String)],
    timeout: Duration,
) -> Option<Vec<u8>> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .ok()?;

    let cookie_header = cookies
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("; ");

    let mut req = client.get(url);
    if !cookie_header.is_empty() {
        req = req.header(reqwest::header::COOKIE, cookie_header);
    }

    match req.send().await {
        Ok(resp) if resp.status().is_success() => resp.bytes().await.ok().map(|b| b.to_vec()),
        Ok(resp) => {
            warn!("download of {} returned HTTP {}", url, resp.status());
            None
        }
        Err(e) => {
            warn!("download of {} failed: {}", url, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_stale_titles() {
        assert!(is_stale_page(
            "<html><head><title>Stale Session</title></head><body></body></html>"
        ));
        assert!(is_stale_page(
            "<html><head><title>Error Page</title></head></html>"
        ));
        assert!(!is_stale_page(
            "<html><head><title>Tender Details</title></head></html>"
        ));
        assert!(!is_stale_page("<html><body>no title</body></html>"));
    }

    #[test]
    fn reentry_strips_after_app() {
        assert_eq!(
            reentry_url("https://etenders.example.in/nicgep/app?component=view&page=Detail&id=9"),
            format!("https://etenders.example.in/nicgep/app?{}", LANDING_QUERY)
        );
    }

    #[test]
    fn reentry_falls_back_to_host() {
        assert_eq!(
            reentry_url("https://etenders.example.in/some/other/path"),
            format!("https://etenders.example.in/nicgep/app?{}", LANDING_QUERY)
        );
    }

    #[test]
    fn reentry_leaves_unparsable_input() {
        assert_eq!(reentry_url("not a url"), "not a url");
    }
}
