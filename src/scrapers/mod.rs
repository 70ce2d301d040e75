//! Portal scraping: HTTP session handling, label extraction, identity
//! derivation, and the paginated listing crawler.

pub mod extract;
pub mod identity;
pub mod listing;
pub mod session;

pub use extract::detail_by_label;
pub use identity::{derive_tender_id, derive_tender_title, normalize_tender_url};
pub use listing::{CrawlOutcome, ListingCrawler, OrgEntry};
pub use session::SessionManager;

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace() {
        assert_eq!(collapse_whitespace("  a \n\t b  c "), "a b c");
        assert_eq!(collapse_whitespace(""), "");
    }
}
