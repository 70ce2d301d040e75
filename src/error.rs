//! Error types shared across the scraping and download pipeline.
//!
//! Batch loops catch these at item boundaries, log, and continue; no
//! per-item failure is allowed to abort a whole crawl or download batch.

use thiserror::Error;

/// Errors raised by scraping, persistence, and document acquisition.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Transport-level failure (timeout, connection refused, DNS).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Portal-side session expiry detected via page-title markers.
    #[error("stale session at {url}")]
    StaleSession { url: String },

    /// Expected DOM shape was absent.
    #[error("parse error: {0}")]
    Parse(String),

    /// Database failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// All automatic and manual captcha attempts failed, or the user
    /// cancelled the manual prompt.
    #[error("captcha attempts exhausted")]
    CaptchaExhausted,

    /// Browser automation driver failure.
    #[error("browser error: {0}")]
    Browser(String),

    /// Vision model call failure.
    #[error("vision error: {0}")]
    Vision(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
