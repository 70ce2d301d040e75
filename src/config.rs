//! Configuration management.
//!
//! Settings come from an optional TOML file with environment-variable
//! overrides (loaded through dotenvy before the CLI runs).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default timeout for listing/detail HTTP fetches.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
/// Default timeout for binary document downloads.
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 120;
/// Default explicit wait for browser-automation element presence.
pub const DEFAULT_ELEMENT_WAIT_SECS: u64 = 15;
/// Hours that must elapse between scheduled archive runs.
pub const AUTO_ARCHIVE_INTERVAL_HOURS: i64 = 12;

/// Application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Root directory for downloaded tender documents.
    pub documents_dir: PathBuf,
    /// Gemini API key; falls back to the GEMINI_API_KEY environment variable.
    pub gemini_api_key: Option<String>,
    /// Pinned vision model; when unset the client probes and caches one.
    pub gemini_model: Option<String>,
    /// Listing/detail fetch timeout in seconds.
    pub fetch_timeout_secs: u64,
    /// Binary download timeout in seconds.
    pub download_timeout_secs: u64,
    /// Browser element wait in seconds.
    pub element_wait_secs: u64,
    /// WebDriver server endpoint for download/status operations.
    pub webdriver_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("tenderacquire.db"),
            documents_dir: PathBuf::from("documents"),
            gemini_api_key: None,
            gemini_model: None,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            element_wait_secs: DEFAULT_ELEMENT_WAIT_SECS,
            webdriver_url: "http://localhost:9515".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, then apply environment overrides.
    /// A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                toml::from_str(&text)?
            }
            None => {
                let default_path = Path::new("tenderacquire.toml");
                if default_path.exists() {
                    let text = std::fs::read_to_string(default_path)?;
                    toml::from_str(&text)?
                } else {
                    Self::default()
                }
            }
        };
        settings.apply_env();
        Ok(settings)
    }

    fn apply_env(&mut self) {
        if self.gemini_api_key.is_none() {
            self.gemini_api_key = std::env::var("GEMINI_API_KEY").ok();
        }
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            self.gemini_model = Some(model);
        }
        if let Ok(db) = std::env::var("TENDER_DB") {
            self.database_path = PathBuf::from(db);
        }
        if let Ok(dir) = std::env::var("TENDER_DOCUMENTS_DIR") {
            self.documents_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("WEBDRIVER_URL") {
            self.webdriver_url = url;
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn element_wait(&self) -> Duration {
        Duration::from_secs(self.element_wait_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(s.download_timeout_secs, 120);
        assert!(s.gemini_model.is_none());
    }

    #[test]
    fn parses_partial_toml() {
        let s: Settings = toml::from_str("fetch_timeout_secs = 10\n").unwrap();
        assert_eq!(s.fetch_timeout_secs, 10);
        assert_eq!(s.download_timeout_secs, DEFAULT_DOWNLOAD_TIMEOUT_SECS);
    }
}
