//! Browser-automation driver seam.
//!
//! Document download and status lookup run against portal pages that demand
//! form submission, popups, and captcha challenges, so they drive a real
//! browser. The driver itself is an external collaborator; this trait is the
//! contract the orchestrators program against, and tests script it directly.

pub mod recovery;
pub mod webdriver;

pub use recovery::{is_stale_title, navigate_with_recovery};
pub use webdriver::WebDriverSession;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Element locator strategies exposed by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Id(String),
    Name(String),
    PartialLinkText(String),
    XPath(String),
}

impl Locator {
    pub fn id(s: &str) -> Self {
        Self::Id(s.to_string())
    }

    pub fn name(s: &str) -> Self {
        Self::Name(s.to_string())
    }

    pub fn partial_link(s: &str) -> Self {
        Self::PartialLinkText(s.to_string())
    }

    pub fn xpath(s: &str) -> Self {
        Self::XPath(s.to_string())
    }
}

/// Minimal driver surface used by the orchestrators: navigation, element
/// lookup/interaction, cookies, title, waits, and window management.
#[async_trait]
pub trait BrowserDriver: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;
    async fn page_title(&mut self) -> Result<String>;
    async fn current_url(&mut self) -> Result<String>;

    /// Whether an element is currently present.
    async fn is_present(&mut self, locator: &Locator) -> Result<bool>;
    async fn click(&mut self, locator: &Locator) -> Result<()>;
    async fn type_text(&mut self, locator: &Locator, text: &str) -> Result<()>;
    /// An attribute value of an element, if the element and attribute exist.
    async fn attribute(&mut self, locator: &Locator, name: &str) -> Result<Option<String>>;
    /// Screenshot bytes of one element (the captcha image).
    async fn element_image(&mut self, locator: &Locator) -> Result<Vec<u8>>;
    /// Serialized HTML of the current page.
    async fn page_source(&mut self) -> Result<String>;

    /// Block until the element is present, up to the timeout. Returns
    /// whether it appeared.
    async fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> Result<bool>;

    /// Session cookies as name/value pairs.
    async fn cookies(&mut self) -> Result<Vec<(String, String)>>;

    /// All anchor hrefs on the current page (popup document harvesting).
    async fn anchor_hrefs(&mut self) -> Result<Vec<String>>;

    async fn window_handles(&mut self) -> Result<Vec<String>>;
    async fn switch_to_window(&mut self, handle: &str) -> Result<()>;
    /// Close the current window.
    async fn close_window(&mut self) -> Result<()>;

    /// Tear down the browser session.
    async fn quit(&mut self) -> Result<()>;
}
