//! W3C WebDriver backend for the driver seam.
//!
//! Talks the WebDriver wire protocol directly over reqwest against a running
//! chromedriver/geckodriver endpoint. Only the surface the orchestrators use
//! is implemented; "no such element" is mapped to absence rather than error
//! so presence probes stay cheap.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use tracing::debug;

use super::{BrowserDriver, Locator};
use crate::error::{Result, ScrapeError};

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// One WebDriver session against a remote endpoint.
pub struct WebDriverSession {
    client: reqwest::Client,
    base: String,
    session_id: String,
}

impl WebDriverSession {
    /// Start a new browser session. `endpoint` is the driver server root,
    /// e.g. `http://localhost:9515`.
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let body = json!({
            "capabilities": {
                "alwaysMatch": {
                    "goog:chromeOptions": {
                        "args": ["--disable-gpu", "--window-size=1280,1024"]
                    }
                }
            }
        });
        let resp: Value = client
            .post(format!("{}/session", endpoint.trim_end_matches('/')))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        let session_id = resp["value"]["sessionId"]
            .as_str()
            .ok_or_else(|| ScrapeError::Browser(format!("no session id in {}", resp)))?
            .to_string();
        debug!("webdriver session {} started", session_id);
        Ok(Self {
            client,
            base: endpoint.trim_end_matches('/').to_string(),
            session_id,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/session/{}{}", self.base, self.session_id, path)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let resp: Value = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        check_wire_error(&resp)?;
        Ok(resp)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let resp: Value = self.client.get(self.url(path)).send().await?.json().await?;
        check_wire_error(&resp)?;
        Ok(resp)
    }

    /// Locate one element, mapping "no such element" to None.
    async fn find(&self, locator: &Locator) -> Result<Option<String>> {
        let (using, value) = wire_strategy(locator);
        let resp: Value = self
            .client
            .post(self.url("/element"))
            .json(&json!({ "using": using, "value": value }))
            .send()
            .await?
            .json()
            .await?;
        if wire_error_name(&resp) == Some("no such element") {
            return Ok(None);
        }
        check_wire_error(&resp)?;
        Ok(resp["value"][ELEMENT_KEY].as_str().map(str::to_string))
    }

    async fn require(&self, locator: &Locator) -> Result<String> {
        self.find(locator).await?.ok_or_else(|| {
            ScrapeError::Browser(format!("element not found: {:?}", locator))
        })
    }
}

/// Map a locator onto a W3C location strategy.
fn wire_strategy(locator: &Locator) -> (&'static str, String) {
    match locator {
        Locator::Id(id) => ("css selector", format!("[id=\"{}\"]", id)),
        Locator::Name(name) => ("css selector", format!("[name=\"{}\"]", name)),
        Locator::PartialLinkText(text) => ("partial link text", text.clone()),
        Locator::XPath(xpath) => ("xpath", xpath.clone()),
    }
}

fn wire_error_name(resp: &Value) -> Option<&str> {
    resp["value"]["error"].as_str()
}

fn check_wire_error(resp: &Value) -> Result<()> {
    if let Some(error) = wire_error_name(resp) {
        let message = resp["value"]["message"].as_str().unwrap_or("");
        return Err(ScrapeError::Browser(format!("{}: {}", error, message)));
    }
    Ok(())
}

#[async_trait]
impl BrowserDriver for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.post("/url", json!({ "url": url })).await?;
        Ok(())
    }

    async fn page_title(&mut self) -> Result<String> {
        let resp = self.get("/title").await?;
        Ok(resp["value"].as_str().unwrap_or("").to_string())
    }

    async fn current_url(&mut self) -> Result<String> {
        let resp = self.get("/url").await?;
        Ok(resp["value"].as_str().unwrap_or("").to_string())
    }

    async fn is_present(&mut self, locator: &Locator) -> Result<bool> {
        Ok(self.find(locator).await?.is_some())
    }

    async fn click(&mut self, locator: &Locator) -> Result<()> {
        let element = self.require(locator).await?;
        self.post(&format!("/element/{}/click", element), json!({}))
            .await?;
        Ok(())
    }

    async fn type_text(&mut self, locator: &Locator, text: &str) -> Result<()> {
        let element = self.require(locator).await?;
        self.post(&format!("/element/{}/clear", element), json!({}))
            .await?;
        self.post(
            &format!("/element/{}/value", element),
            json!({ "text": text }),
        )
        .await?;
        Ok(())
    }

    async fn attribute(&mut self, locator: &Locator, name: &str) -> Result<Option<String>> {
        let element = match self.find(locator).await? {
            Some(e) => e,
            None => return Ok(None),
        };
        let resp = self
            .get(&format!("/element/{}/attribute/{}", element, name))
            .await?;
        Ok(resp["value"].as_str().map(str::to_string))
    }

    async fn element_image(&mut self, locator: &Locator) -> Result<Vec<u8>> {
        let element = self.require(locator).await?;
        let resp = self
            .get(&format!("/element/{}/screenshot", element))
            .await?;
        let encoded = resp["value"]
            .as_str()
            .ok_or_else(|| ScrapeError::Browser("screenshot payload missing".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ScrapeError::Browser(format!("screenshot decode: {}", e)))
    }

    async fn page_source(&mut self) -> Result<String> {
        let resp = self.get("/source").await?;
        Ok(resp["value"].as_str().unwrap_or("").to_string())
    }

    async fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.find(locator).await?.is_some() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn cookies(&mut self) -> Result<Vec<(String, String)>> {
        let resp = self.get("/cookie").await?;
        let mut cookies = Vec::new();
        if let Some(list) = resp["value"].as_array() {
            for cookie in list {
                if let (Some(name), Some(value)) =
                    (cookie["name"].as_str(), cookie["value"].as_str())
                {
                    cookies.push((name.to_string(), value.to_string()));
                }
            }
        }
        Ok(cookies)
    }

    async fn anchor_hrefs(&mut self) -> Result<Vec<String>> {
        let resp = self
            .post(
                "/elements",
                json!({ "using": "css selector", "value": "a[href]" }),
            )
            .await?;
        let mut hrefs = Vec::new();
        if let Some(elements) = resp["value"].as_array() {
            for element in elements {
                if let Some(id) = element[ELEMENT_KEY].as_str() {
                    let attr = self
                        .get(&format!("/element/{}/attribute/href", id))
                        .await?;
                    if let Some(href) = attr["value"].as_str() {
                        hrefs.push(href.to_string());
                    }
                }
            }
        }
        Ok(hrefs)
    }

    async fn window_handles(&mut self) -> Result<Vec<String>> {
        let resp = self.get("/window/handles").await?;
        Ok(resp["value"]
            .as_array()
            .map(|handles| {
                handles
                    .iter()
                    .filter_map(|h| h.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn switch_to_window(&mut self, handle: &str) -> Result<()> {
        self.post("/window", json!({ "handle": handle })).await?;
        Ok(())
    }

    async fn close_window(&mut self) -> Result<()> {
        let resp: Value = self
            .client
            .delete(self.url("/window"))
            .send()
            .await?
            .json()
            .await?;
        check_wire_error(&resp)?;
        Ok(())
    }

    async fn quit(&mut self) -> Result<()> {
        self.client
            .delete(format!("{}/session/{}", self.base, self.session_id))
            .send()
            .await?;
        debug!("webdriver session {} closed", self.session_id);
        Ok(())
    }
}
