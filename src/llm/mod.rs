//! Gemini vision client for captcha reading.
//!
//! Uses the generateContent REST API with an inline image payload.
//! Requires GEMINI_API_KEY (or the `gemini_api_key` setting).
//!
//! Model selection happens once per process: list generation-capable models,
//! prefer names containing "flash" then "pro", append a fixed fallback list,
//! probe each candidate with a trivial low-temperature call, and cache the
//! first that answers.

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Tried after any listed candidates, in order.
const FALLBACK_MODELS: &[&str] = &["gemini-1.5-flash", "gemini-1.5-pro", "gemini-pro-vision"];

const CAPTCHA_PROMPT: &str =
    "This image contains a captcha of exactly 6 alphanumeric characters. \
     Respond with exactly those 6 characters and nothing else.";

/// Errors from vision-model calls.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("no usable vision model found")]
    NoModel,
}

/// Vision-capable text-generation client.
pub struct VisionClient {
    client: reqwest::Client,
    api_key: String,
    /// Pinned model from configuration; skips probing when set.
    pinned_model: Option<String>,
    /// Probed model, cached for the process lifetime.
    resolved_model: OnceCell<String>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Option<Vec<ModelInfo>>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
    #[serde(rename = "supportedGenerationMethods", default)]
    supported_generation_methods: Vec<String>,
}

impl VisionClient {
    pub fn new(api_key: impl Into<String>, pinned_model: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            api_key: api_key.into(),
            pinned_model,
            resolved_model: OnceCell::new(),
        }
    }

    /// List generation-capable model names.
    pub async fn list_models(&self) -> Result<Vec<String>, VisionError> {
        let url = format!("{}/models?key={}", API_BASE, self.api_key);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| VisionError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(VisionError::Api(format!("HTTP {}", resp.status())));
        }

        let models: ModelsResponse = resp
            .json()
            .await
            .map_err(|e| VisionError::Parse(e.to_string()))?;

        Ok(models
            .models
            .unwrap_or_default()
            .into_iter()
            .filter(|m| {
                m.supported_generation_methods
                    .iter()
                    .any(|method| method == "generateContent")
            })
            .map(|m| m.name.trim_start_matches("models/").to_string())
            .collect())
    }

    /// Resolve the working model, probing candidates on first use.
    pub async fn model(&self) -> Result<&str, VisionError> {
        if let Some(pinned) = &self.pinned_model {
            return Ok(pinned.as_str());
        }
        self.resolved_model
            .get_or_try_init(|| async {
                let listed = self.list_models().await.unwrap_or_default();
                for candidate in rank_candidates(&listed) {
                    debug!("probing model {}", candidate);
                    if self.probe(&candidate).await {
                        info!("using vision model {}", candidate);
                        return Ok(candidate);
                    }
                }
                Err(VisionError::NoModel)
            })
            .await
            .map(|s| s.as_str())
    }

    /// Trivial low-temperature generation to confirm a model answers.
    async fn probe(&self, model: &str) -> bool {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part::Text {
                    text: "Reply with OK".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                max_output_tokens: 8,
            },
        };
        self.generate(model, &request).await.is_ok()
    }

    /// Read a captcha image; returns the model's raw text response.
    pub async fn read_captcha(&self, image: &[u8]) -> Result<String, VisionError> {
        let model = self.model().await?.to_string();
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: CAPTCHA_PROMPT.to_string(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/png".to_string(),
                            data: base64::engine::general_purpose::STANDARD.encode(image),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                max_output_tokens: 32,
            },
        };
        self.generate(&model, &request).await
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateRequest,
    ) -> Result<String, VisionError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            API_BASE, model, self.api_key
        );
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| VisionError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(VisionError::Api(format!("HTTP {}", resp.status())));
        }

        let body: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| VisionError::Parse(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(VisionError::Api(error.message));
        }

        body.candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content.parts.into_iter().next())
            .and_then(|p| p.text)
            .ok_or_else(|| VisionError::Parse("no candidates in response".to_string()))
    }
}

/// Order candidate models: "flash" names first, then "pro", then the fixed
/// fallbacks (deduplicated).
fn rank_candidates(listed: &[String]) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::new();
    for name in listed.iter().filter(|n| n.contains("flash")) {
        ordered.push(name.clone());
    }
    for name in listed.iter().filter(|n| n.contains("pro") && !n.contains("flash")) {
        ordered.push(name.clone());
    }
    for name in FALLBACK_MODELS {
        if !ordered.iter().any(|n| n == name) {
            ordered.push(name.to_string());
        }
    }
    ordered
}
