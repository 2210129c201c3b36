//! Minimal Google Gemini API client.
//!
//! This crate provides a focused client for the `generateContent` endpoint with:
//! - Structured (JSON schema constrained) output
//! - System instructions and safety settings
//! - Error classification for rate limiting

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Environment variables checked (in order) by [`Gemini::from_env`].
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// The first non-blank API key found under [`API_KEY_VARS`].
pub fn api_key_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    API_KEY_VARS
        .into_iter()
        .find_map(|var| lookup(var).filter(|key| !key.trim().is_empty()))
}

/// Errors that can occur when using the Gemini client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means the service is throttling us.
    ///
    /// Gemini reports quota exhaustion either as HTTP 429 or with a
    /// `RESOURCE_EXHAUSTED` status in the error body.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Error::Api { status, message } => *status == 429 || mentions_rate_limit(message),
            Error::Network(message) | Error::Parse(message) => mentions_rate_limit(message),
            Error::NoApiKey | Error::Config(_) => false,
        }
    }
}

/// Check free text for the markers Gemini uses when throttling.
pub fn mentions_rate_limit(message: &str) -> bool {
    message.contains("429") || message.contains("RESOURCE_EXHAUSTED")
}

/// Gemini API client.
#[derive(Clone)]
pub struct Gemini {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl Gemini {
    /// Create a new Gemini client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
        }
    }

    /// Create a Gemini client from `GEMINI_API_KEY` (or `API_KEY`).
    pub fn from_env() -> Result<Self, Error> {
        api_key_from(|var| std::env::var(var).ok())
            .map(Self::new)
            .ok_or(Error::NoApiKey)
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a different API root (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// The model used when a request does not name one.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a `generateContent` request and return the full response.
    pub async fn generate(&self, request: Request) -> Result<Response, Error> {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let api_request = self.build_api_request(request);
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{}/models/{model}:generateContent", self.base_url))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        Ok(parse_response(api_response))
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }

    fn build_api_request(&self, request: Request) -> ApiRequest {
        let generation_config = if request.temperature.is_some()
            || request.response_mime_type.is_some()
            || request.response_schema.is_some()
        {
            Some(ApiGenerationConfig {
                temperature: request.temperature,
                response_mime_type: request.response_mime_type,
                response_schema: request.response_schema,
            })
        } else {
            None
        };

        ApiRequest {
            contents: vec![ApiContent {
                role: Some("user".to_string()),
                parts: vec![ApiPart {
                    text: Some(request.contents),
                }],
            }],
            system_instruction: request.system_instruction.map(|text| ApiContent {
                role: None,
                parts: vec![ApiPart { text: Some(text) }],
            }),
            generation_config,
            safety_settings: request
                .safety_settings
                .iter()
                .map(|s| ApiSafetySetting {
                    category: s.category.as_str().to_string(),
                    threshold: s.threshold.as_str().to_string(),
                })
                .collect(),
        }
    }
}

fn parse_response(api_response: ApiResponse) -> Response {
    let candidates = api_response
        .candidates
        .into_iter()
        .map(|c| Candidate {
            text_parts: c
                .content
                .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
                .unwrap_or_default(),
            finish_reason: c.finish_reason,
        })
        .collect();

    Response {
        candidates,
        model_version: api_response.model_version,
        usage: api_response.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
        }),
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A `generateContent` request.
#[derive(Debug, Clone)]
pub struct Request {
    pub model: Option<String>,
    pub contents: String,
    pub system_instruction: Option<String>,
    pub response_mime_type: Option<String>,
    pub response_schema: Option<serde_json::Value>,
    pub temperature: Option<f32>,
    pub safety_settings: Vec<SafetySetting>,
}

impl Request {
    /// Create a new request with a single user text block.
    pub fn new(contents: impl Into<String>) -> Self {
        Self {
            model: None,
            contents: contents.into(),
            system_instruction: None,
            response_mime_type: None,
            response_schema: None,
            temperature: None,
            safety_settings: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Constrain output to JSON matching `schema`.
    pub fn with_json_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_mime_type = Some("application/json".to_string());
        self.response_schema = Some(schema);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_safety_settings(mut self, settings: Vec<SafetySetting>) -> Self {
        self.safety_settings = settings;
        self
    }
}

/// Harm categories that can be configured per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarmCategory {
    HateSpeech,
    SexuallyExplicit,
    DangerousContent,
    Harassment,
}

impl HarmCategory {
    pub const ALL: [HarmCategory; 4] = [
        HarmCategory::HateSpeech,
        HarmCategory::SexuallyExplicit,
        HarmCategory::DangerousContent,
        HarmCategory::Harassment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HarmCategory::HateSpeech => "HARM_CATEGORY_HATE_SPEECH",
            HarmCategory::SexuallyExplicit => "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            HarmCategory::DangerousContent => "HARM_CATEGORY_DANGEROUS_CONTENT",
            HarmCategory::Harassment => "HARM_CATEGORY_HARASSMENT",
        }
    }
}

/// Blocking threshold for a harm category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockThreshold {
    BlockNone,
}

impl BlockThreshold {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockThreshold::BlockNone => "BLOCK_NONE",
        }
    }
}

/// A single safety setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: BlockThreshold,
}

impl SafetySetting {
    /// Disable filtering on every configurable category.
    pub fn block_none_all() -> Vec<SafetySetting> {
        HarmCategory::ALL
            .iter()
            .map(|&category| SafetySetting {
                category,
                threshold: BlockThreshold::BlockNone,
            })
            .collect()
    }
}

/// A `generateContent` response.
#[derive(Debug, Clone)]
pub struct Response {
    pub candidates: Vec<Candidate>,
    pub model_version: Option<String>,
    pub usage: Option<Usage>,
}

impl Response {
    /// Text of the first candidate, or `None` if it produced nothing.
    pub fn text(&self) -> Option<String> {
        let text = self.candidates.first()?.text_parts.concat();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Why the first candidate stopped (e.g. `STOP`, `SAFETY`, `MAX_TOKENS`).
    pub fn finish_reason(&self) -> Option<&str> {
        self.candidates.first()?.finish_reason.as_deref()
    }
}

/// One generated candidate.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub text_parts: Vec<String>,
    pub finish_reason: Option<String>,
}

/// Token usage information.
#[derive(Debug, Clone)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub output_tokens: usize,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<ApiGenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    safety_settings: Vec<ApiSafetySetting>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ApiSafetySetting {
    category: String,
    threshold: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    model_version: Option<String>,
    #[serde(default)]
    usage_metadata: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsage {
    #[serde(default)]
    prompt_token_count: usize,
    #[serde(default)]
    candidates_token_count: usize,
}
