// Chat-completion client for OpenAI-compatible APIs.
//
// Sends one request to `{api_base}/chat/completions` and returns the text of
// the first choice. There is no retry or backoff: a non-2xx status is
// reported as `LlmError::Status` and the caller decides what to do.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use hexa_core::config::{Config, TaskSettings};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Error bodies longer than this are truncated before being surfaced.
const MAX_ERROR_BODY: usize = 500;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("OpenAI API key not configured")]
    NotConfigured,

    #[error("OpenAI API error: {status}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("completion contained no message content")]
    EmptyCompletion,

    #[error("completion was not the expected JSON: {0}")]
    InvalidJson(String),
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// One system + user prompt pair and the model parameters to send it with.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub system: String,
    pub user: String,
    /// Ask the API for a JSON object response (`response_format`).
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn new(settings: &TaskSettings, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            system: system.into(),
            user: user.into(),
            json_mode: false,
        }
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    /// The JSON body for `/chat/completions`.
    pub fn to_body(&self) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": self.system },
                { "role": "user", "content": self.user }
            ]
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = Value::from(max_tokens);
        }
        if self.json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        body
    }
}

// ---------------------------------------------------------------------------
// ChatCompletion trait + OpenAI implementation
// ---------------------------------------------------------------------------

/// Anything that can turn a `ChatRequest` into completion text.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;
}

/// Client for the OpenAI `/chat/completions` endpoint.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, api_base: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            api_base,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatCompletion for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        debug!(
            model = %request.model,
            json_mode = request.json_mode,
            system_len = request.system.len(),
            user_len = request.user.len(),
            "sending chat completion"
        );

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request.to_body())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "chat completion failed");
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        let data = response.text().await?;
        let text = parse_completion_text(&data)?;
        debug!(model = %request.model, response_len = text.len(), "chat completion received");
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// LlmClient wrapper
// ---------------------------------------------------------------------------

/// High-level wrapper that is either an active completion backend or disabled.
pub enum LlmClient {
    /// A completion backend is configured and ready.
    Active(Box<dyn ChatCompletion>),
    /// LLM functionality is disabled (no API key configured).
    Disabled,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmClient::Active(_) => f.write_str("LlmClient::Active"),
            LlmClient::Disabled => f.write_str("LlmClient::Disabled"),
        }
    }
}

impl LlmClient {
    /// Build an `LlmClient` from the application config.
    ///
    /// Returns `Active` if an API key is present in credentials, otherwise
    /// returns `Disabled`.
    pub fn from_config(config: &Config) -> Self {
        match &config.credentials.openai_api_key {
            Some(key) if !key.is_empty() => LlmClient::Active(Box::new(OpenAiClient::new(
                key.clone(),
                config.llm.api_base.clone(),
            ))),
            _ => LlmClient::Disabled,
        }
    }

    /// Whether a completion backend is configured.
    pub fn is_active(&self) -> bool {
        matches!(self, LlmClient::Active(_))
    }

    /// Send a request, delegating to the inner backend or failing with
    /// `NotConfigured` if disabled.
    pub async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        match self {
            LlmClient::Active(backend) => backend.complete(request).await,
            LlmClient::Disabled => Err(LlmError::NotConfigured),
        }
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// Extract `choices[0].message.content` from a chat completion response.
///
/// Expected shape: `{ "choices": [ { "message": { "content": "..." } } ] }`.
/// A body that is not JSON is `InvalidJson`; a missing or empty content field
/// is `EmptyCompletion`.
pub(crate) fn parse_completion_text(data: &str) -> Result<String, LlmError> {
    let v: Value =
        serde_json::from_str(data).map_err(|e| LlmError::InvalidJson(e.to_string()))?;
    v.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(LlmError::EmptyCompletion)
}

/// Remove a leading Markdown code fence (with optional language tag) and a
/// trailing fence, then trim.
pub fn strip_code_fences(text: &str) -> String {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```") {
        let tag_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        let body = &rest[tag_len..];
        s = body
            .strip_prefix("\r\n")
            .or_else(|| body.strip_prefix('\n'))
            .unwrap_or(body);
    }
    if let Some(rest) = s.trim_end().strip_suffix("```") {
        s = rest;
    }
    s.trim().to_string()
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
