//! LLM backend trait, request/response types and the remote HTTP backend.
//!
//! Backends:
//!   OllamaCliBackend        : local model host driven as a subprocess (see `local.rs`)
//!   OpenAiCompatibleBackend : any OpenAI-style `/chat/completions` endpoint
//!                             (OpenAI, OpenRouter, Groq, vLLM, …)

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const MAX_TEMPERATURE: f32 = 2.0;

// ── Error ─────────────────────────────────────────────────────────────────────

/// Failure of a single backend call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("API error [{status}]: {message}")]
    ApiError { status: u16, message: String },
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Local model host exited with {status}: {stderr}")]
    Process { status: String, stderr: String },
    #[error("Failed to run local model host '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Unsupported API provider: {0}")]
    UnsupportedProvider(String),
    #[error("No local backend configured for model {0}")]
    LocalUnavailable(String),
}

// ── Request / Response ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System    => "system",
            Role::User      => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Speaker label used when a conversation is flattened into plain text.
    pub fn label(&self) -> &'static str {
        match self {
            Role::System    => "System",
            Role::User      => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// A single completion request. Built once, then only borrowed.
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    prompt: String,
    model: Option<String>,
    system_prompt: Option<String>,
    temperature: f32,
    max_tokens: Option<u32>,
    history: Vec<Message>,
    metadata: HashMap<String, serde_json::Value>,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            system_prompt: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            history: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Ask for a specific model before the normal local/fallback sequence.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Clamped to `0.0..=2.0`; NaN falls back to the default.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = if temperature.is_nan() {
            DEFAULT_TEMPERATURE
        } else {
            temperature.clamp(0.0, MAX_TEMPERATURE)
        };
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Prior conversation turns, oldest first. System turns are not allowed here.
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn prompt(&self) -> &str { &self.prompt }
    pub fn model(&self) -> Option<&str> { self.model.as_deref() }
    pub fn system_prompt(&self) -> Option<&str> { self.system_prompt.as_deref() }
    pub fn temperature(&self) -> f32 { self.temperature }
    pub fn max_tokens(&self) -> Option<u32> { self.max_tokens }
    pub fn history(&self) -> &[Message] { &self.history }
    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> { &self.metadata }

    /// Chat-completion message list: system, history, then the prompt.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::new(Role::System, system.clone()));
        }
        messages.extend(self.history.iter().cloned());
        messages.push(Message::new(Role::User, self.prompt.clone()));
        messages
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model_used: String,
    pub tokens_used: Option<u64>,
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl LlmResponse {
    pub fn provider(&self) -> Option<&str> {
        self.metadata.get("provider").and_then(|p| p.as_str())
    }
}

// ── Trait ─────────────────────────────────────────────────────────────────────

/// Everything a backend needs for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct BackendCall<'a> {
    pub request: &'a LlmRequest,
    /// Model name as the backend expects it on the wire.
    pub model: &'a str,
    /// Identifier reported back as `model_used`.
    pub model_id: &'a str,
    pub credential: Option<&'a SecretString>,
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, call: BackendCall<'_>) -> Result<LlmResponse, LlmError>;
    fn provider(&self) -> &str;
    fn is_local(&self) -> bool;
}

// ── Helper: parse OpenAI-style response ──────────────────────────────────────

fn parse_openai_response(
    json: &serde_json::Value,
    model_id: &str,
    provider: &str,
) -> Result<LlmResponse, LlmError> {
    let choice = &json["choices"][0];
    let content = choice["message"]["content"]
        .as_str()
        .ok_or_else(|| LlmError::MalformedResponse(
            "missing choices[0].message.content".to_string()
        ))?
        .to_string();

    let usage = json.get("usage").cloned().unwrap_or(serde_json::Value::Null);

    let mut metadata = HashMap::new();
    metadata.insert("provider".to_string(), serde_json::json!(provider));
    metadata.insert("usage".to_string(), usage.clone());
    if let Some(served_by) = json["model"].as_str() {
        metadata.insert("served_model".to_string(), serde_json::json!(served_by));
    }

    Ok(LlmResponse {
        content,
        model_used: model_id.to_string(),
        tokens_used: usage["total_tokens"].as_u64(),
        finish_reason: choice["finish_reason"].as_str().map(str::to_string),
        metadata,
    })
}

async fn check_response_status(resp: reqwest::Response) -> Result<serde_json::Value, LlmError> {
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|body| {
                body["error"]["message"]
                    .as_str()
                    .or_else(|| body["message"].as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| if text.is_empty() { "unknown API error".to_string() } else { text });
        return Err(LlmError::ApiError { status: status.as_u16(), message });
    }
    Ok(serde_json::from_str(&text)?)
}

// ── OpenAI-Compatible (OpenAI, OpenRouter, Groq, vLLM, …) ────────────────────

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

pub struct OpenAiCompatibleBackend {
    provider: String,
    base_url: String,
    extra_headers: Vec<(String, String)>,
    client: reqwest::Client,
}

impl OpenAiCompatibleBackend {
    pub fn new(provider: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            base_url: base_url.into(),
            extra_headers: Vec::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn openai() -> Self {
        Self::new("openai", OPENAI_BASE_URL)
    }

    /// OpenRouter asks callers to identify themselves with these two headers.
    pub fn openrouter() -> Self {
        Self::new("openrouter", OPENROUTER_BASE_URL)
            .with_header("HTTP-Referer", "https://orion-vision-core.local")
            .with_header("X-Title", "Orion Vision Core")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body(call: &BackendCall<'_>) -> serde_json::Value {
        let req = call.request;
        let mut body = serde_json::json!({
            "model":       call.model,
            "messages":    req.messages(),
            "temperature": req.temperature(),
        });
        if let Some(max_tokens) = req.max_tokens() {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleBackend {
    async fn complete(&self, call: BackendCall<'_>) -> Result<LlmResponse, LlmError> {
        let mut builder = self.client
            .post(self.completions_url())
            .json(&Self::request_body(&call));
        if let Some(key) = call.credential {
            builder = builder.bearer_auth(key.expose_secret());
        }
        for (name, value) in &self.extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let resp = builder.send().await?;
        let json = check_response_status(resp).await?;
        parse_openai_response(&json, call.model_id, &self.provider)
    }

    fn provider(&self) -> &str { &self.provider }
    fn is_local(&self) -> bool { false }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
