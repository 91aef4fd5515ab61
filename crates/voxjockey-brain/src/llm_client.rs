use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use voxjockey_foundation::error::BrainError;

/// Default LLM call deadline (§5 Timeouts, §4.D).
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_ctx: u32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    num_ctx: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    format: &'a str,
    options: ChatOptions,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

/// A stateless HTTP client for the local inference endpoint (§6). Every call
/// is independent; the `reqwest::Client` itself is reused for connection
/// pooling but carries no per-call state.
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl LlmClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_timeout(base_url, model, DEFAULT_LLM_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is always valid");
        Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    /// Long-form generation for Slow Brain's text/visual summaries.
    pub async fn generate(&self, system: &str, prompt: &str) -> Result<String, BrainError> {
        let req = GenerateRequest {
            model: &self.model,
            system,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: 0.7,
                num_ctx: 8192,
            },
        };

        let resp = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&req)
            .send()
            .await
            .map_err(|e| BrainError::LlmUnreachable(e.to_string()))?;

        let body: GenerateResponse = resp
            .error_for_status()
            .map_err(|e| BrainError::LlmUnreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| BrainError::MalformedResponse(e.to_string()))?;

        Ok(body.response)
    }

    /// JSON-mode chat completion for Fast Brain's `{prompt, style, mood}`
    /// responses. Returns the parsed `message.content` field as a `Value`;
    /// callers validate shape and fill defaults.
    pub async fn chat_json(&self, messages: &[ChatMessage]) -> Result<Value, BrainError> {
        let req = ChatRequest {
            model: &self.model,
            messages,
            format: "json",
            options: ChatOptions { num_ctx: 4096 },
        };

        let resp = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&req)
            .send()
            .await
            .map_err(|e| BrainError::LlmUnreachable(e.to_string()))?;

        let body: ChatResponse = resp
            .error_for_status()
            .map_err(|e| BrainError::LlmUnreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| BrainError::MalformedResponse(e.to_string()))?;

        parse_json_response(&body.content)
    }
}

/// Parse the raw `message.content` string as JSON, stripping a single
/// leading/trailing markdown code fence if present (§6: "defensive
/// fallbacks for markdown fences").
pub fn parse_json_response(raw: &str) -> Result<Value, BrainError> {
    let trimmed = strip_markdown_fence(raw.trim());
    serde_json::from_str(trimmed).map_err(|e| BrainError::MalformedResponse(format!("{e}: {raw}")))
}

fn strip_markdown_fence(s: &str) -> &str {
    let s = s.strip_prefix("```json").or_else(|| s.strip_prefix("```")).unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}
