//! DeepSeek API Client
//!
//! ## API Endpoints
//!
//! | Endpoint | URL | Purpose |
//! |----------|-----|--------|
//! | Base URL | `https://api.deepseek.com/v1` | All DeepSeek APIs |
//! | Chat | `/chat/completions` | OpenAI-compatible chat |
//!
//! ## Authentication
//! - Header: `Authorization: Bearer {API_KEY}`

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::provider::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, ProviderType, TokenUsage};

/// DeepSeek API endpoints
pub mod endpoints {
    /// Base API URL
    pub const BASE_URL: &str = "https://api.deepseek.com/v1";

    /// Chat completions endpoint (OpenAI-compatible)
    pub const CHAT_COMPLETIONS: &str = "/chat/completions";
}

#[derive(Debug, Serialize)]
struct DeepSeekRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct DeepSeekResponse {
    choices: Vec<DeepSeekChoice>,
    model: Option<String>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct DeepSeekChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeepSeekStreamChunk {
    #[serde(default)]
    choices: Vec<DeepSeekStreamChoice>,
    model: Option<String>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct DeepSeekStreamChoice {
    #[serde(default)]
    delta: DeepSeekDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DeepSeekDelta {
    content: Option<String>,
}

/// DeepSeek API Client
pub struct DeepSeekClient {
    client: Client,
    /// Base API URL
    api_url: String,
}

impl DeepSeekClient {
    /// Create a new client against the public endpoint
    pub fn new() -> Self {
        Self::with_endpoint(endpoints::BASE_URL, Duration::from_secs(120))
    }

    /// Create with custom endpoint and request timeout
    pub fn with_endpoint(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_url: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    /// Get the current API URL
    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

impl Default for DeepSeekClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for DeepSeekClient {
    fn provider_type(&self) -> ProviderType {
        ProviderType::DeepSeek
    }

    async fn chat(&self, api_key: &str, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}{}", self.api_url, endpoints::CHAT_COMPLETIONS);

        info!(
            "DeepSeek chat: model={}, stream={}, endpoint={}",
            request.model, request.stream, self.api_url
        );

        let body = DeepSeekRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: request.stream,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to send DeepSeek request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("DeepSeek API error {}: {}", status, body));
        }

        if request.stream {
            let text = response
                .text()
                .await
                .context("Failed to read DeepSeek stream")?;
            debug!("DeepSeek stream body: {} bytes", text.len());
            return parse_event_stream(&text, &request.model);
        }

        let result: DeepSeekResponse = response
            .json()
            .await
            .context("Failed to parse DeepSeek response")?;

        let choice = result
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No response from DeepSeek"))?;

        Ok(ChatResponse {
            message: ChatMessage::assistant(choice.message.content),
            model: result.model.unwrap_or_else(|| request.model.clone()),
            provider: ProviderType::DeepSeek.to_string(),
            finish_reason: choice.finish_reason,
            usage: result.usage,
        })
    }
}

/// Collect a server-sent-events body into one response.
///
/// Each `data:` line carries a JSON chunk whose `choices[0].delta.content`
/// fragments are concatenated; `data: [DONE]` ends the stream.
pub fn parse_event_stream(body: &str, requested_model: &str) -> Result<ChatResponse> {
    let mut content = String::new();
    let mut finish_reason = None;
    let mut model = None;
    let mut usage = None;
    let mut chunks = 0usize;

    for line in body.lines() {
        let Some(data) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            break;
        }
        if data.is_empty() {
            continue;
        }

        let chunk: DeepSeekStreamChunk =
            serde_json::from_str(data).context("Malformed DeepSeek stream chunk")?;
        chunks += 1;

        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(fragment) = choice.delta.content {
                content.push_str(&fragment);
            }
            if choice.finish_reason.is_some() {
                finish_reason = choice.finish_reason;
            }
        }
        if chunk.model.is_some() {
            model = chunk.model;
        }
        if chunk.usage.is_some() {
            usage = chunk.usage;
        }
    }

    if chunks == 0 {
        return Err(anyhow::anyhow!("Empty DeepSeek stream"));
    }

    Ok(ChatResponse {
        message: ChatMessage::assistant(content),
        model: model.unwrap_or_else(|| requested_model.to_string()),
        provider: ProviderType::DeepSeek.to_string(),
        finish_reason,
        usage,
    })
}
