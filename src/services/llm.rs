//! Generative provider client (OpenAI-compatible chat completions).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::prompt::GenerationPrompt;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("generative provider timed out")]
    Timeout,
    #[error("generative provider rate limit reached")]
    RateLimited,
    #[error("generative provider error: {0}")]
    Http(String),
    #[error("generative provider returned an empty response")]
    EmptyResponse,
    #[error("generative provider is not configured")]
    Disabled,
}

impl ProviderError {
    /// Worth another attempt with the same prompt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout | ProviderError::RateLimited | ProviderError::EmptyResponse
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http(e.to_string())
        }
    }
}

#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    /// Returns the raw text of the model's answer.
    async fn complete(&self, prompt: &GenerationPrompt) -> Result<String, ProviderError>;

    fn name(&self) -> &str;
}

/// Stands in when no API key is configured; every plan then comes from the template.
pub struct DisabledProvider;

#[async_trait]
impl GenerativeProvider for DisabledProvider {
    async fn complete(&self, _prompt: &GenerationPrompt) -> Result<String, ProviderError> {
        Err(ProviderError::Disabled)
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
}

pub struct OpenAiCompatibleProvider {
    config: ProviderConfig,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl GenerativeProvider for OpenAiCompatibleProvider {
    async fn complete(&self, prompt: &GenerationPrompt) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: &prompt.system },
                ChatMessage { role: "user", content: &prompt.user },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(ProviderError::RateLimited),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                return Err(ProviderError::Timeout)
            }
            status if !status.is_success() => {
                let text = response.text().await.unwrap_or_default();
                return Err(ProviderError::Http(format!("HTTP {status}: {text}")));
            }
            _ => {}
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Http(format!("invalid completion body: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse)
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}
