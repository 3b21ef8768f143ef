//! HTTP backend for OpenAI-compatible chat-completion APIs.
//!
//! Covers the providers the pipeline actually talks to (OpenAI directly,
//! Gemini through its OpenAI-compatible endpoint, and anything self-hosted
//! that speaks the same dialect). The provider name is carried through to
//! span attributes; the wire format is identical.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, header};

use crate::backend::LlmBackend;
use crate::error::{LlmError, Result};
use crate::types::{CompletionRequest, CompletionResponse, Usage};

/// Default timeout for completion requests.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Configuration for an OpenAI-compatible HTTP backend.
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Provider identifier recorded on spans.
    pub provider: String,

    /// API key for authentication.
    pub api_key: String,

    /// Base URL up to but excluding `/chat/completions`.
    pub base_url: String,

    /// Request timeout.
    pub timeout: Duration,
}

impl HttpBackendConfig {
    /// Create a config for the given provider.
    pub fn new(
        provider: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read the API key from `<PROVIDER>_API_KEY`.
    pub fn from_env(provider: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let provider = provider.into();
        let var = format!("{}_API_KEY", provider.to_uppercase());
        let api_key = std::env::var(&var)
            .map_err(|_| LlmError::Config(format!("{var} environment variable not set")))?;
        Ok(Self::new(provider, api_key, base_url))
    }
}

/// OpenAI-compatible chat-completions backend.
pub struct HttpBackend {
    client: Client,
    config: HttpBackendConfig,
}

impl HttpBackend {
    /// Create a backend with the given configuration.
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn to_chat_request(&self, request: &CompletionRequest) -> ChatRequest {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        ChatRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }

    async fn handle_response(response: Response) -> Result<CompletionResponse> {
        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        let body = response.text().await?;
        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Serialization(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

        Ok(CompletionResponse::new(
            parsed.id,
            parsed.model,
            choice.message.content,
            Usage::new(parsed.usage.prompt_tokens, parsed.usage.completion_tokens),
        ))
    }

    async fn handle_error_response(response: Response) -> LlmError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 | 403 => LlmError::Config(format!("authentication failed: {body}")),
            429 => LlmError::Transient(format!("rate limit exceeded: {body}")),
            500..=599 => LlmError::Transient(format!("server error {status}: {body}")),
            _ => LlmError::Rejected(format!("HTTP {status}: {body}")),
        }
    }
}

#[async_trait]
impl LlmBackend for HttpBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let chat_request = self.to_chat_request(request);

        tracing::debug!(
            provider = %self.config.provider,
            model = %chat_request.model,
            temperature = chat_request.temperature,
            "Sending completion request"
        );

        let response = self
            .client
            .post(self.completions_url())
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key),
            )
            .json(&chat_request)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    fn provider(&self) -> &str {
        &self.config.provider
    }
}

#[derive(Debug, serde::Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, serde::Deserialize)]
struct ChatResponse {
    id: String,
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: ChatUsage,
}

#[derive(Debug, serde::Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}
