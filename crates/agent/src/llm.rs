//! Text completion providers.
//!
//! Every pipeline component talks to an `Arc<dyn LlmClient>`. Production
//! wiring wraps the HTTP client in [`TimeoutLlm`] so a slow provider turns
//! into a `ProviderError::Timeout` that callers handle with their own
//! fallback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ragdesk_core::config::{LlmConfig, LlmProvider};
use ragdesk_core::errors::ProviderError;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::warn;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: u32, temperature: f32) -> Self {
        Self { prompt: prompt.into(), max_tokens, temperature }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
}

/// Bounds every completion by a fixed deadline.
pub struct TimeoutLlm {
    inner: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl TimeoutLlm {
    pub fn new(inner: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl LlmClient for TimeoutLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        match tokio::time::timeout(self.timeout, self.inner.complete(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    event_name = "agent.llm.timeout",
                    timeout_secs = self.timeout.as_secs(),
                    "llm completion timed out"
                );
                Err(ProviderError::Timeout { after_secs: self.timeout.as_secs() })
            }
        }
    }
}

pub struct HttpLlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| ProviderError::Transport(error.to_string()))?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(config.provider).to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http,
            provider: config.provider,
            model: config.model.clone(),
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    /// Config-driven client wrapped in the configured timeout.
    pub fn with_timeout(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, ProviderError> {
        let client: Arc<dyn LlmClient> = Arc::new(Self::from_config(config)?);
        Ok(Arc::new(TimeoutLlm::new(client, Duration::from_secs(config.timeout_secs.max(1)))))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let url = endpoint(self.provider, &self.base_url);
        let body = request_body(self.provider, &self.model, request);

        let mut builder = self.http.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = match self.provider {
                LlmProvider::OpenAi => builder.bearer_auth(api_key.expose_secret()),
                LlmProvider::Anthropic => builder
                    .header("x-api-key", api_key.expose_secret())
                    .header("anthropic-version", ANTHROPIC_VERSION),
                LlmProvider::Ollama => builder,
            };
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                ProviderError::Timeout { after_secs: 0 }
            } else {
                ProviderError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::Quota(format!("{} rate limited the request", self.model)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| ProviderError::Malformed(error.to_string()))?;
        extract_text(self.provider, &payload)
    }
}

fn default_base_url(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAi => OPENAI_BASE_URL,
        LlmProvider::Anthropic => ANTHROPIC_BASE_URL,
        LlmProvider::Ollama => OLLAMA_BASE_URL,
    }
}

fn endpoint(provider: LlmProvider, base_url: &str) -> String {
    match provider {
        LlmProvider::OpenAi => format!("{base_url}/chat/completions"),
        LlmProvider::Anthropic => format!("{base_url}/messages"),
        LlmProvider::Ollama => format!("{base_url}/api/generate"),
    }
}

fn request_body(provider: LlmProvider, model: &str, request: &CompletionRequest) -> Value {
    match provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => json!({
            "model": model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{ "role": "user", "content": request.prompt }],
        }),
        LlmProvider::Ollama => json!({
            "model": model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        }),
    }
}

fn extract_text(provider: LlmProvider, payload: &Value) -> Result<String, ProviderError> {
    let text = match provider {
        LlmProvider::OpenAi => payload.pointer("/choices/0/message/content"),
        LlmProvider::Anthropic => payload.pointer("/content/0/text"),
        LlmProvider::Ollama => payload.get("response"),
    };

    text.and_then(Value::as_str)
        .map(|text| text.trim().to_string())
        .ok_or_else(|| ProviderError::Malformed("completion text missing from response".to_string()))
}
