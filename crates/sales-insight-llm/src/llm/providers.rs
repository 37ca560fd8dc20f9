//! LLM API Providers
//!
//! HTTP clients for OpenAI, Anthropic and local OpenAI-compatible servers.
//! Every client carries a request timeout so a hung provider fails the
//! request instead of hanging it.

use super::*;
use reqwest::Client;
use std::time::Duration;

// ============================================================================
// Configuration
// ============================================================================

/// LLM configuration loaded from environment or command-line flags
#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
    Local,
}

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-opus-20240229";
pub const DEFAULT_LOCAL_MODEL: &str = "default";

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl LLMConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Try OpenAI first
        if let Some(key) = env_nonempty("OPENAI_API_KEY") {
            let mut config = Self::openai(
                &key,
                &env_nonempty("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            );
            config.base_url = env_nonempty("OPENAI_BASE_URL");
            return Ok(config);
        }

        if let Some(key) = env_nonempty("ANTHROPIC_API_KEY") {
            return Ok(Self::anthropic(
                &key,
                &env_nonempty("ANTHROPIC_MODEL").unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            ));
        }

        if let Some(url) = env_nonempty("LOCAL_LLM_URL") {
            return Ok(Self::local(
                &url,
                &env_nonempty("LOCAL_LLM_MODEL").unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string()),
            ));
        }

        Err(ConfigError::NoProviderConfigured)
    }

    /// Create OpenAI config
    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::OpenAI,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    /// Create Anthropic config
    pub fn anthropic(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::Anthropic,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    /// Create local config
    pub fn local(url: &str, model: &str) -> Self {
        Self {
            provider: Provider::Local,
            api_key: String::new(),
            model: model.to_string(),
            base_url: Some(url.trim_end_matches('/').to_string()),
            timeout_secs: 120,
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.max(1);
        self
    }

    fn http_client(&self) -> Result<Client, LLMError> {
        Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| LLMError::Config(format!("failed to create HTTP client: {e}")))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No LLM provider configured. Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or LOCAL_LLM_URL")]
    NoProviderConfigured,
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Shared request plumbing
// ============================================================================

fn map_send_error(e: reqwest::Error) -> LLMError {
    if e.is_timeout() {
        LLMError::Network(format!("request timed out: {e}"))
    } else {
        LLMError::Network(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LLMError> {
    if response.status() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(60);
        return Err(LLMError::RateLimited {
            retry_after_ms: retry_after * 1000,
        });
    }
    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        return Err(LLMError::Api(format!("{status}: {error_text}")));
    }
    Ok(response)
}

/// Request body for OpenAI-style `/chat/completions` endpoints.
fn chat_completions_body(model: &str, request: &CompletionRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = request
        .messages
        .iter()
        .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
        .collect();

    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if let Some(temp) = request.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    if !request.stop_sequences.is_empty() {
        body["stop"] = serde_json::json!(request.stop_sequences);
    }
    body
}

fn parse_chat_completion(data: &serde_json::Value, model: &str) -> Result<CompletionResponse, LLMError> {
    let content = data["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| LLMError::InvalidResponse("missing choices[0].message.content".to_string()))?
        .to_string();

    let finish_reason = match data["choices"][0]["finish_reason"].as_str() {
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    };

    Ok(CompletionResponse {
        content,
        finish_reason,
        usage: Usage {
            prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize,
        },
        model: data["model"].as_str().unwrap_or(model).to_string(),
    })
}

// ============================================================================
// OpenAI Provider
// ============================================================================

#[cfg(feature = "openai")]
pub struct OpenAIClient {
    client: Client,
    config: LLMConfig,
}

#[cfg(feature = "openai")]
impl OpenAIClient {
    pub fn new(config: LLMConfig) -> Result<Self, LLMError> {
        if config.api_key.is_empty() {
            return Err(LLMError::Config("OpenAI API key is empty".to_string()));
        }
        Ok(Self {
            client: config.http_client()?,
            config,
        })
    }
}

#[cfg(feature = "openai")]
#[async_trait]
impl LLMProvider for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL)
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&chat_completions_body(&self.config.model, &request))
            .send()
            .await
            .map_err(map_send_error)?;

        let data: serde_json::Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;
        parse_chat_completion(&data, &self.config.model)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            max_tokens: 8_192,
        }
    }
}

// ============================================================================
// Anthropic Provider
// ============================================================================

#[cfg(feature = "anthropic")]
pub struct AnthropicClient {
    client: Client,
    config: LLMConfig,
}

#[cfg(feature = "anthropic")]
impl AnthropicClient {
    pub fn new(config: LLMConfig) -> Result<Self, LLMError> {
        if config.api_key.is_empty() {
            return Err(LLMError::Config("Anthropic API key is empty".to_string()));
        }
        Ok(Self {
            client: config.http_client()?,
            config,
        })
    }

    /// The messages API takes the system prompt as a top-level field.
    fn body(&self, request: &CompletionRequest) -> serde_json::Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(4096),
        });
        if !system.is_empty() {
            body["system"] = serde_json::json!(system.join("\n\n"));
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if !request.stop_sequences.is_empty() {
            body["stop_sequences"] = serde_json::json!(request.stop_sequences);
        }
        body
    }
}

#[cfg(feature = "anthropic")]
#[async_trait]
impl LLMProvider for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let url = format!(
            "{}/v1/messages",
            self.config.base_url.as_deref().unwrap_or(ANTHROPIC_BASE_URL)
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&self.body(&request))
            .send()
            .await
            .map_err(map_send_error)?;

        let data: serde_json::Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        let content = data["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|text| !text.is_empty())
            .ok_or_else(|| LLMError::InvalidResponse("missing text content".to_string()))?;

        let finish_reason = match data["stop_reason"].as_str() {
            Some("max_tokens") => FinishReason::Length,
            _ => FinishReason::Stop,
        };

        Ok(CompletionResponse {
            content,
            finish_reason,
            usage: Usage {
                prompt_tokens: data["usage"]["input_tokens"].as_u64().unwrap_or(0) as usize,
                completion_tokens: data["usage"]["output_tokens"].as_u64().unwrap_or(0) as usize,
            },
            model: self.config.model.clone(),
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            max_tokens: 4_096,
        }
    }
}

// ============================================================================
// Local Provider (Ollama, vLLM, etc.)
// ============================================================================

#[cfg(feature = "local")]
pub struct LocalClient {
    client: Client,
    config: LLMConfig,
    base_url: String,
}

#[cfg(feature = "local")]
impl LocalClient {
    pub fn new(config: LLMConfig) -> Result<Self, LLMError> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| LLMError::Config("no base URL configured for local model".to_string()))?;
        Ok(Self {
            client: config.http_client()?,
            config,
            base_url,
        })
    }
}

#[cfg(feature = "local")]
#[async_trait]
impl LLMProvider for LocalClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        // Assume OpenAI-compatible API (works with vLLM, Ollama in OpenAI mode)
        let url = format!("{}/v1/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&chat_completions_body(&self.config.model, &request))
            .send()
            .await
            .map_err(map_send_error)?;

        let data: serde_json::Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;
        parse_chat_completion(&data, &self.config.model)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            max_tokens: 4_096,
        }
    }
}

// ============================================================================
// Unified Client
// ============================================================================

/// Unified LLM client that dispatches to the appropriate provider
pub enum UnifiedClient {
    #[cfg(feature = "openai")]
    OpenAI(OpenAIClient),
    #[cfg(feature = "anthropic")]
    Anthropic(AnthropicClient),
    #[cfg(feature = "local")]
    Local(LocalClient),
}

impl UnifiedClient {
    /// Create from configuration
    pub fn from_config(config: LLMConfig) -> Result<Self, ConfigError> {
        let invalid = |e: LLMError| ConfigError::Invalid(e.to_string());
        match config.provider {
            #[cfg(feature = "openai")]
            Provider::OpenAI => OpenAIClient::new(config).map(Self::OpenAI).map_err(invalid),
            #[cfg(feature = "anthropic")]
            Provider::Anthropic => AnthropicClient::new(config).map(Self::Anthropic).map_err(invalid),
            #[cfg(feature = "local")]
            Provider::Local => LocalClient::new(config).map(Self::Local).map_err(invalid),
            #[allow(unreachable_patterns)]
            other => Err(ConfigError::Invalid(format!(
                "{other:?} support was not compiled in"
            ))),
        }
    }

    /// Create from environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_config(LLMConfig::from_env()?)
    }
}

#[async_trait]
impl LLMProvider for UnifiedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        match self {
            #[cfg(feature = "openai")]
            Self::OpenAI(c) => c.complete(request).await,
            #[cfg(feature = "anthropic")]
            Self::Anthropic(c) => c.complete(request).await,
            #[cfg(feature = "local")]
            Self::Local(c) => c.complete(request).await,
        }
    }

    fn model_info(&self) -> ModelInfo {
        match self {
            #[cfg(feature = "openai")]
            Self::OpenAI(c) => c.model_info(),
            #[cfg(feature = "anthropic")]
            Self::Anthropic(c) => c.model_info(),
            #[cfg(feature = "local")]
            Self::Local(c) => c.model_info(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
