//! Configuration helpers: provider shortcuts, environment lookups and the
//! backend factory.

use crate::handler::ChatHandler;
use crate::ollama::OllamaBackend;
use crate::openai::OpenAiBackend;
use crate::{Error, Result};
use std::env;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable overriding the server base URL
pub const BASE_URL_ENV: &str = "CHAT_PIPELINE_BASE_URL";
/// Environment variable overriding the model name
pub const MODEL_ENV: &str = "CHAT_PIPELINE_MODEL";
/// Environment variable holding a bearer token for hosted servers
pub const API_KEY_ENV: &str = "CHAT_PIPELINE_API_KEY";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// How a server expects to be spoken to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireProtocol {
    /// Hand-built prompt string, tool calls recovered from the text stream
    Raw,
    /// Message list in, structured tool calls out
    Structured,
}

/// Supported provider shortcuts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    LMStudio,
    Ollama,
    LlamaCpp,
    VLLM,
    OpenAI,
}

impl Provider {
    /// Get the default base URL for this provider
    pub fn default_url(&self) -> &'static str {
        match self {
            Provider::LMStudio => "http://localhost:1234/v1",
            Provider::Ollama => "http://localhost:11434",
            Provider::LlamaCpp => "http://localhost:8080/v1",
            Provider::VLLM => "http://localhost:8000/v1",
            Provider::OpenAI => "https://api.openai.com/v1",
        }
    }

    pub fn wire_protocol(&self) -> WireProtocol {
        match self {
            Provider::Ollama => WireProtocol::Raw,
            _ => WireProtocol::Structured,
        }
    }

    /// Parse a provider from a string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "lmstudio" | "lm-studio" | "lm_studio" => Some(Provider::LMStudio),
            "ollama" => Some(Provider::Ollama),
            "llamacpp" | "llama-cpp" | "llama_cpp" | "llama.cpp" => Some(Provider::LlamaCpp),
            "vllm" => Some(Provider::VLLM),
            "openai" | "open-ai" | "open_ai" => Some(Provider::OpenAI),
            _ => None,
        }
    }
}

/// Get the base URL from environment variable or provider default
///
/// Priority:
/// 1. `CHAT_PIPELINE_BASE_URL` environment variable
/// 2. Provider default URL (if provider is Some)
/// 3. fallback parameter
///
/// # Examples
///
/// ```rust,no_run
/// use chat_pipeline::{get_base_url, Provider};
///
/// let url = get_base_url(Some(Provider::Ollama), None);
/// let url = get_base_url(None, Some("http://localhost:1234/v1"));
/// ```
pub fn get_base_url(provider: Option<Provider>, fallback: Option<&str>) -> String {
    if let Ok(url) = env::var(BASE_URL_ENV) {
        return url;
    }

    if let Some(p) = provider {
        return p.default_url().to_string();
    }

    fallback
        .unwrap_or(Provider::LMStudio.default_url())
        .to_string()
}

/// Get the model name from environment variable or fallback
///
/// With `prefer_env` false the environment is ignored.
pub fn get_model(fallback: Option<&str>, prefer_env: bool) -> Option<String> {
    if prefer_env {
        if let Ok(model) = env::var(MODEL_ENV) {
            return Some(model);
        }
    }

    fallback.map(|s| s.to_string())
}

pub fn get_api_key() -> Option<String> {
    env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty())
}

/// Where and how to reach a model server
#[derive(Debug, Clone)]
pub struct BackendConfig {
    provider: Provider,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl BackendConfig {
    pub fn builder() -> BackendConfigBuilder {
        BackendConfigBuilder::default()
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Builder for [`BackendConfig`].
///
/// Unset fields fall back to the environment, then to provider defaults.
#[derive(Debug, Default)]
pub struct BackendConfigBuilder {
    provider: Option<Provider>,
    base_url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    timeout: Option<Duration>,
}

impl BackendConfigBuilder {
    pub fn provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<BackendConfig> {
        let provider = self.provider.unwrap_or(Provider::LMStudio);

        let base_url = match self.base_url {
            Some(url) => url,
            None => get_base_url(Some(provider), None),
        };
        if base_url.trim().is_empty() {
            return Err(Error::config("base_url cannot be empty"));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::config(format!(
                "base_url must start with http:// or https://, got '{}'",
                base_url
            )));
        }

        let model = self
            .model
            .or_else(|| get_model(None, true))
            .ok_or_else(|| Error::config(format!("model is required (or set {})", MODEL_ENV)))?;
        if model.trim().is_empty() {
            return Err(Error::config("model cannot be empty"));
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err(Error::config("timeout must be greater than zero"));
        }

        Ok(BackendConfig {
            provider,
            base_url,
            model,
            api_key: self.api_key.or_else(get_api_key),
            timeout,
        })
    }
}

/// Construct the adapter matching the provider's wire protocol
pub fn create_backend(config: &BackendConfig) -> Result<Arc<dyn ChatHandler>> {
    log::debug!(
        "creating {:?} backend for {} at {}",
        config.provider().wire_protocol(),
        config.model(),
        config.base_url()
    );

    Ok(match config.provider().wire_protocol() {
        WireProtocol::Raw => Arc::new(OllamaBackend::new(config)?),
        WireProtocol::Structured => Arc::new(OpenAiBackend::new(config)?),
    })
}
