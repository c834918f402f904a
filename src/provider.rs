//! Model Provider Abstraction
//!
//! Interface for the external generative-text service. A provider either streams a
//! sequence of wire events for one call or answers the call in a single blocking
//! response; both shapes feed the same decoder downstream.

use crate::decoder::DecoderConfig;
use crate::error::{ApiError, ProviderError};
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub mod openai;
pub mod scripted;
pub mod sse;
pub mod wire;

pub use openai::OpenAiResponsesClient;
pub use scripted::{ScriptedCall, ScriptedProvider};
pub use wire::{OutputItem, ProviderResponse, ProviderWireEvent};

/// Schema the provider output must conform to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    /// Name of the single function call that carries the structured output
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for the call arguments
    pub schema: Value,
}

/// Sampling and budget options passed through to the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

/// A finished provider request: prompt, model and optional output schema
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub instructions: Option<String>,
    pub schema: Option<OutputSchema>,
    pub options: GenerationOptions,
}

/// Ordered wire events for one provider call.
pub type WireEventStream = Pin<Box<dyn Stream<Item = Result<ProviderWireEvent, ApiError>> + Send>>;

/// Model provider client trait
#[async_trait]
pub trait ModelProviderClient: Send + Sync {
    /// Start a streaming call. Resolves once the provider accepted the request.
    async fn stream(&self, request: &GenerationRequest) -> Result<WireEventStream, ApiError>;

    /// Single blocking call yielding the full response.
    async fn complete(&self, request: &GenerationRequest) -> Result<ProviderResponse, ApiError>;

    /// Whether `stream` is usable for this provider.
    fn supports_streaming(&self) -> bool {
        true
    }

    /// Get the provider name
    fn provider_name(&self) -> &str;
}

/// Provider backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAI,
    Scripted,
}

/// Provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_kind")]
    pub kind: ProviderType,

    /// Base URL of the API (default: https://api.openai.com/v1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Inline API key; prefer `api_key_env`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Use incremental streaming when the provider supports it
    #[serde(default = "default_true")]
    pub streaming: bool,

    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_provider_kind() -> ProviderType {
    ProviderType::OpenAI
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_seconds() -> u64 {
    300
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            base_url: None,
            api_key: None,
            api_key_env: default_api_key_env(),
            streaming: true,
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(base_url) = &self.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err(format!("Invalid base_url '{}': must be http(s)", base_url));
            }
        }
        if self.request_timeout_seconds == 0 {
            return Err("request_timeout_seconds must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Inline key first, then the configured environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.is_empty())
    }
}

/// Builds provider clients from configuration
pub struct ProviderFactory;

impl ProviderFactory {
    /// `decoder` bounds the size of a single raw stream event.
    pub fn create_client(
        config: &ProviderConfig,
        decoder: &DecoderConfig,
    ) -> Result<Arc<dyn ModelProviderClient>, ApiError> {
        match config.kind {
            ProviderType::OpenAI => {
                let api_key = config.resolve_api_key().ok_or_else(|| {
                    ApiError::ConfigError(format!(
                        "No API key configured (set provider.api_key or {})",
                        config.api_key_env
                    ))
                })?;
                let client = OpenAiResponsesClient::new(
                    api_key,
                    config.base_url.clone(),
                    config.request_timeout(),
                    config.streaming,
                )?
                .with_max_event_bytes(decoder.max_event_bytes());
                Ok(Arc::new(client))
            }
            ProviderType::Scripted => {
                let provider = ScriptedProvider::new(Vec::new())
                    .with_fallback(ScriptedCall::text_response(&["Scripted ", "response."]));
                let provider = if config.streaming {
                    provider
                } else {
                    provider.blocking_only()
                };
                Ok(Arc::new(provider))
            }
        }
    }
}

/// Map transport errors onto the provider failure taxonomy
pub(crate) fn map_http_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(error.to_string())
    } else if error.is_connect() {
        ProviderError::Connection(error.to_string())
    } else if let Some(status) = error.status() {
        ProviderError::from_status(status.as_u16(), error.to_string())
    } else if error.is_request() || error.is_body() {
        ProviderError::Connection(error.to_string())
    } else {
        ProviderError::Other(error.to_string())
    }
}
