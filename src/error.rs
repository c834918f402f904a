//! Error types for the generation job service.

use std::time::Duration;
use thiserror::Error;

/// Failures raised by a single provider call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Provider request timed out: {0}")]
    Timeout(String),

    #[error("Provider connection error: {0}")]
    Connection(String),

    #[error("Provider request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Provider authentication failed: {0}")]
    AuthFailed(String),

    #[error("Provider reported a failed response: {0}")]
    ResponseFailed(String),

    #[error("Provider returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider error: {0}")]
    Other(String),
}

/// HTTP statuses that indicate a transient provider condition.
pub const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

impl ProviderError {
    /// Whether the failure is worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimited(_)
            | ProviderError::Timeout(_)
            | ProviderError::Connection(_) => true,
            ProviderError::Status { status, .. } => TRANSIENT_STATUSES.contains(status),
            ProviderError::AuthFailed(_)
            | ProviderError::ResponseFailed(_)
            | ProviderError::InvalidResponse(_)
            | ProviderError::Other(_) => false,
        }
    }

    /// Classify an HTTP status plus body text.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => ProviderError::AuthFailed(message),
            429 => ProviderError::RateLimited(message),
            408 => ProviderError::Timeout(message),
            _ => ProviderError::Status { status, message },
        }
    }
}

/// Crate-wide error type.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Circuit breaker is open; retry in {}ms", .retry_in.as_millis())]
    CircuitOpen { retry_in: Duration },

    #[error("Structured output decode failed: {0}")]
    Decode(String),

    #[error("Job cancelled: {0}")]
    Cancelled(String),

    #[error("Artifact rendering failed: {0}")]
    Render(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Transient provider failures and fast-failing breaker rejections are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Provider(err) => err.is_transient(),
            ApiError::CircuitOpen { .. } => true,
            _ => false,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, ApiError::Cancelled(_))
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
