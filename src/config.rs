//! Configuration System
//!
//! Hierarchical configuration for the generation service: built-in defaults, global and
//! workspace files, an explicit file, then environment overrides. Each section's type
//! lives next to the code it configures.

use crate::decoder::DecoderConfig;
use crate::error::ApiError;
use crate::jobs::JobsConfig;
use crate::logging::LoggingConfig;
use crate::orchestrator::{default_prices, ModelPrice, PricingTable};
use crate::provider::ProviderConfig;
use crate::resilience::{BreakerConfig, RetryConfig};
use crate::server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

mod facade;
mod merge {
    pub mod merge_policy;
}
mod sources {
    pub mod global_file;
    pub mod workspace_file;
}

pub use facade::{ConfigLoader, ENV_PREFIX};
pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenstreamConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub decoder: DecoderConfig,

    /// Price overrides keyed by model-name prefix, merged over the built-in table
    #[serde(default)]
    pub pricing: BTreeMap<String, ModelPrice>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration validation error, tagged with its section
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub section: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.section, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl GenstreamConfig {
    /// Validate the entire configuration, collecting every problem.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let checks: [(&'static str, Result<(), String>); 6] = [
            ("server", self.validate_server()),
            ("jobs", self.jobs.validate()),
            ("retry", self.retry.validate()),
            ("breaker", self.breaker.validate()),
            ("provider", self.provider.validate()),
            ("decoder", self.decoder.validate()),
        ];
        let mut errors: Vec<ValidationError> = checks
            .into_iter()
            .filter_map(|(section, result)| {
                result.err().map(|message| ValidationError { section, message })
            })
            .collect();

        for (prefix, price) in &self.pricing {
            if price.input_per_million < 0.0 || price.output_per_million < 0.0 {
                errors.push(ValidationError {
                    section: "pricing",
                    message: format!("prices for '{}' must not be negative", prefix),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate, folding all problems into one error.
    pub fn ensure_valid(&self) -> Result<(), ApiError> {
        self.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ApiError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            ))
        })
    }

    fn validate_server(&self) -> Result<(), String> {
        self.server
            .bind
            .parse::<std::net::SocketAddr>()
            .map(|_| ())
            .map_err(|e| format!("Invalid bind address '{}': {}", self.server.bind, e))
    }

    /// Built-in prices with configured overrides applied.
    pub fn pricing_table(&self) -> PricingTable {
        let mut prices = default_prices();
        prices.extend(self.pricing.iter().map(|(k, v)| (k.clone(), *v)));
        PricingTable::new(prices)
    }

    pub fn to_toml(&self) -> Result<String, ApiError> {
        toml::to_string_pretty(self)
            .map_err(|e| ApiError::ConfigError(format!("Failed to render configuration: {}", e)))
    }
}
