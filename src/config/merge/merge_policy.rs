//! Merge rules: built-in defaults, lowest precedence.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("server.bind", "127.0.0.1:8080")?
        .set_default("jobs.ttl_seconds", 3600)?
        .set_default("jobs.sweep_interval_seconds", 300)?
        .set_default("jobs.cancel_wait_seconds", 10)?
        .set_default("retry.enabled", true)?
        .set_default("retry.max_attempts", 3)?
        .set_default("retry.base_delay_seconds", 1.0)?
        .set_default("breaker.enabled", true)?
        .set_default("breaker.failure_threshold", 5)?
        .set_default("breaker.cooldown_seconds", 60)?
        .set_default("provider.kind", "openai")?
        .set_default("provider.api_key_env", "OPENAI_API_KEY")?
        .set_default("provider.streaming", true)?
        .set_default("provider.request_timeout_seconds", 300)
}
