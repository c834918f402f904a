//! Genstream: Streaming Generation Jobs
//!
//! Runs structured or free-text model generation as cancellable background jobs and
//! streams each job's progress to clients as server-sent events. Provider calls go
//! through retry and a circuit breaker; partial structured output is decoded
//! incrementally as it arrives.

pub mod cli;
pub mod config;
pub mod decoder;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod orchestrator;
pub mod progress;
pub mod provider;
pub mod resilience;
pub mod server;

pub use error::{ApiError, ProviderError};
