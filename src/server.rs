//! HTTP adapter
//!
//! Exposes create / status / stream / cancel over axum. Streams are server-sent events,
//! one frame per progress event.

pub mod dto;
pub mod errors;
pub mod routes;

use crate::config::GenstreamConfig;
use crate::error::ApiError;
use crate::jobs::JobRegistry;
use crate::orchestrator::Orchestrator;
use crate::provider::ProviderFactory;
use crate::resilience::{CircuitBreaker, ResilientCaller};
use axum::routing::{get, post};
use axum::{Extension, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Shared state handed to every handler
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    /// Upper bound on waiting for a cancelled run to clean up
    pub cancel_wait: Duration,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, cancel_wait: Duration) -> Self {
        Self {
            registry: orchestrator.registry().clone(),
            orchestrator,
            cancel_wait,
        }
    }

    /// Wire registry, provider, breaker and orchestrator from configuration.
    pub fn from_config(config: &GenstreamConfig) -> Result<Self, ApiError> {
        let registry = Arc::new(JobRegistry::new(config.jobs.ttl()));
        let provider = ProviderFactory::create_client(&config.provider, &config.decoder)?;
        let breaker = Arc::new(CircuitBreaker::from_config(&config.breaker));
        let caller = ResilientCaller::from_config(&config.retry, &config.breaker, breaker);
        let orchestrator = Orchestrator::new(registry, provider, caller)
            .with_pricing(config.pricing_table())
            .with_max_buffer_bytes(config.decoder.max_buffer_bytes);
        Ok(Self::new(Arc::new(orchestrator), config.jobs.cancel_wait()))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/jobs", post(routes::create_job))
        .route("/api/jobs/:id", get(routes::get_job))
        .route("/api/jobs/:id/stream", get(routes::stream_job))
        .route("/api/jobs/:id/cancel", post(routes::cancel_job))
        .layer(Extension(state))
}

/// Serve until `shutdown` fires, sweeping expired jobs every `sweep_interval`.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    sweep_interval: Duration,
    shutdown: CancellationToken,
) -> Result<(), ApiError> {
    let sweeper = state
        .registry
        .spawn_sweeper(sweep_interval, shutdown.child_token());
    let address = listener
        .local_addr()
        .map_err(|e| ApiError::Internal(format!("Failed to read listener address: {}", e)))?;
    info!(address = %address, "Listening");

    let app = router(state);
    let signal = shutdown.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move { signal.cancelled().await })
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)));

    shutdown.cancel();
    let _ = sweeper.await;
    info!("Server stopped");
    result
}
