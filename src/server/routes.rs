//! Route handlers.

use super::dto::{CancelJobResponse, CreateJobRequest, CreateJobResponse, HealthResponse, JobStatusResponse};
use super::errors::json_error;
use super::AppState;
use crate::error::ApiError;
use crate::progress::StreamFrame;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// POST /api/jobs
pub async fn create_job(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<CreateJobRequest>, JsonRejection>,
) -> Response {
    let Json(params) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return json_error(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text())
        }
    };
    if let Err(message) = params.validate() {
        return json_error(StatusCode::BAD_REQUEST, "invalid_request", message);
    }

    let job_id = state.registry.create_job(params);
    info!(job_id = %job_id, "Job queued");
    (StatusCode::CREATED, Json(CreateJobResponse::queued(job_id))).into_response()
}

/// GET /api/jobs/:id
pub async fn get_job(
    Extension(state): Extension<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    state
        .registry
        .get_job(&job_id)
        .map(|job| Json(job.into()))
        .ok_or(ApiError::JobNotFound(job_id))
}

/// GET /api/jobs/:id/stream
///
/// One server-sent event per progress event. The stream ends after the terminal
/// `complete` or `error` frame; closing it early cancels the job.
pub async fn stream_job(
    Extension(state): Extension<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    info!(job_id = %job_id, "Job stream opened");
    let events = state.orchestrator.stream(job_id).map(|event| {
        let frame = StreamFrame::from(event);
        Ok::<_, Infallible>(SseEvent::default().data(frame.to_json()))
    });

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)),
    )
        .into_response()
}

/// POST /api/jobs/:id/cancel
pub async fn cancel_job(
    Extension(state): Extension<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Json<CancelJobResponse> {
    if !state.registry.cancel(&job_id) {
        return Json(CancelJobResponse {
            success: false,
            message: "Job not found or already finished".to_string(),
            job_id,
        });
    }

    let cleaned_up = state
        .registry
        .wait_for_cleanup(&job_id, state.cancel_wait)
        .await;
    let message = if cleaned_up {
        "Job cancelled"
    } else {
        "Job cancelled; generation is still shutting down"
    };
    Json(CancelJobResponse {
        success: true,
        message: message.to_string(),
        job_id,
    })
}

/// GET /health
pub async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        provider: state.orchestrator.provider_name().to_string(),
        breaker: state.orchestrator.breaker_state(),
        jobs: state.registry.counts(),
    })
}
