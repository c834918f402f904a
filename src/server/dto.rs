//! Request and response bodies.

use crate::jobs::{Job, JobCounts, JobParams, JobState};
use crate::progress::Phase;
use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `POST /api/jobs` body: the generation parameters themselves
pub type CreateJobRequest = JobParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job_id: String,
    pub stream_url: String,
    pub status: JobState,
}

impl CreateJobResponse {
    pub fn queued(job_id: String) -> Self {
        Self {
            stream_url: format!("/api/jobs/{}/stream", job_id),
            job_id,
            status: JobState::Queued,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.state,
            phase: job.phase,
            result: job.result,
            reasoning: job.reasoning,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelJobResponse {
    pub success: bool,
    pub message: String,
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breaker: Option<CircuitState>,
    pub jobs: JobCounts,
}
