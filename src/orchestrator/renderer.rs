//! Turning a decoded payload into the artifact stored on the job.

use crate::decoder::DecodedPayload;
use crate::error::ApiError;
use crate::jobs::JobParams;
use serde_json::{json, Value};

/// Final-artifact step applied to every decoded result
pub trait ArtifactRenderer: Send + Sync {
    fn render(&self, payload: &DecodedPayload, params: &JobParams) -> Result<Value, ApiError>;
}

/// Structured payloads as-is, text wrapped as `{"text": ...}`
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughRenderer;

impl ArtifactRenderer for PassthroughRenderer {
    fn render(&self, payload: &DecodedPayload, _params: &JobParams) -> Result<Value, ApiError> {
        Ok(match payload {
            DecodedPayload::Structured(value) => value.clone(),
            DecodedPayload::Text(text) => json!({ "text": text }),
        })
    }
}
