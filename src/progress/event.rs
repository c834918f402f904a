//! Progress events emitted while a job runs.

use crate::decoder::UsageMetrics;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse progress label, independent of how generation happens underneath
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Prompting,
    Generating,
    Validating,
    Complete,
}

/// Failure codes clients branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Cancelled,
    DecodeFailed,
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Phase(Phase),
    TextChunk(String),
    Metadata { tokens: UsageMetrics, cost: f64 },
    Result(Value),
    Failure {
        message: String,
        code: Option<ErrorCode>,
    },
}

impl ProgressEvent {
    pub fn failure(message: impl Into<String>, code: Option<ErrorCode>) -> Self {
        ProgressEvent::Failure {
            message: message.into(),
            code,
        }
    }

    pub fn cancelled() -> Self {
        Self::failure("Job was cancelled", Some(ErrorCode::Cancelled))
    }

    /// Result and failure end a job's event sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Result(_) | ProgressEvent::Failure { .. })
    }
}
