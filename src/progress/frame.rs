//! Wire envelope for streamed progress.
//!
//! Each frame is one JSON object with a `type` discriminator, carried as the data of
//! a single server-sent event.

use super::event::{ErrorCode, Phase, ProgressEvent};
use crate::decoder::UsageMetrics;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamFrame {
    Chunk {
        content: String,
    },
    Step {
        step: Phase,
    },
    Metadata {
        tokens: UsageMetrics,
        cost: f64,
    },
    Complete {
        result: Value,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

impl From<ProgressEvent> for StreamFrame {
    fn from(event: ProgressEvent) -> Self {
        match event {
            ProgressEvent::Phase(step) => StreamFrame::Step { step },
            ProgressEvent::TextChunk(content) => StreamFrame::Chunk { content },
            ProgressEvent::Metadata { tokens, cost } => StreamFrame::Metadata { tokens, cost },
            ProgressEvent::Result(result) => StreamFrame::Complete { result },
            ProgressEvent::Failure { message, code } => StreamFrame::Error { message, code },
        }
    }
}

impl StreamFrame {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({
                "type": "error",
                "message": format!("Failed to encode progress frame: {}", e),
            })
            .to_string()
        })
    }
}
