//! Job records and their parameters.

use crate::progress::Phase;
use crate::provider::{GenerationOptions, GenerationRequest, OutputSchema};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Error | JobState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Error => "error",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to generate. Only `prompt` and `model` are required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub prompt: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Structured output schema; without one the job yields plain text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<OutputSchema>,
    #[serde(flatten)]
    pub options: GenerationOptions,
}

impl JobParams {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            instructions: None,
            schema: None,
            options: GenerationOptions::default(),
        }
    }

    pub fn with_schema(mut self, schema: OutputSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.prompt.trim().is_empty() {
            return Err("prompt must not be empty".to_string());
        }
        if self.model.trim().is_empty() {
            return Err("model must not be empty".to_string());
        }
        if let Some(schema) = &self.schema {
            if schema.name.trim().is_empty() {
                return Err("schema.name must not be empty".to_string());
            }
            if !schema.schema.is_object() {
                return Err("schema.schema must be a JSON object".to_string());
            }
        }
        Ok(())
    }

    pub fn to_request(&self) -> GenerationRequest {
        GenerationRequest {
            model: self.model.clone(),
            prompt: self.prompt.clone(),
            instructions: self.instructions.clone(),
            schema: self.schema.clone(),
            options: self.options.clone(),
        }
    }
}

/// Snapshot of one job
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub state: JobState,
    /// Last phase a run reached; `Complete` once the job completed
    pub phase: Option<Phase>,
    pub params: JobParams,
    pub result: Option<Value>,
    /// Reasoning text the provider returned alongside the result
    pub reasoning: Option<String>,
    pub error: Option<String>,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Job {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Job lifetime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,

    /// Upper bound on how long a cancel request waits for the run to clean up
    #[serde(default = "default_cancel_wait_seconds")]
    pub cancel_wait_seconds: u64,
}

fn default_ttl_seconds() -> u64 {
    3600
}

fn default_sweep_interval_seconds() -> u64 {
    300
}

fn default_cancel_wait_seconds() -> u64 {
    10
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            cancel_wait_seconds: default_cancel_wait_seconds(),
        }
    }
}

impl JobsConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.ttl_seconds == 0 {
            return Err("jobs.ttl_seconds must be greater than zero".to_string());
        }
        if self.sweep_interval_seconds == 0 {
            return Err("jobs.sweep_interval_seconds must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn cancel_wait(&self) -> Duration {
        Duration::from_secs(self.cancel_wait_seconds)
    }
}
