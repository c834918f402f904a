//! Deterministic in-process provider.
//!
//! Replays a fixed script of call outcomes, one per call attempt. When the script runs
//! dry the fallback outcome (if any) answers every further call.

use crate::error::{ApiError, ProviderError};
use crate::provider::wire::{OutputItem, ProviderResponse, ProviderWireEvent};
use crate::provider::{GenerationRequest, ModelProviderClient, WireEventStream};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Outcome of one scripted call attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedCall {
    /// The call fails before any event is produced
    Fail(ProviderError),
    /// The call succeeds and yields these events in order
    Respond(Vec<ProviderWireEvent>),
}

impl ScriptedCall {
    /// Plain-text answer streamed as one delta per part.
    pub fn text_response(parts: &[&str]) -> Self {
        let text: String = parts.concat();
        let mut events: Vec<ProviderWireEvent> = parts
            .iter()
            .map(|part| ProviderWireEvent::TextDelta(part.to_string()))
            .collect();
        events.push(ProviderWireEvent::Completed(ProviderResponse {
            id: Some("resp_scripted".to_string()),
            model: Some("scripted".to_string()),
            usage: Some(usage_for(&text)),
            output: vec![OutputItem::Text(text)],
        }));
        ScriptedCall::Respond(events)
    }

    /// Structured answer: argument fragments for a single function call named `name`.
    pub fn structured_response(item_id: &str, name: &str, fragments: &[&str]) -> Self {
        let arguments: String = fragments.concat();
        let mut events: Vec<ProviderWireEvent> = fragments
            .iter()
            .map(|fragment| ProviderWireEvent::StructuredArgDelta {
                item_id: item_id.to_string(),
                fragment: fragment.to_string(),
            })
            .collect();
        events.push(ProviderWireEvent::StructuredArgDone {
            item_id: item_id.to_string(),
            arguments: None,
        });
        events.push(ProviderWireEvent::Completed(ProviderResponse {
            id: Some("resp_scripted".to_string()),
            model: Some("scripted".to_string()),
            usage: Some(usage_for(&arguments)),
            output: vec![OutputItem::FunctionCall {
                item_id: item_id.to_string(),
                name: name.to_string(),
                arguments,
            }],
        }));
        ScriptedCall::Respond(events)
    }
}

// One token per four characters, roughly what the real tokenizers report.
fn usage_for(text: &str) -> serde_json::Value {
    let output = (text.chars().count() as u64).div_ceil(4).max(1);
    json!({
        "input_tokens": 12,
        "output_tokens": output,
        "total_tokens": 12 + output,
    })
}

/// Provider that answers from a script
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptedCall>>,
    fallback: Option<ScriptedCall>,
    event_delay: Option<Duration>,
    streaming: bool,
    attempts: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(script: Vec<ScriptedCall>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            event_delay: None,
            streaming: true,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn with_fallback(mut self, fallback: ScriptedCall) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Sleep before yielding each streamed event.
    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = Some(delay);
        self
    }

    /// Report no streaming support so callers use `complete`.
    pub fn blocking_only(mut self) -> Self {
        self.streaming = false;
        self
    }

    /// Number of calls made so far, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn next_call(&self) -> Result<Vec<ProviderWireEvent>, ApiError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let call = self.script.lock().pop_front().or_else(|| self.fallback.clone());
        match call {
            Some(ScriptedCall::Respond(events)) => Ok(events),
            Some(ScriptedCall::Fail(err)) => Err(err.into()),
            None => Err(ProviderError::Other("script exhausted".to_string()).into()),
        }
    }
}

#[async_trait]
impl ModelProviderClient for ScriptedProvider {
    async fn stream(&self, _request: &GenerationRequest) -> Result<WireEventStream, ApiError> {
        let events = self.next_call()?;
        let delay = self.event_delay;
        let stream = futures::stream::iter(events).then(move |event| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(event)
        });
        Ok(Box::pin(stream))
    }

    async fn complete(&self, _request: &GenerationRequest) -> Result<ProviderResponse, ApiError> {
        let events = self.next_call()?;
        if let Some(delay) = self.event_delay {
            tokio::time::sleep(delay).await;
        }
        for event in events {
            match event {
                ProviderWireEvent::Completed(response) => return Ok(response),
                ProviderWireEvent::Failed(message) => {
                    return Err(ProviderError::ResponseFailed(message).into())
                }
                _ => {}
            }
        }
        Err(ProviderError::InvalidResponse("scripted call has no envelope".to_string()).into())
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}
