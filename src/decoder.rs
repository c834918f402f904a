//! Incremental decoding of provider wire events
//!
//! A [`StreamDecoder`] consumes the ordered events of one provider call. Text deltas
//! and structured-argument fragments are surfaced as chunks the moment they arrive;
//! structured arguments are also buffered per call item until the completed envelope
//! resolves the final result.

pub mod schema;
pub mod usage;

pub use usage::UsageMetrics;

use crate::error::{ApiError, ProviderError};
use crate::provider::{OutputItem, OutputSchema, ProviderResponse, ProviderWireEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Default cap on buffered structured-argument text (4 MiB)
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// Room for the rest of a completed envelope around its repeated arguments
const EVENT_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Cap on buffered structured-argument text per call
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
}

fn default_max_buffer_bytes() -> usize {
    DEFAULT_MAX_BUFFER_BYTES
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
        }
    }
}

impl DecoderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_buffer_bytes == 0 {
            return Err("decoder.max_buffer_bytes must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Cap on a single raw stream event. The completed envelope repeats the buffered
    /// arguments JSON-escaped, which can double them, next to the text output.
    pub fn max_event_bytes(&self) -> usize {
        self.max_buffer_bytes
            .saturating_mul(4)
            .saturating_add(EVENT_OVERHEAD_BYTES)
    }
}

/// Callback for streamed reasoning text. Errors are logged and dropped.
pub type ReasoningCallback = Box<dyn FnMut(&str) -> Result<(), ApiError> + Send>;

/// The resolved output of one call
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPayload {
    /// Schema-conforming structured output
    Structured(Value),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedResult {
    pub payload: DecodedPayload,
    pub usage: UsageMetrics,
    pub reasoning: Option<String>,
    pub model: Option<String>,
}

/// What feeding one event produced
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeStep {
    /// Text to forward to the client
    Chunk(String),
    /// Event absorbed, nothing to forward
    Continue,
    Resolved(DecodedResult),
}

#[derive(Debug)]
struct PendingStructuredCall {
    item_id: String,
    text: String,
    done: bool,
}

pub struct StreamDecoder {
    schema: Option<OutputSchema>,
    max_buffer_bytes: usize,
    pending: Vec<PendingStructuredCall>,
    buffered_bytes: usize,
    reasoning: String,
    on_reasoning: Option<ReasoningCallback>,
    finished: bool,
    completed: bool,
}

impl StreamDecoder {
    pub fn new(schema: Option<OutputSchema>) -> Self {
        Self {
            schema,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            pending: Vec::new(),
            buffered_bytes: 0,
            reasoning: String::new(),
            on_reasoning: None,
            finished: false,
            completed: false,
        }
    }

    pub fn with_max_buffer_bytes(mut self, max_buffer_bytes: usize) -> Self {
        self.max_buffer_bytes = max_buffer_bytes;
        self
    }

    pub fn with_reasoning_callback(mut self, callback: ReasoningCallback) -> Self {
        self.on_reasoning = Some(callback);
        self
    }

    /// Whether a completed or failed envelope has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the provider delivered a completed envelope, whether or not its
    /// content then resolved.
    pub fn received_completion(&self) -> bool {
        self.completed
    }

    /// Feed the next wire event.
    pub fn feed(&mut self, event: ProviderWireEvent) -> Result<DecodeStep, ApiError> {
        if self.finished {
            return Err(ApiError::Internal(
                "wire event received after the call resolved".to_string(),
            ));
        }

        match event {
            ProviderWireEvent::TextDelta(text) => Ok(DecodeStep::Chunk(text)),
            ProviderWireEvent::StructuredArgDelta { item_id, fragment } => {
                self.append(&item_id, &fragment)?;
                Ok(DecodeStep::Chunk(fragment))
            }
            ProviderWireEvent::StructuredArgDone { item_id, arguments } => {
                self.finalize(&item_id, arguments)?;
                Ok(DecodeStep::Continue)
            }
            ProviderWireEvent::ReasoningDelta(text) => {
                self.reasoning.push_str(&text);
                if let Some(callback) = self.on_reasoning.as_mut() {
                    if let Err(err) = callback(&text) {
                        debug!(error = %err, "Reasoning callback failed");
                    }
                }
                Ok(DecodeStep::Continue)
            }
            ProviderWireEvent::Completed(response) => {
                self.finished = true;
                self.completed = true;
                let result = self.resolve(response);
                self.clear();
                result.map(DecodeStep::Resolved)
            }
            ProviderWireEvent::Failed(message) => {
                self.finished = true;
                self.clear();
                Err(ProviderError::ResponseFailed(message).into())
            }
        }
    }

    /// Signal end of input. Fails when no envelope resolved the call.
    pub fn finish(&mut self) -> Result<(), ApiError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.clear();
        Err(ApiError::Decode(
            "provider stream ended without a completed response".to_string(),
        ))
    }

    fn pending_mut(&mut self, item_id: &str) -> &mut PendingStructuredCall {
        let index = match self.pending.iter().position(|call| call.item_id == item_id) {
            Some(index) => index,
            None => {
                self.pending.push(PendingStructuredCall {
                    item_id: item_id.to_string(),
                    text: String::new(),
                    done: false,
                });
                self.pending.len() - 1
            }
        };
        &mut self.pending[index]
    }

    fn append(&mut self, item_id: &str, fragment: &str) -> Result<(), ApiError> {
        self.reserve(fragment.len())?;
        self.pending_mut(item_id).text.push_str(fragment);
        Ok(())
    }

    fn finalize(&mut self, item_id: &str, arguments: Option<String>) -> Result<(), ApiError> {
        if let Some(full) = arguments {
            let previous = self
                .pending
                .iter()
                .find(|call| call.item_id == item_id)
                .map(|call| call.text.len())
                .unwrap_or(0);
            self.buffered_bytes -= previous;
            self.reserve(full.len())?;
            self.pending_mut(item_id).text = full;
        }
        self.pending_mut(item_id).done = true;
        Ok(())
    }

    fn reserve(&mut self, additional: usize) -> Result<(), ApiError> {
        let total = self.buffered_bytes.saturating_add(additional);
        if total > self.max_buffer_bytes {
            return Err(ApiError::Decode(format!(
                "structured output exceeded {} bytes",
                self.max_buffer_bytes
            )));
        }
        self.buffered_bytes = total;
        Ok(())
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.buffered_bytes = 0;
    }

    fn resolve(&mut self, response: ProviderResponse) -> Result<DecodedResult, ApiError> {
        let usage = UsageMetrics::from_raw(response.usage.as_ref());

        let content_reasoning = response.reasoning_text();
        let reasoning = if content_reasoning.trim().is_empty() {
            std::mem::take(&mut self.reasoning)
        } else {
            content_reasoning
        };

        let payload = match self.schema.take() {
            Some(schema) => {
                let raw = self.structured_text(&schema, &response).ok_or_else(|| {
                    ApiError::Decode(format!("response has no '{}' call", schema.name))
                })?;
                DecodedPayload::Structured(decode_structured(&raw, &schema)?)
            }
            None => match response.first_text() {
                Some(text) if !text.is_empty() => DecodedPayload::Text(text.to_string()),
                _ => {
                    return Err(ApiError::Decode(
                        "response has neither structured nor text output".to_string(),
                    ))
                }
            },
        };

        Ok(DecodedResult {
            payload,
            usage,
            reasoning: (!reasoning.trim().is_empty()).then_some(reasoning),
            model: response.model,
        })
    }

    /// Argument text for the schema's call: the buffer of the envelope item carrying
    /// that name, else the first buffer, else the arguments inside the envelope.
    fn structured_text(&self, schema: &OutputSchema, response: &ProviderResponse) -> Option<String> {
        let calls: Vec<(&str, &str, &str)> = response
            .output
            .iter()
            .filter_map(|item| match item {
                OutputItem::FunctionCall {
                    item_id,
                    name,
                    arguments,
                } => Some((item_id.as_str(), name.as_str(), arguments.as_str())),
                _ => None,
            })
            .collect();
        let named = calls.iter().find(|(_, name, _)| *name == schema.name);

        let buffered = named
            .and_then(|(item_id, _, _)| self.pending.iter().find(|call| call.item_id == *item_id))
            .or_else(|| self.pending.first())
            .filter(|call| !call.text.is_empty())
            .map(|call| call.text.clone());

        buffered.or_else(|| {
            named
                .or_else(|| calls.first())
                .map(|(_, _, arguments)| arguments.to_string())
                .filter(|arguments| !arguments.is_empty())
        })
    }
}

fn decode_structured(raw: &str, schema: &OutputSchema) -> Result<Value, ApiError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ApiError::Decode(format!("structured output is not valid JSON: {}", e)))?;

    let errors = match schema::validate(&value, &schema.schema) {
        Ok(()) => return Ok(value),
        Err(errors) => errors,
    };

    if let Some(unwrapped) = schema::unwrap_single_element_list(&value, &schema.schema) {
        if schema::validate(&unwrapped, &schema.schema).is_ok() {
            debug!(schema = %schema.name, "Unwrapped single-element list into object");
            return Ok(unwrapped);
        }
    }

    Err(ApiError::Decode(format!(
        "structured output does not match schema '{}': {}",
        schema.name,
        errors.join("; ")
    )))
}
