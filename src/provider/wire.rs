//! Provider wire events and the response envelope they resolve to.

use crate::error::ProviderError;
use serde_json::Value;

/// One event of a provider call, in the order the provider emitted it.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderWireEvent {
    /// Plain output text
    TextDelta(String),
    /// Fragment of a structured call's JSON arguments
    StructuredArgDelta { item_id: String, fragment: String },
    /// Structured call finished; `arguments` carries the full text when the provider sends it
    StructuredArgDone {
        item_id: String,
        arguments: Option<String>,
    },
    ReasoningDelta(String),
    Completed(ProviderResponse),
    Failed(String),
}

/// Final response envelope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResponse {
    pub id: Option<String>,
    pub model: Option<String>,
    /// Raw usage object; field names vary per provider
    pub usage: Option<Value>,
    pub output: Vec<OutputItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputItem {
    Text(String),
    FunctionCall {
        item_id: String,
        name: String,
        arguments: String,
    },
    Reasoning(String),
}

impl ProviderResponse {
    /// Parse a Responses-API style envelope.
    pub fn from_json(value: &Value) -> Self {
        let output = value
            .get("output")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_output_item).collect())
            .unwrap_or_default();

        Self {
            id: value.get("id").and_then(Value::as_str).map(str::to_string),
            model: value.get("model").and_then(Value::as_str).map(str::to_string),
            usage: value.get("usage").filter(|u| !u.is_null()).cloned(),
            output,
        }
    }

    /// Text of the first plain-text output item, if any
    pub fn first_text(&self) -> Option<&str> {
        self.output.iter().find_map(|item| match item {
            OutputItem::Text(text) => Some(text.as_str()),
            _ => None,
        })
    }

    /// Concatenated reasoning text carried in the output items
    pub fn reasoning_text(&self) -> String {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::Reasoning(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Expand a blocking response into the event sequence a streamed call would have
    /// produced, ending with the envelope itself.
    pub fn into_events(self) -> Vec<ProviderWireEvent> {
        let mut events = Vec::with_capacity(self.output.len() * 2 + 1);
        for item in &self.output {
            match item {
                OutputItem::Text(text) if !text.is_empty() => {
                    events.push(ProviderWireEvent::TextDelta(text.clone()));
                }
                OutputItem::FunctionCall {
                    item_id, arguments, ..
                } => {
                    events.push(ProviderWireEvent::StructuredArgDelta {
                        item_id: item_id.clone(),
                        fragment: arguments.clone(),
                    });
                    events.push(ProviderWireEvent::StructuredArgDone {
                        item_id: item_id.clone(),
                        arguments: Some(arguments.clone()),
                    });
                }
                OutputItem::Reasoning(text) if !text.is_empty() => {
                    events.push(ProviderWireEvent::ReasoningDelta(text.clone()));
                }
                _ => {}
            }
        }
        events.push(ProviderWireEvent::Completed(self));
        events
    }
}

fn parse_output_item(item: &Value) -> Option<OutputItem> {
    match item.get("type").and_then(Value::as_str)? {
        "message" => {
            let text = collect_text(item.get("content"), &["output_text", "text"]);
            Some(OutputItem::Text(text))
        }
        "function_call" => {
            let item_id = item
                .get("id")
                .or_else(|| item.get("call_id"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(OutputItem::FunctionCall {
                item_id,
                name: item
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                arguments: item
                    .get("arguments")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        }
        "reasoning" => {
            let text = collect_text(item.get("content"), &["reasoning_text"]);
            Some(OutputItem::Reasoning(text))
        }
        _ => None,
    }
}

fn collect_text(content: Option<&Value>, kinds: &[&str]) -> String {
    content
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|part| {
                    part.get("type")
                        .and_then(Value::as_str)
                        .map(|kind| kinds.contains(&kind))
                        .unwrap_or(false)
                })
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

impl ProviderWireEvent {
    /// Parse one streamed event. Unknown event types yield `Ok(None)`.
    pub fn from_json(value: &Value) -> Result<Option<Self>, ProviderError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::InvalidResponse("event without type".to_string()))?;

        let text_field = |field: &str| -> Result<String, ProviderError> {
            value
                .get(field)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    ProviderError::InvalidResponse(format!("{} event missing '{}'", kind, field))
                })
        };

        let event = match kind {
            "response.output_text.delta" => Some(ProviderWireEvent::TextDelta(text_field("delta")?)),
            "response.function_call_arguments.delta" => Some(ProviderWireEvent::StructuredArgDelta {
                item_id: text_field("item_id")?,
                fragment: text_field("delta")?,
            }),
            "response.function_call_arguments.done" => Some(ProviderWireEvent::StructuredArgDone {
                item_id: text_field("item_id")?,
                arguments: value
                    .get("arguments")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            "response.reasoning_text.delta" | "response.reasoning_summary_text.delta" => {
                Some(ProviderWireEvent::ReasoningDelta(text_field("delta")?))
            }
            "response.completed" => {
                let response = value.get("response").ok_or_else(|| {
                    ProviderError::InvalidResponse("completed event missing response".to_string())
                })?;
                Some(ProviderWireEvent::Completed(ProviderResponse::from_json(
                    response,
                )))
            }
            "response.failed" | "response.incomplete" => {
                let message = value
                    .pointer("/response/error/message")
                    .and_then(Value::as_str)
                    .or_else(|| {
                        value
                            .pointer("/response/incomplete_details/reason")
                            .and_then(Value::as_str)
                    })
                    .unwrap_or("provider reported failure")
                    .to_string();
                Some(ProviderWireEvent::Failed(message))
            }
            "error" => {
                let message = value
                    .get("message")
                    .and_then(Value::as_str)
                    .or_else(|| value.pointer("/error/message").and_then(Value::as_str))
                    .unwrap_or("provider stream error")
                    .to_string();
                Some(ProviderWireEvent::Failed(message))
            }
            _ => None,
        };

        Ok(event)
    }
}
