//! OpenAI Responses API client.

use crate::decoder::DecoderConfig;
use crate::error::{ApiError, ProviderError};
use crate::provider::sse::SseFrameDecoder;
use crate::provider::wire::{ProviderResponse, ProviderWireEvent};
use crate::provider::{map_http_error, GenerationRequest, ModelProviderClient, WireEventStream};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

const PROVIDER_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

// Responses API request structures
#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningOptions<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<FunctionTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice<'a>>,
}

#[derive(Serialize)]
struct ReasoningOptions<'a> {
    effort: &'a str,
}

#[derive(Serialize)]
struct FunctionTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    parameters: &'a Value,
    strict: bool,
}

#[derive(Serialize)]
struct ToolChoice<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
}

impl<'a> ResponsesRequest<'a> {
    fn build(request: &'a GenerationRequest, stream: bool) -> Self {
        let (tools, tool_choice) = match &request.schema {
            Some(schema) => (
                vec![FunctionTool {
                    kind: "function",
                    name: &schema.name,
                    description: schema.description.as_deref(),
                    parameters: &schema.schema,
                    strict: false,
                }],
                Some(ToolChoice {
                    kind: "function",
                    name: &schema.name,
                }),
            ),
            None => (Vec::new(), None),
        };

        Self {
            model: &request.model,
            input: &request.prompt,
            instructions: request.instructions.as_deref(),
            stream,
            temperature: request.options.temperature,
            max_output_tokens: request.options.max_output_tokens,
            reasoning: request
                .options
                .reasoning_effort
                .as_deref()
                .map(|effort| ReasoningOptions { effort }),
            tools,
            tool_choice,
        }
    }
}

/// OpenAI provider client
pub struct OpenAiResponsesClient {
    client: Client,
    api_key: String,
    base_url: String,
    streaming: bool,
    max_event_bytes: usize,
}

impl OpenAiResponsesClient {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        request_timeout: Duration,
        streaming: bool,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(PROVIDER_HTTP_CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ApiError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            api_key,
            base_url,
            streaming,
            max_event_bytes: DecoderConfig::default().max_event_bytes(),
        })
    }

    /// Cap on one raw server-sent event before the stream is abandoned.
    pub fn with_max_event_bytes(mut self, max_event_bytes: usize) -> Self {
        self.max_event_bytes = max_event_bytes;
        self
    }

    async fn send(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ApiError> {
        let body = ResponsesRequest::build(request, stream);
        let url = format!("{}/responses", self.base_url);
        debug!(url = %url, model = %request.model, stream, "Sending provider request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::from_status(status, error_text).into());
        }

        Ok(response)
    }
}

#[async_trait]
impl ModelProviderClient for OpenAiResponsesClient {
    async fn stream(&self, request: &GenerationRequest) -> Result<WireEventStream, ApiError> {
        let response = self.send(request, true).await?;
        Ok(Box::pin(wire_events(
            Box::pin(response.bytes_stream()),
            self.max_event_bytes,
        )))
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<ProviderResponse, ApiError> {
        let response = self.send(request, false).await?;
        let body: Value = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        if body.get("status").and_then(Value::as_str) == Some("failed") {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("provider reported failure");
            return Err(ProviderError::ResponseFailed(message.to_string()).into());
        }

        Ok(ProviderResponse::from_json(&body))
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

struct SseState<S> {
    bytes: S,
    decoder: SseFrameDecoder,
    pending: VecDeque<Result<ProviderWireEvent, ApiError>>,
    exhausted: bool,
}

impl<S> SseState<S> {
    fn queue_payload(&mut self, data: &str) {
        let parsed = serde_json::from_str::<Value>(data)
            .map_err(|e| ProviderError::InvalidResponse(format!("Malformed stream event: {}", e)))
            .and_then(|value| ProviderWireEvent::from_json(&value));
        match parsed {
            Ok(Some(event)) => self.pending.push_back(Ok(event)),
            Ok(None) => {}
            Err(err) => self.pending.push_back(Err(err.into())),
        }
    }
}

/// Turn a raw SSE byte stream into ordered wire events.
fn wire_events<S, B>(
    bytes: S,
    max_event_bytes: usize,
) -> impl Stream<Item = Result<ProviderWireEvent, ApiError>> + Send
where
    S: Stream<Item = reqwest::Result<B>> + Unpin + Send,
    B: AsRef<[u8]> + Send,
{
    let state = SseState {
        bytes,
        decoder: SseFrameDecoder::new(max_event_bytes),
        pending: VecDeque::new(),
        exhausted: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.exhausted {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => match state.decoder.push(chunk.as_ref()) {
                    Ok(payloads) => {
                        for data in payloads {
                            state.queue_payload(&data);
                        }
                    }
                    Err(err) => {
                        state.exhausted = true;
                        state.pending.push_back(Err(err.into()));
                    }
                },
                Some(Err(err)) => {
                    state.exhausted = true;
                    state.pending.push_back(Err(map_http_error(err).into()));
                }
                None => {
                    state.exhausted = true;
                    if let Some(data) = state.decoder.finish() {
                        state.queue_payload(&data);
                    }
                }
            }
        }
    })
}
