//! Job orchestration
//!
//! Drives one job from queued to a terminal state: resilient provider call, incremental
//! decoding, rendering, and the registry updates that go with each phase. Every run
//! ends with exactly one terminal event and one terminal registry update.

pub mod pricing;
pub mod renderer;

pub use pricing::{default_prices, ModelPrice, PricingTable};
pub use renderer::{ArtifactRenderer, PassthroughRenderer};

use crate::decoder::{DecodeStep, DecodedPayload, DecodedResult, StreamDecoder, DEFAULT_MAX_BUFFER_BYTES};
use crate::error::ApiError;
use crate::jobs::{Job, JobParams, JobRegistry, JobState, RunStart};
use crate::progress::{ErrorCode, Phase, ProgressEvent};
use crate::provider::{GenerationRequest, ModelProviderClient, ProviderWireEvent, WireEventStream};
use crate::resilience::{CircuitState, ResilientCaller};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, trace, warn};

/// Message shown to clients when the provider stayed unavailable
pub const PROVIDER_UNAVAILABLE_MESSAGE: &str = "Generation failed: provider unavailable";

const EVENT_BUFFER: usize = 64;

pub struct Orchestrator {
    registry: Arc<JobRegistry>,
    provider: Arc<dyn ModelProviderClient>,
    caller: ResilientCaller,
    renderer: Arc<dyn ArtifactRenderer>,
    pricing: PricingTable,
    max_buffer_bytes: usize,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<JobRegistry>,
        provider: Arc<dyn ModelProviderClient>,
        caller: ResilientCaller,
    ) -> Self {
        Self {
            registry,
            provider,
            caller,
            renderer: Arc::new(PassthroughRenderer),
            pricing: PricingTable::new(default_prices()),
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ArtifactRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_max_buffer_bytes(mut self, max_buffer_bytes: usize) -> Self {
        self.max_buffer_bytes = max_buffer_bytes;
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn provider_name(&self) -> &str {
        self.provider.provider_name()
    }

    /// State of the shared breaker, when one is attached.
    pub fn breaker_state(&self) -> Option<CircuitState> {
        self.caller.breaker().map(|breaker| breaker.state())
    }

    /// Run the job on a background task and stream its events. Dropping the stream
    /// interrupts the run like a cancel.
    pub fn stream(self: &Arc<Self>, job_id: impl Into<String>) -> ProgressStream {
        let job_id = job_id.into();
        let (sender, receiver) = mpsc::channel(EVENT_BUFFER);
        let token = CancellationToken::new();
        let orchestrator = Arc::clone(self);
        let run_token = token.clone();
        tokio::spawn(async move {
            orchestrator.run(&job_id, sender, run_token).await;
        });
        ProgressStream {
            inner: ReceiverStream::new(receiver),
            finished: false,
            _disconnect: token.drop_guard(),
        }
    }

    /// Drive one job, sending its events to `events`. `token` interrupts the run.
    pub async fn run(
        &self,
        job_id: &str,
        events: mpsc::Sender<ProgressEvent>,
        token: CancellationToken,
    ) {
        let params = match self.registry.begin_run(job_id, token.clone()) {
            RunStart::Started(params) => params,
            RunStart::NotFound => {
                let _ = events
                    .send(ProgressEvent::failure(
                        format!("Job not found: {}", job_id),
                        Some(ErrorCode::NotFound),
                    ))
                    .await;
                return;
            }
            RunStart::AlreadyRunning => {
                let _ = events
                    .send(ProgressEvent::failure("Job is already running", None))
                    .await;
                return;
            }
            RunStart::Terminal(job) => {
                debug!(job_id, state = %job.state, "Replaying finished job");
                let _ = events.send(replay(job)).await;
                return;
            }
        };

        let _guard = RunGuard {
            registry: &self.registry,
            job_id,
        };
        info!(job_id, model = %params.model, "Job started");

        if let Err(err) = self.drive(job_id, &params, &events, &token).await {
            self.fail(job_id, err, &events).await;
        }
    }

    async fn drive(
        &self,
        job_id: &str,
        params: &JobParams,
        events: &mpsc::Sender<ProgressEvent>,
        token: &CancellationToken,
    ) -> Result<(), ApiError> {
        let request = params.to_request();
        self.enter_phase(job_id, events, Phase::Prompting).await;

        self.ensure_active(job_id, token, "before generation")?;
        self.enter_phase(job_id, events, Phase::Generating).await;

        let decoded = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ApiError::Cancelled("during generation".to_string())),
            result = self.generate(job_id, &request, events, token) => result,
        }?;

        let payload = match decoded.payload {
            DecodedPayload::Text(text) => DecodedPayload::Text(text.trim().to_string()),
            structured => structured,
        };
        self.ensure_active(job_id, token, "before validation")?;
        self.enter_phase(job_id, events, Phase::Validating).await;

        let artifact = self.renderer.render(&payload, params)?;
        let model = decoded.model.as_deref().unwrap_or(&params.model);
        let cost = self.pricing.cost(model, &decoded.usage);
        self.emit(
            job_id,
            events,
            ProgressEvent::Metadata {
                tokens: decoded.usage,
                cost,
            },
        )
        .await;

        self.ensure_active(job_id, token, "before completion")?;
        if let Some(reasoning) = decoded.reasoning {
            self.registry.set_reasoning(job_id, reasoning);
        }
        if !self
            .registry
            .update_status(job_id, JobState::Completed, Some(artifact.clone()), None)
        {
            return Err(ApiError::Cancelled("before completion".to_string()));
        }
        info!(
            job_id,
            total_tokens = decoded.usage.total_tokens,
            cost,
            "Job completed"
        );
        self.emit(job_id, events, ProgressEvent::Result(artifact)).await;
        Ok(())
    }

    /// Provider call plus decoding. Streaming and blocking providers both feed the
    /// same decoder.
    async fn generate(
        &self,
        job_id: &str,
        request: &GenerationRequest,
        events: &mpsc::Sender<ProgressEvent>,
        token: &CancellationToken,
    ) -> Result<DecodedResult, ApiError> {
        let reasoning_job = job_id.to_string();
        let mut decoder = StreamDecoder::new(request.schema.clone())
            .with_max_buffer_bytes(self.max_buffer_bytes)
            .with_reasoning_callback(Box::new(move |text| {
                trace!(job_id = %reasoning_job, chars = text.len(), "Reasoning delta");
                Ok(())
            }));

        if self.provider.supports_streaming() {
            let (mut stream, outcome) = self
                .caller
                .open(|attempt| {
                    debug!(job_id, attempt, provider = self.provider.provider_name(), "Opening provider stream");
                    self.provider.stream(request)
                })
                .await?;
            let drained = self
                .drain(job_id, &mut decoder, &mut stream, events, token)
                .await;
            match &drained {
                // Interrupted runs carry no verdict on the provider.
                Err(err) if err.is_cancellation() => {}
                Err(_) if !decoder.received_completion() => outcome.failed(),
                _ => outcome.succeeded(),
            }
            return drained;
        }

        let response = self
            .caller
            .call(|attempt| {
                debug!(job_id, attempt, provider = self.provider.provider_name(), "Calling provider");
                self.provider.complete(request)
            })
            .await?;
        for event in response.into_events() {
            if let Some(result) = self
                .forward(job_id, &mut decoder, event, events, token)
                .await?
            {
                return Ok(result);
            }
        }
        decoder.finish()?;
        Err(ApiError::Decode(
            "provider output ended without a result".to_string(),
        ))
    }

    /// Feed a provider stream through the decoder until it resolves.
    async fn drain(
        &self,
        job_id: &str,
        decoder: &mut StreamDecoder,
        stream: &mut WireEventStream,
        events: &mpsc::Sender<ProgressEvent>,
        token: &CancellationToken,
    ) -> Result<DecodedResult, ApiError> {
        while let Some(event) = stream.next().await {
            if let Some(result) = self.forward(job_id, decoder, event?, events, token).await? {
                return Ok(result);
            }
        }
        decoder.finish()?;
        Err(ApiError::Decode(
            "provider output ended without a result".to_string(),
        ))
    }

    async fn forward(
        &self,
        job_id: &str,
        decoder: &mut StreamDecoder,
        event: ProviderWireEvent,
        events: &mpsc::Sender<ProgressEvent>,
        token: &CancellationToken,
    ) -> Result<Option<DecodedResult>, ApiError> {
        match decoder.feed(event)? {
            DecodeStep::Chunk(text) => {
                self.ensure_active(job_id, token, "mid-stream")?;
                self.emit(job_id, events, ProgressEvent::TextChunk(text))
                    .await;
                Ok(None)
            }
            DecodeStep::Continue => Ok(None),
            DecodeStep::Resolved(result) => Ok(Some(result)),
        }
    }

    async fn enter_phase(&self, job_id: &str, events: &mpsc::Sender<ProgressEvent>, phase: Phase) {
        self.registry.set_phase(job_id, phase);
        self.emit(job_id, events, ProgressEvent::Phase(phase)).await;
    }

    fn ensure_active(
        &self,
        job_id: &str,
        token: &CancellationToken,
        stage: &str,
    ) -> Result<(), ApiError> {
        if token.is_cancelled() || self.registry.is_cancelled(job_id) {
            return Err(ApiError::Cancelled(stage.to_string()));
        }
        Ok(())
    }

    /// Send one event. A dropped receiver means the client went away, which cancels
    /// the job.
    async fn emit(&self, job_id: &str, events: &mpsc::Sender<ProgressEvent>, event: ProgressEvent) {
        if events.send(event).await.is_err() && self.registry.cancel(job_id) {
            info!(job_id, "Stream consumer disconnected, job cancelled");
        }
    }

    async fn fail(&self, job_id: &str, err: ApiError, events: &mpsc::Sender<ProgressEvent>) {
        if err.is_cancellation() || self.registry.is_cancelled(job_id) {
            self.registry.cancel(job_id);
            info!(job_id, reason = %err, "Job run stopped by cancellation");
            let _ = events.send(ProgressEvent::cancelled()).await;
            return;
        }

        let (message, code) = match &err {
            ApiError::Decode(detail) => {
                warn!(job_id, error = %detail, "Structured output decode failed");
                (err.to_string(), Some(ErrorCode::DecodeFailed))
            }
            err if err.is_retryable() => {
                error!(job_id, error = %err, "Provider unavailable after retries");
                (PROVIDER_UNAVAILABLE_MESSAGE.to_string(), None)
            }
            ApiError::Provider(provider_err) => {
                error!(job_id, error = %provider_err, "Provider call failed");
                (format!("Generation failed: {}", provider_err), None)
            }
            other => {
                error!(job_id, error = %other, "Job failed");
                ("Generation failed: internal error".to_string(), None)
            }
        };

        self.registry
            .update_status(job_id, JobState::Error, None, Some(message.clone()));
        let _ = events.send(ProgressEvent::failure(message, code)).await;
    }
}

/// The single event a finished job replays to a late stream request.
fn replay(job: Job) -> ProgressEvent {
    match job.state {
        JobState::Completed => ProgressEvent::Result(job.result.unwrap_or_default()),
        JobState::Cancelled => ProgressEvent::cancelled(),
        _ => ProgressEvent::failure(
            job.error
                .unwrap_or_else(|| "Generation failed".to_string()),
            None,
        ),
    }
}

/// Unregisters the run on every exit path, and marks a job that is somehow still
/// running as failed.
struct RunGuard<'a> {
    registry: &'a JobRegistry,
    job_id: &'a str,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let still_running = self
            .registry
            .get_job(self.job_id)
            .map(|job| job.state == JobState::Running)
            .unwrap_or(false);
        if still_running {
            warn!(job_id = self.job_id, "Run ended without a terminal state");
            self.registry.update_status(
                self.job_id,
                JobState::Error,
                None,
                Some("Generation interrupted".to_string()),
            );
        }
        self.registry.unregister_task(self.job_id);
    }
}

/// Progress events of one run, ending with its terminal event. Dropping it
/// interrupts the run.
pub struct ProgressStream {
    inner: ReceiverStream<ProgressEvent>,
    finished: bool,
    _disconnect: DropGuard,
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        let next = Pin::new(&mut self.inner).poll_next(cx);
        match &next {
            Poll::Ready(Some(event)) if event.is_terminal() => self.finished = true,
            Poll::Ready(None) => self.finished = true,
            _ => {}
        }
        next
    }
}
