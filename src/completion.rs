//! Per-request pipeline: map the model, translate, trace, gate, forward, translate back.

use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{Stream, StreamExt};

use crate::approval::{ApprovalGate, AutoApprove, PromptApproval};
use crate::backend::{Backend, BackendReply, ChunkStream, OpenAiBackend};
use crate::config::GatewayConfig;
use crate::error::Result;
use crate::mapping::ModelMapper;
use crate::rate_limit::RateLimiter;
use crate::trace::{TraceHandle, TraceOutcome, Tracer};
use crate::translate::anthropic_types::{MessagesRequest, MessagesResponse, StreamEvent};
use crate::translate::openai_types::ChatCompletionRequest;
use crate::translate::request::anthropic_to_openai;
use crate::translate::response::openai_to_anthropic;
use crate::translate::streaming::{translate_chunk, StreamState};

/// Anthropic SSE events, ready for the transport. Dropping it stops the backend read.
pub type EventStream = Pin<Box<dyn Stream<Item = SseEvent> + Send>>;

/// One SSE frame: `event:` tag and JSON `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

impl SseEvent {
    /// # Errors
    /// Returns `GatewayError::Json` if the event cannot be serialized.
    pub fn from_event(event: &StreamEvent) -> Result<Self> {
        Ok(Self {
            event: event.event_name().to_string(),
            data: serde_json::to_string(event)?,
        })
    }
}

pub enum CompletionOutcome {
    Message(MessagesResponse),
    Stream(EventStream),
}

impl std::fmt::Debug for CompletionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(resp) => f.debug_tuple("Message").field(resp).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

pub struct Gateway {
    mapper: ModelMapper,
    backend: Arc<dyn Backend>,
    approval: Arc<dyn ApprovalGate>,
    limiter: RateLimiter,
    tracer: Tracer,
}

impl Gateway {
    /// A gateway with auto-approval, no rate limit and tracing off.
    pub fn new(mapper: ModelMapper, backend: Arc<dyn Backend>) -> Self {
        Self {
            mapper,
            backend,
            approval: Arc::new(AutoApprove),
            limiter: RateLimiter::disabled(),
            tracer: Tracer::disabled(),
        }
    }

    /// Build the gateway described by `config`. Tracing is attached separately
    /// with [`Gateway::with_tracer`] since its writer needs a runtime.
    ///
    /// # Errors
    /// Returns `GatewayError::Config` if the backend key variable is unset.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let backend = OpenAiBackend::from_config(config)?;
        let mut gateway = Self::new(ModelMapper::new(config.models.clone()), Arc::new(backend))
            .with_rate_limiter(RateLimiter::new(
                config.rate_limit_interval(),
                config.rate_limit.wait,
            ));
        if config.manual_approval {
            gateway = gateway.with_approval(Arc::new(PromptApproval::stdio()));
        }
        Ok(gateway)
    }

    #[must_use]
    pub fn with_approval(mut self, approval: Arc<dyn ApprovalGate>) -> Self {
        self.approval = approval;
        self
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    #[must_use]
    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn mapper(&self) -> &ModelMapper {
        &self.mapper
    }

    /// Run one Messages request through the backend.
    ///
    /// A request that fails translation is rejected before the approval gate,
    /// the rate limiter or the backend see it.
    ///
    /// # Errors
    /// `Validation` for a malformed request, `ApprovalRejected`, `RateLimited`,
    /// `Backend`/`Http` from the backend call, and `Translation` when a complete
    /// response cannot be mapped back.
    pub async fn complete(&self, req: MessagesRequest) -> Result<CompletionOutcome> {
        let (target_model, mapped) = self.mapper.lookup(&req.model);
        let upstream = anthropic_to_openai(&req, &target_model)?;

        tracing::info!(
            model = %req.model,
            target = %target_model,
            mapped,
            streaming = upstream.is_streaming(),
            messages = req.messages.len(),
            "Request"
        );

        let mut trace = self.tracer.start(&req, &upstream);

        let reply = match self.forward(&req, &upstream).await {
            Ok(reply) => reply,
            Err(e) => {
                trace.finish(TraceOutcome::Failed {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        match reply {
            BackendReply::Complete(resp) => match openai_to_anthropic(&resp, &req.model) {
                Ok(message) => {
                    tracing::info!(
                        input_tokens = message.usage.input_tokens,
                        output_tokens = message.usage.output_tokens,
                        "Completed"
                    );
                    trace.record_response(&message);
                    trace.finish(TraceOutcome::Completed);
                    Ok(CompletionOutcome::Message(message))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to translate backend response");
                    trace.finish(TraceOutcome::Failed {
                        message: e.to_string(),
                    });
                    Err(e)
                }
            },
            BackendReply::Stream(chunks) => Ok(CompletionOutcome::Stream(event_stream(
                chunks,
                req.model,
                trace,
            ))),
        }
    }

    /// Rough prompt size: length of the translated request over four, rounded up.
    ///
    /// # Errors
    /// Returns `GatewayError::Json` if the request cannot be serialized.
    pub fn count_tokens(&self, mut req: MessagesRequest) -> Result<u64> {
        // The count endpoint does not require max_tokens.
        req.max_tokens.get_or_insert(1);
        let (target_model, _) = self.mapper.lookup(&req.model);
        let upstream = anthropic_to_openai(&req, &target_model)?;
        let len = serde_json::to_string(&upstream)?.len() as u64;
        Ok(len.div_ceil(4))
    }

    async fn forward(
        &self,
        req: &MessagesRequest,
        upstream: &ChatCompletionRequest,
    ) -> Result<BackendReply> {
        let summary = format!(
            "model={} messages={} stream={}",
            upstream.model,
            req.messages.len(),
            upstream.is_streaming()
        );
        self.approval.await_approval(&summary).await?;
        self.limiter.check().await?;
        self.backend.send(upstream).await
    }
}

fn event_stream(mut chunks: ChunkStream, model: String, mut trace: TraceHandle) -> EventStream {
    let events = async_stream::stream! {
        let mut state = StreamState::new(&model);
        let mut failure: Option<String> = None;

        while let Some(item) = chunks.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    failure = Some(e.to_string());
                    break;
                }
            };

            let mut buffered = Vec::new();
            let result = translate_chunk(&chunk, &mut state, &mut buffered);
            trace.record_chunk(&chunk, &buffered);

            for event in &buffered {
                match SseEvent::from_event(event) {
                    Ok(sse) => {
                        yield sse;
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to serialize stream event"),
                }
            }

            if let Err(e) = result {
                failure = Some(e.to_string());
                break;
            }
            if state.is_finished() {
                break;
            }
        }

        let tail = match failure {
            Some(ref message) => {
                tracing::error!(error = %message, "Stream failed");
                state.fail(message)
            }
            None => state.finish(),
        };
        trace.record_tail(&tail);
        for event in &tail {
            match SseEvent::from_event(event) {
                Ok(sse) => {
                    yield sse;
                }
                Err(e) => tracing::warn!(error = %e, "Failed to serialize stream event"),
            }
        }

        tracing::info!(trace_id = %trace.trace_id(), "Stream completed");
        trace.finish(match failure {
            Some(message) => TraceOutcome::Failed { message },
            None => TraceOutcome::Completed,
        });
    };

    Box::pin(events)
}
