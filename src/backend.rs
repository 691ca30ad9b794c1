//! The single OpenAI-compatible backend call.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::{Stream, StreamExt};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::translate::anthropic_types::ErrorResponse;
use crate::translate::openai_types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatErrorResponse,
};
use crate::translate::response::openai_error_to_anthropic;

/// Lazily-pulled backend chunks. Ends at the `[DONE]` sentinel or when the body is exhausted.
/// A transport failure yields one `GatewayError::Http` item, a malformed frame or chunk one
/// `GatewayError::Translation` item, and the stream stops there.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk>> + Send>>;

pub enum BackendReply {
    Complete(ChatCompletionResponse),
    Stream(ChunkStream),
}

impl std::fmt::Debug for BackendReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(resp) => f.debug_tuple("Complete").field(resp).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Send one chat-completions request. Streaming requests yield
    /// [`BackendReply::Stream`], everything else [`BackendReply::Complete`].
    ///
    /// # Errors
    /// `GatewayError::Backend` for a non-2xx reply, `GatewayError::Http` for
    /// transport failures, `GatewayError::Translation` for an undecodable body.
    async fn send(&self, request: &ChatCompletionRequest) -> Result<BackendReply>;
}

#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl OpenAiBackend {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
        }
    }

    /// # Errors
    /// Returns `GatewayError::Config` if the API key variable is unset, or
    /// `GatewayError::Http` if the client cannot be built.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.backend.timeout_secs))
            .build()?;
        Ok(Self::new(
            client,
            &config.backend.base_url,
            config.resolve_api_key()?,
        ))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn send(&self, request: &ChatCompletionRequest) -> Result<BackendReply> {
        let streaming = request.is_streaming();
        tracing::info!(url = %self.url, model = %request.model, streaming, "Forwarding to backend");

        let mut builder = self.client.post(&self.url).json(request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %truncate(&body, 300), "Backend error");
            return Err(GatewayError::Backend {
                status: status.as_u16(),
                error: backend_error(status.as_u16(), &body),
            });
        }

        if streaming {
            return Ok(BackendReply::Stream(chunk_stream(response)));
        }

        let body = response.text().await?;
        let parsed = serde_json::from_str::<ChatCompletionResponse>(&body).map_err(|e| {
            GatewayError::translation(format!(
                "Failed to parse backend response: {}. Body: {}",
                e,
                truncate(&body, 300)
            ))
        })?;
        Ok(BackendReply::Complete(parsed))
    }
}

fn backend_error(status: u16, body: &str) -> ErrorResponse {
    match serde_json::from_str::<ChatErrorResponse>(body) {
        Ok(err) => openai_error_to_anthropic(&err),
        Err(_) => ErrorResponse::api_error(format!(
            "Backend returned status {}: {}",
            status,
            truncate(body, 500)
        )),
    }
}

fn chunk_stream(response: reqwest::Response) -> ChunkStream {
    let events = response.bytes_stream().eventsource();

    let chunks = async_stream::stream! {
        futures::pin_mut!(events);

        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "Backend stream failed");
                    yield Err(stream_error(e));
                    break;
                }
            };

            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                break;
            }

            match serde_json::from_str::<ChatCompletionChunk>(data) {
                Ok(chunk) => yield Ok(chunk),
                Err(e) => {
                    yield Err(GatewayError::translation(format!(
                        "Unexpected chunk from backend: {}. Data: {}",
                        e,
                        truncate(data, 300)
                    )));
                    break;
                }
            }
        }
    };

    Box::pin(chunks)
}

fn stream_error(err: EventStreamError<reqwest::Error>) -> GatewayError {
    match err {
        EventStreamError::Transport(e) => GatewayError::Http(e),
        other => GatewayError::translation(format!("Malformed event stream from backend: {other}")),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_uses_openai_envelope() {
        let err = backend_error(
            429,
            r#"{"error":{"message":"Too many requests","type":"rate_limit_exceeded"}}"#,
        );
        assert_eq!(err.error.error_type, "rate_limit_error");
        assert_eq!(err.error.message, "Too many requests");
    }

    #[test]
    fn test_backend_error_with_plain_body() {
        let err = backend_error(503, "upstream unavailable");
        assert_eq!(err.error.error_type, "api_error");
        assert!(err.error.message.contains("503"));
        assert!(err.error.message.contains("upstream unavailable"));
    }

    #[test]
    fn test_malformed_event_stream_is_translation_error() {
        let utf8 = String::from_utf8(vec![0xff]).unwrap_err();
        let err = stream_error(EventStreamError::Utf8(utf8));
        assert!(matches!(err, GatewayError::Translation { .. }));
    }

    #[tokio::test]
    async fn test_transport_failure_is_http_error() {
        // Nothing listens on port 9 of the loopback interface.
        let transport = reqwest::Client::new()
            .get("http://127.0.0.1:9/")
            .send()
            .await
            .unwrap_err();
        let err = stream_error(EventStreamError::Transport(transport));
        assert!(matches!(err, GatewayError::Http(_)));
        assert_eq!(err.to_wire().0, axum::http::StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn test_url_joins_base() {
        let backend = OpenAiBackend::new(reqwest::Client::new(), "http://localhost:8000/v1/", None);
        assert_eq!(backend.url(), "http://localhost:8000/v1/chat/completions");
    }
}
