//! Request/response tracing to disk.
//!
//! Each request produces a `request` entry when it is accepted and an `exchange`
//! entry once it completes, written as JSON lines by a background task. The
//! request path only ever pushes onto an unbounded channel; a tracing failure
//! is logged and otherwise ignored.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use crate::error::Result;
use crate::translate::anthropic_types::{MessagesRequest, MessagesResponse, StreamEvent};
use crate::translate::openai_types::{ChatCompletionChunk, ChatCompletionRequest};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEntry {
    Request {
        trace_id: String,
        timestamp: DateTime<Utc>,
        request: MessagesRequest,
        upstream: ChatCompletionRequest,
    },
    Exchange {
        trace_id: String,
        timestamp: DateTime<Utc>,
        duration_ms: u64,
        outcome: TraceOutcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<MessagesResponse>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        chunks: Vec<ChunkTrace>,
    },
}

/// One backend chunk and the events it was translated into. The closing events
/// emitted at the end of a stream carry no chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkTrace {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<ChatCompletionChunk>,
    pub events: Vec<StreamEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TraceOutcome {
    Completed,
    Failed { message: String },
    /// The handle was dropped before the exchange finished (client went away).
    Aborted,
}

#[derive(Debug, Clone, Default)]
pub struct Tracer {
    tx: Option<UnboundedSender<TraceEntry>>,
}

impl Tracer {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Open a new trace file under `dir` and start its writer task.
    ///
    /// The writer exits once the tracer and every outstanding handle are dropped.
    ///
    /// # Errors
    /// Returns `GatewayError::Io` if the directory or file cannot be created.
    pub fn spawn(dir: &Path) -> Result<(Self, PathBuf, JoinHandle<()>)> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("trace-{}.jsonl", Utc::now().format("%Y%m%d-%H%M%S")));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(write_entries(tokio::fs::File::from_std(file), rx));

        tracing::info!(path = %path.display(), "Tracing requests");
        Ok((Self { tx: Some(tx) }, path, worker))
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn start(
        &self,
        request: &MessagesRequest,
        upstream: &ChatCompletionRequest,
    ) -> TraceHandle {
        let trace_id = uuid::Uuid::new_v4().to_string();

        if let Some(ref tx) = self.tx {
            let entry = TraceEntry::Request {
                trace_id: trace_id.clone(),
                timestamp: Utc::now(),
                request: request.clone(),
                upstream: upstream.clone(),
            };
            if tx.send(entry).is_err() {
                tracing::debug!("Trace writer has stopped");
            }
        }

        TraceHandle {
            tx: self.tx.clone(),
            trace_id,
            started: Instant::now(),
            chunks: Vec::new(),
            response: None,
        }
    }
}

/// Accumulates one exchange. Flushed once, by [`TraceHandle::finish`] or on drop.
#[derive(Debug)]
pub struct TraceHandle {
    tx: Option<UnboundedSender<TraceEntry>>,
    trace_id: String,
    started: Instant,
    chunks: Vec<ChunkTrace>,
    response: Option<MessagesResponse>,
}

impl TraceHandle {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn record_chunk(&mut self, chunk: &ChatCompletionChunk, events: &[StreamEvent]) {
        if self.tx.is_some() {
            self.chunks.push(ChunkTrace {
                chunk: Some(chunk.clone()),
                events: events.to_vec(),
            });
        }
    }

    /// Record events produced after the last chunk (stream close or failure).
    pub fn record_tail(&mut self, events: &[StreamEvent]) {
        if self.tx.is_some() && !events.is_empty() {
            self.chunks.push(ChunkTrace {
                chunk: None,
                events: events.to_vec(),
            });
        }
    }

    pub fn record_response(&mut self, response: &MessagesResponse) {
        if self.tx.is_some() {
            self.response = Some(response.clone());
        }
    }

    pub fn finish(mut self, outcome: TraceOutcome) {
        self.flush(outcome);
    }

    fn flush(&mut self, outcome: TraceOutcome) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        let entry = TraceEntry::Exchange {
            trace_id: self.trace_id.clone(),
            timestamp: Utc::now(),
            duration_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            outcome,
            response: self.response.take(),
            chunks: std::mem::take(&mut self.chunks),
        };
        if tx.send(entry).is_err() {
            tracing::debug!(trace_id = %self.trace_id, "Trace writer has stopped");
        }
    }
}

impl Drop for TraceHandle {
    fn drop(&mut self) {
        self.flush(TraceOutcome::Aborted);
    }
}

async fn write_entries(file: tokio::fs::File, rx: mpsc::UnboundedReceiver<TraceEntry>) {
    let mut writer = BufWriter::new(file);
    let mut entries = UnboundedReceiverStream::new(rx);

    while let Some(entry) = entries.next().await {
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize trace entry");
                continue;
            }
        };
        if let Err(e) = write_line(&mut writer, &line).await {
            tracing::warn!(error = %e, "Failed to write trace entry");
        }
    }
}

async fn write_line(writer: &mut BufWriter<tokio::fs::File>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::{Message, MessageContent, Role};
    use crate::translate::request::anthropic_to_openai;

    fn request() -> MessagesRequest {
        serde_json::from_value(serde_json::json!({
            "model": "claude-sonnet-4",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap()
    }

    fn read_entries(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_disabled_tracer_is_inert() {
        let tracer = Tracer::disabled();
        let req = request();
        let upstream = anthropic_to_openai(&req, "gpt-4o").unwrap();

        let mut handle = tracer.start(&req, &upstream);
        handle.record_chunk(&ChatCompletionChunk::default(), &[StreamEvent::MessageStop]);
        assert!(handle.chunks.is_empty());
        handle.finish(TraceOutcome::Completed);
        assert!(!tracer.is_enabled());
    }

    #[tokio::test]
    async fn test_request_and_exchange_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let (tracer, path, worker) = Tracer::spawn(dir.path()).unwrap();

        let mut req = request();
        req.messages.push(Message {
            role: Role::Assistant,
            content: MessageContent::Text("hello".into()),
        });
        let upstream = anthropic_to_openai(&req, "gpt-4o").unwrap();

        let mut handle = tracer.start(&req, &upstream);
        let trace_id = handle.trace_id().to_string();
        handle.record_chunk(&ChatCompletionChunk::default(), &[]);
        handle.record_tail(&[StreamEvent::MessageStop]);
        handle.record_tail(&[]);
        handle.finish(TraceOutcome::Completed);

        drop(tracer);
        worker.await.unwrap();

        let entries = read_entries(&path);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["kind"], "request");
        assert_eq!(entries[0]["trace_id"], trace_id.as_str());
        assert_eq!(entries[0]["upstream"]["model"], "gpt-4o");
        assert_eq!(entries[1]["kind"], "exchange");
        assert_eq!(entries[1]["outcome"]["status"], "completed");
        let chunks = entries[1]["chunks"].as_array().unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].get("chunk").is_some());
        assert!(chunks[1].get("chunk").is_none());
        assert_eq!(chunks[1]["events"][0]["type"], "message_stop");
    }

    #[tokio::test]
    async fn test_dropped_handle_is_flushed_as_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let (tracer, path, worker) = Tracer::spawn(dir.path()).unwrap();

        let req = request();
        let upstream = anthropic_to_openai(&req, "gpt-4o").unwrap();
        drop(tracer.start(&req, &upstream));

        drop(tracer);
        worker.await.unwrap();

        let entries = read_entries(&path);
        assert_eq!(entries[1]["outcome"]["status"], "aborted");
    }
}
