//! State machine for translating OpenAI streaming chunks into Anthropic SSE events.
//!
//! [`translate_chunk`] processes OpenAI `ChatCompletionChunk`s one at a time against a
//! [`StreamState`] owned by the request, tracking which content block is open and which
//! Anthropic block each backend tool-call slot maps to, and emits the corresponding
//! Anthropic stream events (`message_start`, `content_block_delta`, etc.).
//!
//! Usage:
//!   let mut state = StreamState::new("claude-sonnet-4");
//!   let mut events = Vec::new();
//!   for chunk in openai_chunks {
//!       translate_chunk(&chunk, &mut state, &mut events)?;
//!       // send each event as SSE, then clear the buffer
//!       if state.is_finished() { break; }
//!   }
//!   let final_events = state.finish();

use std::collections::HashMap;

use super::anthropic_types::{
    Delta, DeltaUsage, ErrorBody, MessageDeltaBody, MessagesResponse, ResponseContentBlock,
    StopReason, StreamEvent, Usage,
};
use super::openai_types::{ChatCompletionChunk, ChunkToolCall};
use super::response::{map_finish_reason, usage_from};
use crate::error::{GatewayError, Result};

/// Kind of the content block currently open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBlock {
    Text,
    ToolUse { slot: u64 },
}

/// A backend tool-call slot and the Anthropic block it streams into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallSlot {
    pub content_block_index: usize,
    pub id: String,
    pub name: String,
    pub name_sent: bool,
}

/// Per-stream translation state. Created fresh for every streamed response.
#[derive(Debug)]
pub struct StreamState {
    model: String,
    message_id: String,
    message_started: bool,
    /// `None` until the first content block opens.
    current_block_index: Option<usize>,
    open_block: Option<OpenBlock>,
    tool_calls: HashMap<u64, ToolCallSlot>,
    usage: Usage,
    usage_seen: bool,
    /// Stop reason received before any usage; the terminal events wait for the
    /// trailing usage chunk or the end of the stream.
    pending_stop: Option<StopReason>,
    finished: bool,
}

impl StreamState {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            message_started: false,
            current_block_index: None,
            open_block: None,
            tool_calls: HashMap::new(),
            usage: Usage::default(),
            usage_seen: false,
            pending_stop: None,
            finished: false,
        }
    }

    pub fn message_started(&self) -> bool {
        self.message_started
    }

    pub fn current_block_index(&self) -> Option<usize> {
        self.current_block_index
    }

    pub fn open_block(&self) -> Option<OpenBlock> {
        self.open_block
    }

    pub fn tool_call(&self, slot: u64) -> Option<&ToolCallSlot> {
        self.tool_calls.get(&slot)
    }

    /// True once `message_stop` has been emitted.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// True between a `finish_reason` and the usage totals that follow it.
    pub fn is_awaiting_usage(&self) -> bool {
        self.pending_stop.is_some() && !self.finished
    }

    /// Close out a stream at the sentinel or on exhaustion. Uses the held stop
    /// reason if a `finish_reason` already arrived, `end_turn` otherwise.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut events = Vec::new();
        self.ensure_started(&mut events);
        let stop_reason = self.pending_stop.unwrap_or(StopReason::EndTurn);
        self.terminate(stop_reason, &mut events);
        events
    }

    /// Close out a stream after a mid-stream failure, surfacing `message` to the client.
    ///
    /// A failure while only the usage totals are outstanding ends the message
    /// normally with the held stop reason.
    pub fn fail(&mut self, message: &str) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        if self.pending_stop.is_some() {
            tracing::warn!(error = message, "Stream ended before usage totals arrived");
            return self.finish();
        }
        let mut events = Vec::new();
        self.ensure_started(&mut events);
        self.close_open_block(&mut events);
        events.push(StreamEvent::Error {
            error: ErrorBody::new("api_error", message),
        });
        self.terminate(StopReason::Error, &mut events);
        events
    }

    fn ensure_started(&mut self, events: &mut Vec<StreamEvent>) {
        if self.message_started {
            return;
        }
        self.message_started = true;
        events.push(StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.message_id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage {
                    output_tokens: 0,
                    ..self.usage
                },
            },
        });
    }

    fn close_open_block(&mut self, events: &mut Vec<StreamEvent>) {
        if self.open_block.take().is_some() {
            if let Some(index) = self.current_block_index {
                events.push(StreamEvent::ContentBlockStop { index });
            }
        }
    }

    fn open_new_block(
        &mut self,
        kind: OpenBlock,
        content_block: ResponseContentBlock,
        events: &mut Vec<StreamEvent>,
    ) -> usize {
        self.close_open_block(events);
        let index = self.current_block_index.map_or(0, |i| i + 1);
        self.current_block_index = Some(index);
        self.open_block = Some(kind);
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block,
        });
        index
    }

    fn push_text(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        let index = match (self.open_block, self.current_block_index) {
            (Some(OpenBlock::Text), Some(index)) => index,
            _ => self.open_new_block(
                OpenBlock::Text,
                ResponseContentBlock::Text {
                    text: String::new(),
                },
                events,
            ),
        };
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::TextDelta {
                text: text.to_string(),
            },
        });
    }

    fn push_tool_call(&mut self, tc: &ChunkToolCall, events: &mut Vec<StreamEvent>) -> Result<()> {
        let function = tc.function.as_ref();

        let index = match self.tool_calls.get(&tc.index) {
            Some(slot) => {
                if self.open_block != Some(OpenBlock::ToolUse { slot: tc.index }) {
                    return Err(GatewayError::translation(format!(
                        "tool call {} resumed after its block was closed",
                        tc.index
                    )));
                }
                slot.content_block_index
            }
            None => {
                let name = function
                    .and_then(|f| f.name.clone())
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| {
                        GatewayError::translation(format!(
                            "tool call {} started without a function name",
                            tc.index
                        ))
                    })?;
                let id = tc
                    .id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4().simple()));

                let index = self.open_new_block(
                    OpenBlock::ToolUse { slot: tc.index },
                    ResponseContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: serde_json::Value::Object(serde_json::Map::new()),
                    },
                    events,
                );
                self.tool_calls.insert(
                    tc.index,
                    ToolCallSlot {
                        content_block_index: index,
                        id,
                        name,
                        name_sent: true,
                    },
                );
                index
            }
        };

        if let Some(args) = function.and_then(|f| f.arguments.as_deref()) {
            if !args.is_empty() {
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::InputJsonDelta {
                        partial_json: args.to_string(),
                    },
                });
            }
        }

        Ok(())
    }

    fn terminate(&mut self, stop_reason: StopReason, events: &mut Vec<StreamEvent>) {
        self.close_open_block(events);
        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                input_tokens: (self.usage.input_tokens > 0).then_some(self.usage.input_tokens),
                output_tokens: self.usage.output_tokens,
                cache_read_input_tokens: self.usage.cache_read_input_tokens,
            },
        });
        events.push(StreamEvent::MessageStop);
        self.finished = true;
    }
}

/// Process a single OpenAI streaming chunk, appending zero or more Anthropic SSE events
/// to `events`.
///
/// Heartbeat, role-only and usage-only chunks produce no events. A `finish_reason`
/// closes the open block; `message_delta` and `message_stop` follow at once when
/// usage is already known, otherwise on the next chunk (folding in its usage) or at
/// [`StreamState::finish`]. Once the state is terminal every further call yields nothing.
///
/// # Errors
/// Returns `GatewayError::Translation` when a chunk cannot be mapped onto the open
/// block structure (a new tool call without a name, or fragments for a closed one).
/// Events pushed before the failure stay in `events` and match the state; callers
/// forward them and end the stream with [`StreamState::fail`].
pub fn translate_chunk(
    chunk: &ChatCompletionChunk,
    state: &mut StreamState,
    events: &mut Vec<StreamEvent>,
) -> Result<()> {
    if state.finished {
        return Ok(());
    }

    if let Some(usage) = chunk.usage {
        state.usage = usage_from(usage);
        state.usage_seen = true;
    }

    if let Some(stop_reason) = state.pending_stop {
        state.terminate(stop_reason, events);
        return Ok(());
    }

    let Some(choice) = chunk.choices.first() else {
        return Ok(());
    };

    let text = choice.delta.content.as_deref().filter(|s| !s.is_empty());
    let tool_calls = choice.delta.tool_calls.as_deref().unwrap_or_default();

    if text.is_none() && tool_calls.is_empty() && choice.finish_reason.is_none() {
        return Ok(());
    }

    state.ensure_started(events);

    if let Some(text) = text {
        state.push_text(text, events);
    }

    for tc in tool_calls {
        state.push_tool_call(tc, events)?;
    }

    if let Some(ref reason) = choice.finish_reason {
        let stop_reason = map_finish_reason(reason);
        if state.usage_seen {
            state.terminate(stop_reason, events);
        } else {
            state.close_open_block(events);
            state.pending_stop = Some(stop_reason);
        }
    }

    Ok(())
}
