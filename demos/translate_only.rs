//! Run the translation layer on canned data, without a server or backend.
//!
//! Usage:
//!   `cargo run --example translate_only`

use messages_gateway::translate::anthropic_types::MessagesRequest;
use messages_gateway::translate::openai_types::{ChatCompletionChunk, ChatCompletionResponse};
use messages_gateway::translate::request::anthropic_to_openai;
use messages_gateway::translate::response::openai_to_anthropic;
use messages_gateway::translate::streaming::{translate_chunk, StreamState};

fn main() -> anyhow::Result<()> {
    let request: MessagesRequest = serde_json::from_value(serde_json::json!({
        "model": "claude-sonnet-4",
        "max_tokens": 1024,
        "system": "You are a geography expert. Be concise.",
        "stream": true,
        "messages": [
            {"role": "user", "content": "What is the capital of France?"},
            {"role": "assistant", "content": [
                {"type": "text", "text": "Let me look that up."},
                {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"country": "France"}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "Paris"},
                {"type": "text", "text": "And Germany?"}
            ]}
        ],
        "tools": [{
            "name": "lookup",
            "description": "Look up a capital city",
            "input_schema": {"type": "object", "properties": {"country": {"type": "string"}}}
        }]
    }))?;

    let upstream = anthropic_to_openai(&request, "gpt-4o")?;
    println!("=== Upstream request ===");
    println!("{}", serde_json::to_string_pretty(&upstream)?);

    let response: ChatCompletionResponse = serde_json::from_value(serde_json::json!({
        "id": "chatcmpl-demo",
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "The capital of Germany is Berlin."},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 42, "completion_tokens": 8}
    }))?;

    println!();
    println!("=== Client response ===");
    println!(
        "{}",
        serde_json::to_string_pretty(&openai_to_anthropic(&response, &request.model)?)?
    );

    println!();
    println!("=== Stream events ===");
    let chunks = [
        serde_json::json!({"choices": [{"delta": {"role": "assistant"}}]}),
        serde_json::json!({"choices": [{"delta": {"content": "The capital"}}]}),
        serde_json::json!({"choices": [{"delta": {"content": " is Berlin."}}]}),
        serde_json::json!({"choices": [{"delta": {}, "finish_reason": "stop"}],
                           "usage": {"prompt_tokens": 42, "completion_tokens": 8}}),
    ];

    let mut state = StreamState::new(&request.model);
    for (i, value) in chunks.into_iter().enumerate() {
        let chunk: ChatCompletionChunk = serde_json::from_value(value)?;
        let mut events = Vec::new();
        translate_chunk(&chunk, &mut state, &mut events)?;
        for event in &events {
            println!("  chunk {i} -> {}", serde_json::to_string(event)?);
        }
    }
    for event in state.finish() {
        println!("  end -> {}", event.event_name());
    }

    Ok(())
}
