use super::anthropic_types::{
    ErrorResponse, MessagesResponse, ResponseContentBlock, StopReason, Usage,
};
use super::openai_types::{ChatCompletionResponse, ChatErrorResponse, ChatUsage};
use crate::error::{GatewayError, Result};

/// Translate an OpenAI Chat Completion response into an Anthropic Messages response.
/// Pure function: `original_model` is what the client originally requested.
///
/// # Errors
/// Returns `GatewayError::Translation` when the response has no choices or a
/// tool call carries arguments that are not valid JSON.
pub fn openai_to_anthropic(
    resp: &ChatCompletionResponse,
    original_model: &str,
) -> Result<MessagesResponse> {
    let choice = resp
        .choices
        .first()
        .ok_or_else(|| GatewayError::translation("backend response contained no choices"))?;

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(ref text) = choice.message.content {
        if !text.is_empty() {
            content.push(ResponseContentBlock::Text { text: text.clone() });
        }
    }

    for tc in choice.message.tool_calls.iter().flatten() {
        content.push(ResponseContentBlock::ToolUse {
            id: tc.id.clone(),
            name: tc.function.name.clone(),
            input: parse_tool_arguments(&tc.function.name, &tc.function.arguments)?,
        });
    }

    let stop_reason = choice
        .finish_reason
        .as_deref()
        .map_or(StopReason::EndTurn, map_finish_reason);

    Ok(MessagesResponse {
        id: message_id(&resp.id),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: original_model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage: resp.usage.map(usage_from).unwrap_or_default(),
    })
}

fn parse_tool_arguments(name: &str, arguments: &str) -> Result<serde_json::Value> {
    if arguments.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(arguments).map_err(|e| {
        GatewayError::translation(format!(
            "tool call '{name}' has malformed arguments: {e}"
        ))
    })
}

/// Use the backend response ID, prefixed to look like an Anthropic ID
fn message_id(backend_id: &str) -> String {
    let trimmed = backend_id.trim_start_matches("chatcmpl-");
    if trimmed.is_empty() {
        format!("msg_{}", uuid::Uuid::new_v4().simple())
    } else {
        format!("msg_{trimmed}")
    }
}

/// Cached prompt tokens are reported as `cache_read_input_tokens` and excluded
/// from `input_tokens`.
pub(crate) fn usage_from(usage: ChatUsage) -> Usage {
    let cached = usage.prompt_tokens_details.map(|d| d.cached_tokens);
    Usage {
        input_tokens: usage
            .prompt_tokens
            .saturating_sub(cached.unwrap_or_default()),
        output_tokens: usage.completion_tokens,
        cache_read_input_tokens: cached,
    }
}

/// Map OpenAI `finish_reason` to Anthropic `stop_reason`.
///
/// Unknown reasons fall back to `end_turn`.
pub fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "stop" => StopReason::EndTurn,
        "length" => StopReason::MaxTokens,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        "content_filter" => StopReason::StopSequence,
        other => {
            tracing::warn!(finish_reason = other, "Unrecognized finish_reason, using end_turn");
            StopReason::EndTurn
        }
    }
}

/// Translate an OpenAI error into an Anthropic error response
pub fn openai_error_to_anthropic(err: &ChatErrorResponse) -> ErrorResponse {
    let error_type = match err.error.error_type.as_str() {
        "invalid_request_error" => "invalid_request_error",
        "authentication_error" | "invalid_api_key" => "authentication_error",
        "permission_error" => "permission_error",
        "not_found_error" => "not_found_error",
        "rate_limit_error" | "rate_limit_exceeded" | "insufficient_quota" => "rate_limit_error",
        _ => "api_error",
    };

    ErrorResponse::new(error_type, &err.error.message)
}
