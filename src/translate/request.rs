//! Translate Anthropic Messages API requests into `OpenAI` Chat Completions requests.
//!
//! Handles system messages, multi-part content (text, images), tool use, tool results,
//! and tool choice mapping. A single Anthropic message can expand into multiple `OpenAI`
//! messages (e.g. a user message with `tool_result` blocks becomes separate `tool`-role messages).

use super::anthropic_types::{
    ContentBlock, ImageSource, Message, MessagesRequest, Role, ToolChoice, ToolResultContent,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatFunctionName, ChatMessage, ChatRole,
    ChatTool, ChatToolCall, ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction,
    ContentPart, ImageUrlDetail, StreamOptions,
};
use crate::error::{GatewayError, Result};

/// Translate an Anthropic Messages API request into an `OpenAI` Chat Completions request.
///
/// `target_model` is the backend model name, already resolved through the model mapping.
///
/// # Errors
/// Returns `GatewayError::Validation` if `max_tokens` is missing, and
/// `GatewayError::Json` if a `tool_use` input cannot be serialized.
pub fn anthropic_to_openai(
    req: &MessagesRequest,
    target_model: &str,
) -> Result<ChatCompletionRequest> {
    let max_tokens = req
        .max_tokens
        .ok_or_else(|| GatewayError::validation("max_tokens: field required"))?;

    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(ref system) = req.system {
        messages.push(ChatMessage::text(ChatRole::System, system.as_text()));
    }

    for msg in &req.messages {
        messages.extend(translate_message(msg)?);
    }

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| ChatTool {
                tool_type: "function".to_string(),
                function: ChatFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect()
    });

    let tool_choice = req.tool_choice.as_ref().map(translate_tool_choice);

    let stream_options = req.stream.filter(|s| *s).map(|_| StreamOptions {
        include_usage: true,
    });

    let user = req.metadata.as_ref().and_then(|m| m.user_id.clone());

    Ok(ChatCompletionRequest {
        model: target_model.to_string(),
        messages,
        max_tokens: Some(max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        stream_options,
        tools,
        tool_choice,
        stop: req.stop_sequences.clone(),
        user,
    })
}

/// A single Anthropic message can expand to multiple `OpenAI` messages
/// (e.g. a user message with `tool_results` becomes separate tool-role messages).
fn translate_message(msg: &Message) -> Result<Vec<ChatMessage>> {
    let blocks = msg.content.blocks();

    match msg.role {
        Role::User => Ok(translate_user_message(&blocks)),
        Role::Assistant => translate_assistant_message(&blocks).map(|m| vec![m]),
    }
}

fn translate_user_message(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut content_parts: Vec<ContentPart> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                content_parts.push(ContentPart::Text { text: text.clone() });
            }
            ContentBlock::Image { source } => {
                content_parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrlDetail {
                        url: image_url(source),
                    },
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                // Text preceding a tool result keeps its position
                if !content_parts.is_empty() {
                    messages.push(user_message(&content_parts));
                    content_parts.clear();
                }

                messages.push(ChatMessage {
                    role: ChatRole::Tool,
                    content: Some(ChatContent::Text(tool_result_to_string(
                        content.as_ref(),
                        *is_error,
                    ))),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                });
            }
            ContentBlock::Thinking { .. } | ContentBlock::ToolUse { .. } | ContentBlock::Unknown => {}
        }
    }

    if !content_parts.is_empty() {
        messages.push(user_message(&content_parts));
    }

    if messages.is_empty() {
        messages.push(ChatMessage::text(ChatRole::User, String::new()));
    }

    messages
}

fn translate_assistant_message(blocks: &[ContentBlock]) -> Result<ChatMessage> {
    let mut text = String::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        arguments: serde_json::to_string(input)?,
                    },
                });
            }
            ContentBlock::Thinking { .. }
            | ContentBlock::Unknown
            | ContentBlock::Image { .. }
            | ContentBlock::ToolResult { .. } => {}
        }
    }

    let content = if text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(ChatContent::Text(text))
    };

    Ok(ChatMessage {
        role: ChatRole::Assistant,
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    })
}

fn image_url(source: &ImageSource) -> String {
    match source {
        ImageSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
        ImageSource::Url { url } => url.clone(),
    }
}

/// Text-only content collapses to a plain string; anything with an image stays multi-part.
fn user_message(parts: &[ContentPart]) -> ChatMessage {
    let text_only: Option<String> = parts
        .iter()
        .map(|p| match p {
            ContentPart::Text { text } => Some(text.as_str()),
            ContentPart::ImageUrl { .. } => None,
        })
        .collect();

    let content = match text_only {
        Some(text) => ChatContent::Text(text),
        None => ChatContent::Parts(parts.to_vec()),
    };

    ChatMessage {
        role: ChatRole::User,
        content: Some(content),
        tool_calls: None,
        tool_call_id: None,
    }
}

fn tool_result_to_string(content: Option<&ToolResultContent>, is_error: Option<bool>) -> String {
    let prefix = if is_error == Some(true) { "ERROR: " } else { "" };

    match content {
        Some(ToolResultContent::Text(t)) => format!("{prefix}{t}"),
        Some(ToolResultContent::Blocks(blocks)) => {
            let text = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("{prefix}{text}")
        }
        None => format!("{prefix}(no content)"),
    }
}

fn translate_tool_choice(tc: &ToolChoice) -> ChatToolChoice {
    match tc {
        ToolChoice::Auto => ChatToolChoice::Mode("auto".to_string()),
        ToolChoice::Any => ChatToolChoice::Mode("required".to_string()),
        ToolChoice::None => ChatToolChoice::Mode("none".to_string()),
        ToolChoice::Tool { name } => ChatToolChoice::Function(ChatToolChoiceFunction {
            choice_type: "function".to_string(),
            function: ChatFunctionName { name: name.clone() },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::*;
    use serde_json::json;

    fn request(messages: Vec<Message>) -> MessagesRequest {
        MessagesRequest {
            model: "claude-sonnet-4".to_string(),
            max_tokens: Some(1024),
            messages,
            system: None,
            stream: None,
            temperature: None,
            top_p: None,
            top_k: None,
            tools: None,
            tool_choice: None,
            metadata: None,
            stop_sequences: None,
            extra: Default::default(),
        }
    }

    fn user(blocks: Vec<ContentBlock>) -> Message {
        Message {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    #[test]
    fn test_simple_text_request() {
        let mut req = request(vec![Message {
            role: Role::User,
            content: MessageContent::Text("Hello".to_string()),
        }]);
        req.system = Some(SystemContent::Blocks(vec![
            SystemBlock::Text { text: "You are ".into() },
            SystemBlock::Text { text: "helpful".into() },
        ]));
        req.temperature = Some(0.2);

        let result = anthropic_to_openai(&req, "gpt-4o").unwrap();

        assert_eq!(result.model, "gpt-4o");
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].role, ChatRole::System);
        assert_eq!(
            result.messages[0].content,
            Some(ChatContent::Text("You are helpful".into()))
        );
        assert_eq!(result.messages[1].role, ChatRole::User);
        assert_eq!(
            result.messages[1].content,
            Some(ChatContent::Text("Hello".into()))
        );
        assert_eq!(result.max_tokens, Some(1024));
        assert_eq!(result.temperature, Some(0.2));
        assert!(result.stream_options.is_none());
    }

    #[test]
    fn test_missing_max_tokens_is_validation_error() {
        let mut req = request(vec![]);
        req.max_tokens = None;

        let err = anthropic_to_openai(&req, "m").unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
    }

    #[test]
    fn test_tool_result_splits_into_tool_messages() {
        let req = request(vec![user(vec![
            ContentBlock::Text {
                text: "Here you go".to_string(),
            },
            ContentBlock::ToolResult {
                tool_use_id: "toolu_1".to_string(),
                content: Some(ToolResultContent::Text("result 1".to_string())),
                is_error: None,
            },
            ContentBlock::ToolResult {
                tool_use_id: "toolu_2".to_string(),
                content: Some(ToolResultContent::Text("boom".to_string())),
                is_error: Some(true),
            },
            ContentBlock::Text {
                text: "Now continue".to_string(),
            },
        ])]);

        let result = anthropic_to_openai(&req, "m").unwrap();
        let roles: Vec<ChatRole> = result.messages.iter().map(|m| m.role).collect();

        assert_eq!(
            roles,
            vec![ChatRole::User, ChatRole::Tool, ChatRole::Tool, ChatRole::User]
        );
        assert_eq!(result.messages[1].tool_call_id.as_deref(), Some("toolu_1"));
        assert_eq!(result.messages[2].tool_call_id.as_deref(), Some("toolu_2"));
        assert_eq!(
            result.messages[2].content,
            Some(ChatContent::Text("ERROR: boom".into()))
        );
    }

    #[test]
    fn test_tool_use_becomes_assistant_tool_calls() {
        let req = request(vec![Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![
                ContentBlock::Text {
                    text: "Checking.".into(),
                },
                ContentBlock::ToolUse {
                    id: "toolu_9".into(),
                    name: "get_weather".into(),
                    input: json!({"city": "NYC"}),
                },
            ]),
        }]);

        let result = anthropic_to_openai(&req, "m").unwrap();
        assert_eq!(result.messages.len(), 1);

        let msg = &result.messages[0];
        assert_eq!(msg.role, ChatRole::Assistant);
        assert_eq!(msg.content, Some(ChatContent::Text("Checking.".into())));

        let calls = msg.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "toolu_9");
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&calls[0].function.arguments).unwrap(),
            json!({"city": "NYC"})
        );
    }

    #[test]
    fn test_image_keeps_multipart_content() {
        let req = request(vec![user(vec![
            ContentBlock::Text {
                text: "What is this?".into(),
            },
            ContentBlock::Image {
                source: ImageSource::Base64 {
                    media_type: "image/png".into(),
                    data: "AAAA".into(),
                },
            },
        ])]);

        let result = anthropic_to_openai(&req, "m").unwrap();
        match &result.messages[0].content {
            Some(ChatContent::Parts(parts)) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(
                    parts[1],
                    ContentPart::ImageUrl {
                        image_url: ImageUrlDetail {
                            url: "data:image/png;base64,AAAA".into()
                        }
                    }
                );
            }
            other => panic!("expected multipart content, got {other:?}"),
        }
    }

    #[test]
    fn test_url_image_is_forwarded_as_is() {
        let req: MessagesRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": [
                {"type": "image", "source": {"type": "url", "url": "https://example.com/a.png"}}
            ]}]
        }))
        .unwrap();

        let result = anthropic_to_openai(&req, "m").unwrap();
        assert_eq!(
            result.messages[0].content,
            Some(ChatContent::Parts(vec![ContentPart::ImageUrl {
                image_url: ImageUrlDetail {
                    url: "https://example.com/a.png".into()
                }
            }]))
        );
    }

    #[test]
    fn test_unrecognized_blocks_are_dropped() {
        let req: MessagesRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 16,
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "redacted_thinking", "data": "opaque"},
                    {"type": "text", "text": "Sure."}
                ]},
                {"role": "user", "content": [
                    {"type": "document", "source": {"type": "text", "data": "x"}},
                    {"type": "text", "text": "Thanks"}
                ]}
            ]
        }))
        .unwrap();

        let result = anthropic_to_openai(&req, "m").unwrap();
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].content, Some(ChatContent::Text("Sure.".into())));
        assert_eq!(result.messages[1].content, Some(ChatContent::Text("Thanks".into())));
    }

    #[test]
    fn test_tools_and_tool_choice() {
        let schema = json!({
            "type": "object",
            "properties": {"city": {"type": "string"}},
            "required": ["city"]
        });
        let mut req = request(vec![]);
        req.tools = Some(vec![Tool {
            name: "get_weather".into(),
            description: Some("Weather lookup".into()),
            input_schema: schema.clone(),
        }]);
        req.tool_choice = Some(ToolChoice::Any);
        req.stream = Some(true);
        req.stop_sequences = Some(vec!["END".into()]);

        let result = anthropic_to_openai(&req, "m").unwrap();
        let tools = result.tools.unwrap();
        assert_eq!(tools[0].tool_type, "function");
        assert_eq!(tools[0].function.parameters, schema);
        assert_eq!(result.tool_choice, Some(ChatToolChoice::Mode("required".into())));
        assert!(result.stream_options.unwrap().include_usage);
        assert_eq!(result.stop, Some(vec!["END".to_string()]));

        assert_eq!(
            translate_tool_choice(&ToolChoice::Tool {
                name: "get_weather".into()
            }),
            ChatToolChoice::Function(ChatToolChoiceFunction {
                choice_type: "function".into(),
                function: ChatFunctionName {
                    name: "get_weather".into()
                },
            })
        );
    }

    #[test]
    fn test_message_count_never_shrinks() {
        let req = request(vec![
            user(vec![]),
            Message {
                role: Role::Assistant,
                content: MessageContent::Blocks(vec![]),
            },
            user(vec![ContentBlock::Thinking {
                thinking: "hmm".into(),
                signature: None,
            }]),
        ]);

        let result = anthropic_to_openai(&req, "m").unwrap();
        assert!(result.messages.len() >= req.messages.len());
    }
}
