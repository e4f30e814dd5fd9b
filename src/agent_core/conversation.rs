//! Conversation context assembly.
//!
//! Turns stored session history into the message lists sent to the
//! completion endpoint. Only the most recent messages are included: a wider
//! window for the first request of a turn, a narrower one for the follow-up
//! that carries tool results.

use crate::inference::types::{ChatCompletionRequest, ChatMessage, ToolCall, ToolDefinition};

use super::types::{Message, MessageRole, ToolCallRecord};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Prior messages included in the first request of a turn.
pub const PRIMARY_HISTORY_WINDOW: usize = 10;

/// Prior messages included in the follow-up request.
pub const FOLLOW_UP_HISTORY_WINDOW: usize = 5;

/// System directive used when the session has none.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// System directive for the follow-up request when the session has none.
pub const FOLLOW_UP_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

// ─── Builders ───────────────────────────────────────────────────────────────

/// The last `window` messages of `history`.
pub fn recent(history: &[Message], window: usize) -> &[Message] {
    &history[history.len().saturating_sub(window)..]
}

fn history_message(message: &Message) -> ChatMessage {
    match message.role {
        MessageRole::User => ChatMessage::user(message.content.clone()),
        MessageRole::Assistant => ChatMessage::assistant(message.content.clone()),
    }
}

fn system_directive(prompt: &str, fallback: &str) -> ChatMessage {
    let prompt = prompt.trim();
    ChatMessage::system(if prompt.is_empty() { fallback } else { prompt })
}

/// `[system, last 10 of history, user]`.
pub fn build_primary_messages(
    system_prompt: &str,
    history: &[Message],
    user_message: &str,
) -> Vec<ChatMessage> {
    let window = recent(history, PRIMARY_HISTORY_WINDOW);
    let mut messages = Vec::with_capacity(window.len() + 2);
    messages.push(system_directive(system_prompt, DEFAULT_SYSTEM_PROMPT));
    messages.extend(window.iter().map(history_message));
    messages.push(ChatMessage::user(user_message));
    messages
}

/// `[system, last 5 of history, user, assistant tool calls, tool results...]`.
///
/// Each tool result entry carries the JSON of its `ToolResult`, tagged with
/// the id of the call that produced it.
pub fn build_follow_up_messages(
    system_prompt: &str,
    history: &[Message],
    user_message: &str,
    calls: &[ToolCall],
    records: &[ToolCallRecord],
) -> Vec<ChatMessage> {
    let window = recent(history, FOLLOW_UP_HISTORY_WINDOW);
    let mut messages = Vec::with_capacity(window.len() + records.len() + 3);
    messages.push(system_directive(system_prompt, FOLLOW_UP_SYSTEM_PROMPT));
    messages.extend(window.iter().map(history_message));
    messages.push(ChatMessage::user(user_message));
    messages.push(ChatMessage::assistant_tool_calls(
        calls.iter().map(ToolCall::to_response).collect(),
    ));
    for record in records {
        let content = serde_json::to_string(&record.result)
            .unwrap_or_else(|e| format!("{{\"error\":\"unserializable tool result: {e}\"}}"));
        messages.push(ChatMessage::tool_result(record.id.clone(), content));
    }
    messages
}

/// Assemble a request. Tool parameters are omitted entirely when `tools` is
/// empty, so the model is never offered a tool it has no schema for.
pub fn build_request(
    model: &str,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
    tools: Vec<ToolDefinition>,
    stream: bool,
) -> ChatCompletionRequest {
    let (tools, tool_choice) = if tools.is_empty() {
        (None, None)
    } else {
        (Some(tools), Some("auto".to_string()))
    };
    ChatCompletionRequest {
        model: model.to_string(),
        messages,
        tools,
        tool_choice,
        max_completion_tokens: Some(max_tokens),
        stream,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::types::ToolResult;
    use crate::inference::types::Role;
    use serde_json::Map;

    fn history(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                let role = if i % 2 == 0 { MessageRole::User } else { MessageRole::Assistant };
                Message::new(role, format!("m{i}"))
            })
            .collect()
    }

    #[test]
    fn test_primary_window_keeps_most_recent() {
        let messages = build_primary_messages("Be brief.", &history(14), "now");
        assert_eq!(messages.len(), 12);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content.as_deref(), Some("Be brief."));
        assert_eq!(messages[1].content.as_deref(), Some("m4"));
        assert_eq!(messages[10].content.as_deref(), Some("m13"));
        assert_eq!(messages[11].role, Role::User);
        assert_eq!(messages[11].content.as_deref(), Some("now"));
    }

    #[test]
    fn test_blank_prompt_uses_default() {
        let messages = build_primary_messages("  ", &[], "hi");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content.as_deref(), Some(DEFAULT_SYSTEM_PROMPT));
    }

    #[test]
    fn test_follow_up_layout() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "get_weather".into(),
            arguments: Map::new(),
            raw_arguments: r#"{"location":"Oslo"}"#.into(),
        };
        let record = ToolCallRecord {
            id: "call_1".into(),
            name: "get_weather".into(),
            arguments: Map::new(),
            result: ToolResult::content("sunny"),
        };
        let messages =
            build_follow_up_messages("", &history(8), "weather?", &[call], &[record]);

        // system + 5 history + user + assistant + 1 tool result
        assert_eq!(messages.len(), 9);
        assert_eq!(messages[0].content.as_deref(), Some(FOLLOW_UP_SYSTEM_PROMPT));
        assert_eq!(messages[1].content.as_deref(), Some("m3"));
        assert_eq!(messages[6].content.as_deref(), Some("weather?"));

        let assistant = &messages[7];
        assert_eq!(assistant.role, Role::Assistant);
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, r#"{"location":"Oslo"}"#);

        let tool = &messages[8];
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool.content.as_deref(), Some(r#"{"content":"sunny"}"#));
    }

    #[test]
    fn test_request_without_tools_has_no_tool_fields() {
        let request = build_request("m", 100, vec![ChatMessage::user("x")], Vec::new(), false);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
        assert_eq!(json["max_completion_tokens"], 100);
    }

    #[test]
    fn test_request_with_tools_sets_auto_choice() {
        let tools = crate::agent_core::tool_registry::builtin_definitions();
        let request = build_request("m", 100, Vec::new(), tools, true);
        assert_eq!(request.tool_count(), 4);
        assert_eq!(request.tool_choice.as_deref(), Some("auto"));
        assert!(request.stream);
    }
}
