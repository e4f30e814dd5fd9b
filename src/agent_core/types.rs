//! Shared types for the agent core.
//!
//! These are the shapes persisted in the session store and returned over
//! HTTP. Field names serialize in camelCase to match the session snapshot
//! consumed by the UI.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─── Messages ───────────────────────────────────────────────────────────────

/// Author of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

/// A message in a session's history. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Opaque unique id.
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            tool_calls: None,
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Option<Vec<ToolCallRecord>>) -> Self {
        self.tool_calls = tool_calls.filter(|calls| !calls.is_empty());
        self
    }
}

// ─── Tool Calls ─────────────────────────────────────────────────────────────

/// An executed tool call. Created after execution, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
    pub result: ToolResult,
}

/// Fabricated weather reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub location: String,
    /// Degrees Celsius.
    pub temperature: i32,
    pub condition: String,
    /// Relative humidity, percent.
    pub humidity: u8,
}

/// Outcome of a tool execution. Exactly one shape is ever populated.
///
/// Serialized untagged, so the JSON is `{location, temperature, condition,
/// humidity}`, `{content}` or `{error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResult {
    Weather(WeatherReport),
    Content { content: String },
    Error { error: String },
}

impl ToolResult {
    pub fn content(content: impl Into<String>) -> Self {
        ToolResult::Content {
            content: content.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        ToolResult::Error {
            error: error.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Error { .. })
    }
}

// ─── Sessions ───────────────────────────────────────────────────────────────

/// Per-session aggregate returned by every session operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: String,
    pub messages: Vec<Message>,
    /// True exactly while a turn is in flight.
    pub is_processing: bool,
    /// Partial assistant text of the in-flight streamed turn.
    pub streaming_message: String,
    pub model: String,
    pub system_prompt: String,
    /// Tool names offered to the model, in the order the caller supplied.
    pub enabled_tools: Vec<String>,
}

/// Values a newly created session starts with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDefaults {
    pub model: String,
    pub system_prompt: String,
    pub enabled_tools: Vec<String>,
}

/// What one orchestrated turn produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_shapes() {
        let weather = ToolResult::Weather(WeatherReport {
            location: "Tokyo".into(),
            temperature: 24,
            condition: "Clear".into(),
            humidity: 50,
        });
        assert_eq!(
            serde_json::to_value(&weather).unwrap(),
            serde_json::json!({"location":"Tokyo","temperature":24,"condition":"Clear","humidity":50})
        );
        assert_eq!(
            serde_json::to_value(ToolResult::content("ok")).unwrap(),
            serde_json::json!({"content":"ok"})
        );
        assert_eq!(
            serde_json::to_value(ToolResult::error("boom")).unwrap(),
            serde_json::json!({"error":"boom"})
        );
    }

    #[test]
    fn test_tool_result_deserializes_each_shape() {
        let parsed: ToolResult = serde_json::from_str(r#"{"error":"nope"}"#).unwrap();
        assert!(parsed.is_error());
        let parsed: ToolResult = serde_json::from_str(r#"{"content":"hi"}"#).unwrap();
        assert_eq!(parsed, ToolResult::content("hi"));
        let parsed: ToolResult = serde_json::from_str(
            r#"{"location":"Oslo","temperature":21,"condition":"Rain","humidity":50}"#,
        )
        .unwrap();
        assert!(matches!(parsed, ToolResult::Weather(_)));
    }

    #[test]
    fn test_session_state_serializes_camel_case() {
        let state = SessionState {
            session_id: "s1".into(),
            messages: vec![Message::new(MessageRole::User, "hi")],
            is_processing: false,
            streaming_message: String::new(),
            model: "m".into(),
            system_prompt: "p".into(),
            enabled_tools: vec!["get_weather".into()],
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["isProcessing"], false);
        assert_eq!(json["streamingMessage"], "");
        assert_eq!(json["systemPrompt"], "p");
        assert_eq!(json["enabledTools"][0], "get_weather");
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json["messages"][0].get("toolCalls").is_none());
    }

    #[test]
    fn test_empty_tool_calls_are_dropped() {
        let msg = Message::new(MessageRole::Assistant, "done").with_tool_calls(Some(vec![]));
        assert!(msg.tool_calls.is_none());
    }
}
