//! Chat orchestrator: one turn of the two-phase tool protocol.
//!
//! ```text
//! BUILD_CONTEXT → REQUEST_COMPLETION ─┬─ no tool calls ──────────────────────────→ DONE
//!                                     └─ tool calls → EXECUTE_TOOLS → FOLLOW_UP → DONE
//! ```
//!
//! Only a failure of the first completion request is surfaced. Tool errors
//! are already absorbed by the executor, and a failed follow-up degrades to
//! an acknowledgement naming the tools that ran.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use super::conversation::{build_follow_up_messages, build_primary_messages, build_request};
use super::errors::AgentError;
use super::mock;
use super::tool_executor::ToolExecutor;
use super::tool_registry::{filter_enabled, ToolRegistry};
use super::types::{Message, ToolCallRecord, TurnOutcome};
use crate::inference::accumulator::accumulate;
use crate::inference::types::ToolCall;
use crate::inference::CompletionProvider;

/// Final text when the first completion returns neither text nor tool calls.
const EMPTY_COMPLETION_TEXT: &str = "No response.";

/// Final text when the follow-up completion returns no text.
const EMPTY_FOLLOW_UP_TEXT: &str = "Processed.";

/// Receives assistant text as it is produced.
pub type ChunkSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Where completions come from.
#[derive(Clone)]
pub enum CompletionMode {
    Live(Arc<dyn CompletionProvider>),
    /// Synthetic responses; streamed word by word with `chunk_delay` between
    /// words.
    Mock { chunk_delay: Duration },
}

impl CompletionMode {
    pub fn label(&self) -> &'static str {
        match self {
            CompletionMode::Live(_) => "live",
            CompletionMode::Mock { .. } => "mock",
        }
    }
}

/// Everything a handler needs besides its model; shared by all sessions.
#[derive(Clone)]
pub struct HandlerConfig {
    pub mode: CompletionMode,
    pub max_tokens: u32,
    pub registry: ToolRegistry,
    pub executor: Arc<ToolExecutor>,
}

/// Per-session handler. Holds its configuration and current model.
pub struct ChatHandler {
    config: HandlerConfig,
    model: String,
}

/// First completion of a turn, whichever path produced it.
struct FirstCompletion {
    text: String,
    tool_calls: Vec<ToolCall>,
}

impl ChatHandler {
    pub fn new(config: HandlerConfig, model: impl Into<String>) -> Self {
        Self {
            config,
            model: model.into(),
        }
    }

    pub fn update_model(&mut self, model: &str) {
        if self.model != model {
            tracing::debug!(from = %self.model, to = %model, "handler model changed");
            self.model = model.to_string();
        }
    }

    /// Run one turn.
    ///
    /// `history` is the session's messages before `message`. With `on_chunk`
    /// the first completion is streamed and its text forwarded as it
    /// arrives; after a tool round the follow-up text is forwarded too.
    pub async fn process_message(
        &self,
        message: &str,
        history: &[Message],
        system_prompt: &str,
        enabled_tools: &[String],
        mut on_chunk: Option<ChunkSink<'_>>,
    ) -> Result<TurnOutcome, AgentError> {
        // BUILD_CONTEXT
        let offered = filter_enabled(self.config.registry.list_definitions().await, enabled_tools);
        let messages = build_primary_messages(system_prompt, history, message);
        let request = build_request(
            &self.model,
            self.config.max_tokens,
            messages,
            offered.clone(),
            on_chunk.is_some(),
        );

        tracing::info!(
            model = %self.model,
            mode = self.config.mode.label(),
            history_len = history.len(),
            tool_count = request.tool_count(),
            stream = request.stream,
            "processing message"
        );

        // REQUEST_COMPLETION
        let first = match &self.config.mode {
            CompletionMode::Live(provider) => match on_chunk.as_deref_mut() {
                Some(sink) => {
                    let stream = provider.complete_stream(&request).await?;
                    let done = accumulate(stream, sink).await?;
                    FirstCompletion {
                        text: done.full_text,
                        tool_calls: done.tool_calls,
                    }
                }
                None => {
                    let reply = provider.complete(&request).await?;
                    FirstCompletion {
                        text: reply.content.unwrap_or_default(),
                        tool_calls: reply.tool_calls,
                    }
                }
            },
            CompletionMode::Mock { chunk_delay } => {
                let reply = mock::respond(message, &offered);
                if let Some(sink) = on_chunk.as_deref_mut() {
                    emit_words(sink, &reply.text, *chunk_delay).await;
                }
                FirstCompletion {
                    text: reply.text,
                    tool_calls: reply.tool_calls,
                }
            }
        };

        if first.tool_calls.is_empty() {
            let content = if first.text.trim().is_empty() {
                EMPTY_COMPLETION_TEXT.to_string()
            } else {
                first.text
            };
            return Ok(TurnOutcome {
                content,
                tool_calls: None,
            });
        }

        // EXECUTE_TOOLS
        let records = self.execute_tools(&first.tool_calls).await;

        // REQUEST_FOLLOWUP
        let content = self
            .follow_up(system_prompt, history, message, &first.tool_calls, &records)
            .await;

        if let Some(sink) = on_chunk.as_deref_mut() {
            if !first.text.is_empty() {
                sink("\n\n");
            }
            match &self.config.mode {
                CompletionMode::Mock { chunk_delay } => emit_words(sink, &content, *chunk_delay).await,
                CompletionMode::Live(_) => sink(&content),
            }
        }

        Ok(TurnOutcome {
            content,
            tool_calls: Some(records),
        })
    }

    /// Execute every call concurrently and wait for all of them.
    async fn execute_tools(&self, calls: &[ToolCall]) -> Vec<ToolCallRecord> {
        let executor = &self.config.executor;
        let results = join_all(
            calls
                .iter()
                .map(|call| executor.execute(&call.name, &call.arguments)),
        )
        .await;

        calls
            .iter()
            .zip(results)
            .map(|(call, result)| ToolCallRecord {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                result,
            })
            .collect()
    }

    async fn follow_up(
        &self,
        system_prompt: &str,
        history: &[Message],
        message: &str,
        calls: &[ToolCall],
        records: &[ToolCallRecord],
    ) -> String {
        let provider = match &self.config.mode {
            CompletionMode::Live(provider) => provider,
            CompletionMode::Mock { .. } => return mock::follow_up_text(records),
        };

        let messages = build_follow_up_messages(system_prompt, history, message, calls, records);
        let request = build_request(&self.model, self.config.max_tokens, messages, Vec::new(), false);

        match provider.complete(&request).await {
            Ok(reply) => reply
                .content
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| EMPTY_FOLLOW_UP_TEXT.to_string()),
            Err(e) => {
                tracing::warn!(error = %e, tools = records.len(), "follow-up completion failed, acknowledging tool results");
                tools_acknowledgement(records)
            }
        }
    }
}

/// Degraded follow-up text naming the tools that ran.
fn tools_acknowledgement(records: &[ToolCallRecord]) -> String {
    let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
    format!(
        "I ran {} but could not summarize the results. The raw results are attached to this message.",
        names.join(", ")
    )
}

/// Forward `text` one word at a time, pausing between words.
async fn emit_words(sink: &mut (dyn FnMut(&str) + Send), text: &str, delay: Duration) {
    for word in text.split_inclusive(' ') {
        sink(word);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::types::ToolResult;
    use crate::inference::client::DeltaStream;
    use crate::inference::types::{
        ChatCompletionRequest, CompletionMessage, DeltaEvent, DeltaFragment, ToolCallFragment,
        ToolDefinition,
    };
    use crate::inference::InferenceError;
    use crate::mcp_client::{McpError, NoBridge, ToolBridge};
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::sync::Mutex;

    /// Provider that replays scripted responses and records requests.
    struct ScriptedProvider {
        stream_events: Vec<DeltaEvent>,
        first: Mutex<Option<Result<CompletionMessage, InferenceError>>>,
        follow_up: Mutex<Option<Result<CompletionMessage, InferenceError>>>,
        requests: Mutex<Vec<ChatCompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(
            first: Result<CompletionMessage, InferenceError>,
            follow_up: Result<CompletionMessage, InferenceError>,
        ) -> Self {
            Self {
                stream_events: Vec::new(),
                first: Mutex::new(Some(first)),
                follow_up: Mutex::new(Some(follow_up)),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<ChatCompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(
            &self,
            request: &ChatCompletionRequest,
        ) -> Result<CompletionMessage, InferenceError> {
            self.requests.lock().unwrap().push(request.clone());
            let slot = if request.tools.is_none() && request.messages.iter().any(|m| m.tool_call_id.is_some()) {
                &self.follow_up
            } else {
                &self.first
            };
            slot.lock().unwrap().take().unwrap_or(Ok(CompletionMessage::default()))
        }

        async fn complete_stream(
            &self,
            request: &ChatCompletionRequest,
        ) -> Result<DeltaStream, InferenceError> {
            self.requests.lock().unwrap().push(request.clone());
            let events: Vec<Result<DeltaEvent, InferenceError>> =
                self.stream_events.iter().cloned().map(Ok).collect();
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    /// Bridge whose `explode` tool always fails.
    struct FlakyBridge;

    #[async_trait]
    impl ToolBridge for FlakyBridge {
        async fn list_definitions(&self) -> Result<Vec<ToolDefinition>, McpError> {
            Ok(vec![ToolDefinition::function(
                "explode",
                "Always fails",
                serde_json::json!({"type": "object"}),
            )])
        }
        async fn execute(&self, name: &str, _: &Map<String, Value>) -> Result<String, McpError> {
            Err(McpError::ToolFailed {
                tool: name.into(),
                message: "boom".into(),
            })
        }
    }

    fn config(mode: CompletionMode, bridge: Arc<dyn ToolBridge>) -> HandlerConfig {
        HandlerConfig {
            mode,
            max_tokens: 16_000,
            registry: ToolRegistry::new(bridge.clone()),
            executor: Arc::new(ToolExecutor::new(bridge, None)),
        }
    }

    fn mock_handler() -> ChatHandler {
        mock_handler_with_delay(Duration::ZERO)
    }

    fn mock_handler_with_delay(chunk_delay: Duration) -> ChatHandler {
        ChatHandler::new(
            config(CompletionMode::Mock { chunk_delay }, Arc::new(NoBridge)),
            "test-model",
        )
    }

    fn live_handler(provider: Arc<ScriptedProvider>, bridge: Arc<dyn ToolBridge>) -> ChatHandler {
        ChatHandler::new(config(CompletionMode::Live(provider), bridge), "test-model")
    }

    fn call(id: &str, name: &str, raw: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: crate::inference::accumulator::parse_arguments(name, raw),
            raw_arguments: raw.into(),
        }
    }

    fn tools(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_mock_weather_turn() {
        let outcome = mock_handler()
            .process_message("what's the weather in Tokyo", &[], "", &tools(&["get_weather"]), None)
            .await
            .unwrap();
        let records = outcome.tool_calls.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "get_weather");
        assert!(!records[0].result.is_error());
        assert!(!outcome.content.is_empty());
    }

    #[tokio::test]
    async fn test_mock_streaming_forwards_lead_in_and_follow_up() {
        let mut chunks: Vec<String> = Vec::new();
        let mut sink = |c: &str| chunks.push(c.to_string());
        let outcome = mock_handler()
            .process_message("weather in Oslo", &[], "", &tools(&["get_weather"]), Some(&mut sink))
            .await
            .unwrap();
        let streamed = chunks.concat();
        assert!(chunks.len() > 1);
        assert!(streamed.starts_with("Let me check"));
        assert!(streamed.ends_with(&outcome.content));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_streaming_waits_between_words() {
        let delay = Duration::from_millis(30);
        let mut chunks: Vec<String> = Vec::new();
        let mut sink = |c: &str| chunks.push(c.to_string());

        let started = tokio::time::Instant::now();
        let outcome = mock_handler_with_delay(delay)
            .process_message("tell me something nice", &[], "", &[], Some(&mut sink))
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert!(outcome.tool_calls.is_none());
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), outcome.content);
        assert!(elapsed >= delay * (chunks.len() as u32 - 1));
    }

    #[tokio::test]
    async fn test_live_no_tools_returns_first_text() {
        let provider = Arc::new(ScriptedProvider::new(
            Ok(CompletionMessage {
                content: Some("Hello!".into()),
                tool_calls: Vec::new(),
            }),
            Ok(CompletionMessage::default()),
        ));
        let outcome = live_handler(provider.clone(), Arc::new(NoBridge))
            .process_message("hi", &[], "", &[], None)
            .await
            .unwrap();
        assert_eq!(outcome.content, "Hello!");
        assert!(outcome.tool_calls.is_none());
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_enabled_tools_omits_tool_parameters() {
        let provider = Arc::new(ScriptedProvider::new(
            Ok(CompletionMessage {
                content: Some("ok".into()),
                tool_calls: Vec::new(),
            }),
            Ok(CompletionMessage::default()),
        ));
        live_handler(provider.clone(), Arc::new(NoBridge))
            .process_message("hi", &[], "", &[], None)
            .await
            .unwrap();
        let json = serde_json::to_value(&provider.requests()[0]).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
    }

    #[tokio::test]
    async fn test_failing_tool_does_not_block_others() {
        let provider = Arc::new(ScriptedProvider::new(
            Ok(CompletionMessage {
                content: None,
                tool_calls: vec![
                    call("call_a", "explode", "{}"),
                    call("call_b", "get_weather", r#"{"location":"Paris"}"#),
                ],
            }),
            Ok(CompletionMessage {
                content: Some("Paris is mild; the other tool failed.".into()),
                tool_calls: Vec::new(),
            }),
        ));
        let outcome = live_handler(provider.clone(), Arc::new(FlakyBridge))
            .process_message("go", &[], "", &tools(&["explode", "get_weather"]), None)
            .await
            .unwrap();

        let records = outcome.tool_calls.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "call_a");
        assert_eq!(records[0].result, ToolResult::error("tool 'explode' failed: boom"));
        assert_eq!(records[1].id, "call_b");
        assert!(matches!(records[1].result, ToolResult::Weather(ref w) if w.location == "Paris"));
        assert_eq!(outcome.content, "Paris is mild; the other tool failed.");

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        let follow_up = &requests[1];
        assert!(follow_up.tools.is_none());
        let tool_ids: Vec<_> = follow_up
            .messages
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(tool_ids, vec!["call_a", "call_b"]);
    }

    #[tokio::test]
    async fn test_follow_up_failure_degrades_to_acknowledgement() {
        let provider = Arc::new(ScriptedProvider::new(
            Ok(CompletionMessage {
                content: None,
                tool_calls: vec![call("c1", "get_weather", r#"{"location":"Rome"}"#)],
            }),
            Err(InferenceError::HttpError {
                status: 503,
                body: "overloaded".into(),
            }),
        ));
        let outcome = live_handler(provider, Arc::new(NoBridge))
            .process_message("weather", &[], "", &tools(&["get_weather"]), None)
            .await
            .unwrap();
        assert!(outcome.content.contains("get_weather"));
        assert_eq!(outcome.tool_calls.map(|r| r.len()), Some(1));
    }

    #[tokio::test]
    async fn test_first_completion_failure_is_surfaced() {
        let provider = Arc::new(ScriptedProvider::new(
            Err(InferenceError::ConnectionFailed {
                endpoint: "http://gateway".into(),
                reason: "refused".into(),
            }),
            Ok(CompletionMessage::default()),
        ));
        let err = live_handler(provider, Arc::new(NoBridge))
            .process_message("hi", &[], "", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Completion(InferenceError::ConnectionFailed { .. })));
    }

    #[tokio::test]
    async fn test_live_streaming_accumulates_fragmented_tool_call() {
        let fragment = |name: Option<&str>, args: &str| DeltaEvent {
            fragments: vec![DeltaFragment::ToolCall(ToolCallFragment {
                index: 0,
                id: name.map(|_| "call_s".to_string()),
                name: name.map(str::to_string),
                arguments: Some(args.to_string()),
            })],
            finish_reason: None,
        };
        let mut provider = ScriptedProvider::new(
            Ok(CompletionMessage::default()),
            Ok(CompletionMessage {
                content: Some("It is warm in SF.".into()),
                tool_calls: Vec::new(),
            }),
        );
        provider.stream_events = vec![
            DeltaEvent::text("Checking. "),
            fragment(Some("get_weather"), "{\"loc"),
            fragment(None, "ation\":\"SF\"}"),
        ];
        let provider = Arc::new(provider);

        let mut chunks: Vec<String> = Vec::new();
        let mut sink = |c: &str| chunks.push(c.to_string());
        let outcome = live_handler(provider.clone(), Arc::new(NoBridge))
            .process_message("weather?", &[], "", &tools(&["get_weather"]), Some(&mut sink))
            .await
            .unwrap();

        let records = outcome.tool_calls.unwrap();
        assert_eq!(records[0].id, "call_s");
        assert_eq!(records[0].arguments["location"], "SF");
        assert_eq!(outcome.content, "It is warm in SF.");
        assert_eq!(chunks, vec!["Checking. ", "\n\n", "It is warm in SF."]);
        assert!(provider.requests()[0].stream);
    }

    #[tokio::test]
    async fn test_mock_and_live_outcomes_share_shape() {
        let keys = |outcome: &TurnOutcome| {
            let value = serde_json::to_value(outcome).unwrap();
            let mut keys: Vec<String> = value.as_object().unwrap().keys().cloned().collect();
            keys.sort();
            keys
        };

        let mock = mock_handler()
            .process_message("weather in Lima", &[], "", &tools(&["get_weather"]), None)
            .await
            .unwrap();

        let provider = Arc::new(ScriptedProvider::new(
            Ok(CompletionMessage {
                content: None,
                tool_calls: vec![call("c1", "get_weather", r#"{"location":"Lima"}"#)],
            }),
            Err(InferenceError::StreamError {
                reason: "reset".into(),
            }),
        ));
        let live = live_handler(provider, Arc::new(NoBridge))
            .process_message("weather in Lima", &[], "", &tools(&["get_weather"]), None)
            .await
            .unwrap();

        assert_eq!(keys(&mock), vec!["content", "toolCalls"]);
        assert_eq!(keys(&mock), keys(&live));
    }
}
