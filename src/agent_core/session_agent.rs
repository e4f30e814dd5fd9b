//! Per-session agents.
//!
//! A [`SessionAgent`] owns the [`ChatHandler`] for one session and drives
//! turns through the session store. The handler sits behind an async mutex
//! that doubles as the turn lock: a second turn for the same session waits
//! for the first to finish instead of interleaving with it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::errors::AgentError;
use super::orchestrator::{ChatHandler, HandlerConfig};
use super::session_store::SessionStore;
use super::types::SessionState;

/// Prefix of the message recorded when a buffered turn fails.
const BUFFERED_FAILURE_PREFIX: &str = "Sorry, I ran into a problem:";

/// Prefix written to the stream (and recorded) when a streamed turn fails.
const STREAM_FAILURE_PREFIX: &str = "[Stream interrupted]";

/// Cached agents before idle ones are dropped on the next insert.
const MAX_CACHED_AGENTS: usize = 1024;

// ─── SessionAgent ───────────────────────────────────────────────────────────

pub struct SessionAgent {
    session_id: String,
    store: Arc<SessionStore>,
    handler: Arc<tokio::sync::Mutex<ChatHandler>>,
}

impl SessionAgent {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Trim the message and apply a requested model before the turn starts.
    fn prepare(&self, message: &str, model: Option<&str>) -> Result<String, AgentError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AgentError::InvalidInput {
                reason: "message must not be empty".into(),
            });
        }
        if let Some(model) = model.map(str::trim).filter(|m| !m.is_empty()) {
            self.store.set_model(&self.session_id, model)?;
        }
        Ok(message.to_string())
    }

    /// Run a turn and return the final snapshot.
    ///
    /// A completion failure is recorded as a visible assistant message and
    /// then returned.
    pub async fn run_buffered(
        &self,
        message: &str,
        model: Option<&str>,
    ) -> Result<SessionState, AgentError> {
        let message = self.prepare(message, model)?;
        let mut handler = self.handler.lock().await;

        let state = self.store.append_user_message(&self.session_id, &message)?;
        handler.update_model(&state.model);
        let history = prior_history(&state);

        let result = handler
            .process_message(&message, history, &state.system_prompt, &state.enabled_tools, None)
            .await;

        match result {
            Ok(outcome) => self
                .store
                .complete_turn(&self.session_id, &outcome.content, outcome.tool_calls),
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "turn failed");
                self.store
                    .fail_turn(&self.session_id, &format!("{BUFFERED_FAILURE_PREFIX} {e}"))?;
                Err(e)
            }
        }
    }

    /// Start a streamed turn. Text chunks arrive on the returned receiver;
    /// the channel closes when the turn has been recorded.
    ///
    /// Returns once the turn lock is held. The turn runs on its own task and
    /// finishes even if the receiver is dropped.
    pub async fn run_streaming(
        self: Arc<Self>,
        message: &str,
        model: Option<&str>,
    ) -> Result<mpsc::UnboundedReceiver<String>, AgentError> {
        let message = self.prepare(message, model)?;
        let mut handler = self.handler.clone().lock_owned().await;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            if let Err(e) = self.stream_turn(&mut handler, &message, &tx).await {
                tracing::error!(session_id = %self.session_id, error = %e, "streamed turn failed");
                let error_text = format!("{STREAM_FAILURE_PREFIX} {e}");
                let _ = tx.send(error_text.clone());
                if let Err(e) = self.store.fail_turn(&self.session_id, &error_text) {
                    tracing::error!(session_id = %self.session_id, error = %e, "failed to record stream failure");
                }
            }
        });

        Ok(rx)
    }

    async fn stream_turn(
        &self,
        handler: &mut ChatHandler,
        message: &str,
        tx: &mpsc::UnboundedSender<String>,
    ) -> Result<(), AgentError> {
        let state = self.store.append_user_message(&self.session_id, message)?;
        handler.update_model(&state.model);
        self.store.begin_streaming(&self.session_id)?;
        let history = prior_history(&state);

        let store = &self.store;
        let session_id = self.session_id.as_str();
        let mut on_chunk = |chunk: &str| {
            if let Err(e) = store.append_stream_chunk(session_id, chunk) {
                tracing::warn!(session_id = %session_id, error = %e, "failed to buffer stream chunk");
            }
            // The client may be gone; the turn is recorded regardless.
            let _ = tx.send(chunk.to_string());
        };

        let outcome = handler
            .process_message(
                message,
                history,
                &state.system_prompt,
                &state.enabled_tools,
                Some(&mut on_chunk),
            )
            .await?;

        self.store
            .complete_turn(&self.session_id, &outcome.content, outcome.tool_calls)?;
        Ok(())
    }
}

/// Messages before the one just appended.
fn prior_history(state: &SessionState) -> &[super::types::Message] {
    let len = state.messages.len();
    &state.messages[..len.saturating_sub(1)]
}

// ─── SessionAgents ──────────────────────────────────────────────────────────

/// Lazily created agents, one per session id.
///
/// Agents hold no session state of their own, so an idle one (referenced only
/// by this map) is dropped once the cache is full and rebuilt on demand. An
/// agent with a turn running or queued is always kept, which keeps one turn
/// lock per session.
pub struct SessionAgents {
    store: Arc<SessionStore>,
    config: HandlerConfig,
    agents: Mutex<HashMap<String, Arc<SessionAgent>>>,
    max_cached: usize,
}

impl SessionAgents {
    pub fn new(store: Arc<SessionStore>, config: HandlerConfig) -> Self {
        Self {
            store,
            config,
            agents: Mutex::new(HashMap::new()),
            max_cached: MAX_CACHED_AGENTS,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// The agent for `session_id`, created with the session's current model.
    pub fn get(&self, session_id: &str) -> Result<Arc<SessionAgent>, AgentError> {
        let mut agents = self.agents.lock().map_err(|_| AgentError::LockPoisoned)?;
        if let Some(agent) = agents.get(session_id) {
            return Ok(agent.clone());
        }

        if agents.len() >= self.max_cached {
            let before = agents.len();
            agents.retain(|_, agent| Arc::strong_count(agent) > 1);
            tracing::debug!(evicted = before - agents.len(), "idle session agents dropped");
        }

        let state = self.store.snapshot(session_id)?;
        let agent = Arc::new(SessionAgent {
            session_id: session_id.to_string(),
            store: self.store.clone(),
            handler: Arc::new(tokio::sync::Mutex::new(ChatHandler::new(
                self.config.clone(),
                state.model,
            ))),
        });
        agents.insert(session_id.to_string(), agent.clone());
        tracing::debug!(session_id = %session_id, "session agent created");
        Ok(agent)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::database::SessionDatabase;
    use crate::agent_core::orchestrator::CompletionMode;
    use crate::agent_core::tool_executor::ToolExecutor;
    use crate::agent_core::tool_registry::ToolRegistry;
    use crate::agent_core::types::{MessageRole, SessionDefaults};
    use crate::inference::client::DeltaStream;
    use crate::inference::types::{ChatCompletionRequest, CompletionMessage};
    use crate::inference::{CompletionProvider, InferenceError};
    use crate::mcp_client::NoBridge;
    use async_trait::async_trait;
    use std::time::Duration;

    fn store() -> Arc<SessionStore> {
        Arc::new(SessionStore::new(
            SessionDatabase::open(":memory:").unwrap(),
            SessionDefaults {
                model: "test-model".into(),
                system_prompt: "You are a helpful AI assistant.".into(),
                enabled_tools: vec!["get_weather".into()],
            },
        ))
    }

    fn agents_with(mode: CompletionMode) -> SessionAgents {
        let bridge = Arc::new(NoBridge);
        SessionAgents::new(
            store(),
            HandlerConfig {
                mode,
                max_tokens: 1000,
                registry: ToolRegistry::new(bridge.clone()),
                executor: Arc::new(ToolExecutor::new(bridge, None)),
            },
        )
    }

    fn mock_agents() -> SessionAgents {
        agents_with(CompletionMode::Mock {
            chunk_delay: Duration::ZERO,
        })
    }

    struct DownProvider;

    #[async_trait]
    impl CompletionProvider for DownProvider {
        async fn complete(&self, _: &ChatCompletionRequest) -> Result<CompletionMessage, InferenceError> {
            Err(InferenceError::HttpError {
                status: 500,
                body: "down".into(),
            })
        }
        async fn complete_stream(&self, _: &ChatCompletionRequest) -> Result<DeltaStream, InferenceError> {
            Err(InferenceError::HttpError {
                status: 500,
                body: "down".into(),
            })
        }
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<String>) -> String {
        let mut out = String::new();
        while let Some(chunk) = rx.recv().await {
            out.push_str(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_weather_turn_adds_two_messages() {
        let agents = mock_agents();
        let agent = agents.get("s").unwrap();
        let state = agent.run_buffered("what's the weather in Tokyo", None).await.unwrap();

        assert_eq!(state.messages.len(), 2);
        assert!(!state.is_processing);
        let reply = &state.messages[1];
        assert_eq!(reply.role, MessageRole::Assistant);
        assert!(!reply.content.is_empty());
        let calls = reply.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_weather");
        assert!(!calls[0].result.is_error());
    }

    #[tokio::test]
    async fn test_empty_message_rejected_without_state_change() {
        let agents = mock_agents();
        let agent = agents.get("s").unwrap();
        let err = agent.run_buffered("   ", None).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidInput { .. }));
        assert!(agents.store().snapshot("s").unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn test_supplied_model_updates_session() {
        let agents = mock_agents();
        let agent = agents.get("s").unwrap();
        let state = agent.run_buffered("hello", Some("gpt-4o-mini")).await.unwrap();
        assert_eq!(state.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_buffered_failure_is_recorded() {
        let agents = agents_with(CompletionMode::Live(Arc::new(DownProvider)));
        let agent = agents.get("s").unwrap();
        let err = agent.run_buffered("hi", None).await.unwrap_err();
        assert!(matches!(err, AgentError::Completion(_)));

        let state = agents.store().snapshot("s").unwrap();
        assert!(!state.is_processing);
        assert_eq!(state.messages.len(), 2);
        assert!(state.messages[1].content.starts_with(BUFFERED_FAILURE_PREFIX));
    }

    #[tokio::test]
    async fn test_streamed_turn_records_final_message() {
        let agents = mock_agents();
        let agent = agents.get("s").unwrap();
        let rx = agent.run_streaming("weather in Lima", None).await.unwrap();
        let streamed = drain(rx).await;

        let state = agents.store().snapshot("s").unwrap();
        assert!(!state.is_processing);
        assert_eq!(state.streaming_message, "");
        assert_eq!(state.messages.len(), 2);
        assert!(streamed.ends_with(&state.messages[1].content));
    }

    #[tokio::test]
    async fn test_streamed_failure_is_written_and_recorded() {
        let agents = agents_with(CompletionMode::Live(Arc::new(DownProvider)));
        let agent = agents.get("s").unwrap();
        let streamed = drain(agent.run_streaming("hi", None).await.unwrap()).await;
        assert!(streamed.starts_with(STREAM_FAILURE_PREFIX));

        let state = agents.store().snapshot("s").unwrap();
        assert!(!state.is_processing);
        assert_eq!(state.messages[1].content, streamed);
    }

    #[tokio::test]
    async fn test_dropped_receiver_still_completes_turn() {
        let agents = mock_agents();
        let agent = agents.get("s").unwrap();
        drop(agent.clone().run_streaming("hello", None).await.unwrap());

        // A buffered turn queues behind the streamed one on the turn lock.
        let state = agent.run_buffered("again", None).await.unwrap();
        assert_eq!(state.messages.len(), 4);
        assert!(!state.is_processing);
    }

    #[tokio::test]
    async fn test_agents_are_reused_per_session() {
        let agents = mock_agents();
        let a = agents.get("s").unwrap();
        let b = agents.get("s").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.session_id(), "s");
        assert!(!Arc::ptr_eq(&a, &agents.get("other").unwrap()));
    }

    fn cached(agents: &SessionAgents) -> usize {
        agents.agents.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_idle_agents_dropped_when_cache_full() {
        let mut agents = mock_agents();
        agents.max_cached = 2;

        let busy = agents.get("a").unwrap();
        drop(agents.get("b").unwrap());
        assert_eq!(cached(&agents), 2);

        agents.get("c").unwrap();
        assert_eq!(cached(&agents), 2);
        assert!(Arc::ptr_eq(&busy, &agents.get("a").unwrap()));
        assert!(!agents.agents.lock().unwrap().contains_key("b"));
    }

    #[tokio::test]
    async fn test_rebuilt_agent_keeps_session_state() {
        let mut agents = mock_agents();
        agents.max_cached = 1;

        agents
            .get("a")
            .unwrap()
            .run_buffered("hello", Some("other/model"))
            .await
            .unwrap();
        agents.get("b").unwrap();
        assert_eq!(cached(&agents), 1);

        let state = agents
            .get("a")
            .unwrap()
            .run_buffered("again", None)
            .await
            .unwrap();
        assert_eq!(state.model, "other/model");
        assert_eq!(state.messages.len(), 4);
    }
}
