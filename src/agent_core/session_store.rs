//! Session state store.
//!
//! The only path through which session state changes. Every operation runs
//! under one lock around the database, so each is atomic with respect to
//! concurrent callers, and returns the resulting snapshot.
//!
//! Sessions are created lazily with the configured defaults on first access.

use std::sync::{Mutex, MutexGuard};

use super::database::SessionDatabase;
use super::errors::AgentError;
use super::types::{Message, MessageRole, SessionDefaults, SessionState, ToolCallRecord};

/// Durable per-session state with controlled mutation.
pub struct SessionStore {
    db: Mutex<SessionDatabase>,
    defaults: SessionDefaults,
}

impl SessionStore {
    pub fn new(db: SessionDatabase, defaults: SessionDefaults) -> Self {
        Self {
            db: Mutex::new(db),
            defaults,
        }
    }

    /// Open the database at `path` and reset turns interrupted by a previous
    /// process.
    pub fn open(path: &str, defaults: SessionDefaults) -> Result<Self, AgentError> {
        let db = SessionDatabase::open(path)?;
        let recovered = db.recover_interrupted()?;
        if recovered > 0 {
            tracing::warn!(recovered, "reset sessions left mid-turn by a previous run");
        }
        Ok(Self::new(db, defaults))
    }

    pub fn defaults(&self) -> &SessionDefaults {
        &self.defaults
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionDatabase>, AgentError> {
        self.db.lock().map_err(|_| AgentError::LockPoisoned)
    }

    /// Run `op` against the session's row (created if missing) and return the
    /// snapshot taken under the same lock.
    fn mutate<F>(&self, session_id: &str, op: F) -> Result<SessionState, AgentError>
    where
        F: FnOnce(&mut SessionDatabase) -> Result<(), AgentError>,
    {
        let mut db = self.lock()?;
        db.ensure_session(session_id, &self.defaults)?;
        op(&mut *db)?;
        db.load_state(session_id)?
            .ok_or_else(|| AgentError::DatabaseError {
                reason: format!("session '{session_id}' vanished during update"),
            })
    }

    /// Run `op` against the session's row (created if missing) without
    /// rebuilding the snapshot. Used on the per-chunk path of a streamed turn.
    fn mutate_quiet<T, F>(&self, session_id: &str, op: F) -> Result<T, AgentError>
    where
        F: FnOnce(&mut SessionDatabase) -> Result<T, AgentError>,
    {
        let mut db = self.lock()?;
        db.ensure_session(session_id, &self.defaults)?;
        op(&mut *db)
    }

    // ─── Reads ──────────────────────────────────────────────────────────

    /// Current snapshot, creating the session with defaults if needed.
    pub fn snapshot(&self, session_id: &str) -> Result<SessionState, AgentError> {
        self.mutate(session_id, |_| Ok(()))
    }

    // ─── Turn Lifecycle ─────────────────────────────────────────────────

    /// Append a user message and mark the session as processing.
    pub fn append_user_message(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<SessionState, AgentError> {
        let message = Message::new(MessageRole::User, text);
        self.mutate(session_id, |db| db.begin_turn(session_id, &message))
    }

    /// Reset the streaming buffer before the first chunk of a streamed turn.
    pub fn begin_streaming(&self, session_id: &str) -> Result<(), AgentError> {
        self.mutate_quiet(session_id, |db| db.set_streaming_message(session_id, ""))
    }

    /// Concatenate one chunk onto the streaming buffer and return the buffer.
    /// The message history is not read.
    pub fn append_stream_chunk(&self, session_id: &str, text: &str) -> Result<String, AgentError> {
        self.mutate_quiet(session_id, |db| db.append_streaming_message(session_id, text))
    }

    /// Append the assistant reply and end the turn.
    pub fn complete_turn(
        &self,
        session_id: &str,
        assistant_text: &str,
        tool_calls: Option<Vec<ToolCallRecord>>,
    ) -> Result<SessionState, AgentError> {
        let message = Message::new(MessageRole::Assistant, assistant_text).with_tool_calls(tool_calls);
        self.mutate(session_id, |db| db.finish_turn(session_id, &message))
    }

    /// Append a visible error reply and end the turn.
    pub fn fail_turn(&self, session_id: &str, error_text: &str) -> Result<SessionState, AgentError> {
        let message = Message::new(MessageRole::Assistant, error_text);
        self.mutate(session_id, |db| db.finish_turn(session_id, &message))
    }

    // ─── Settings ───────────────────────────────────────────────────────

    pub fn set_model(&self, session_id: &str, model: &str) -> Result<SessionState, AgentError> {
        let model = model.trim();
        if model.is_empty() {
            return Err(AgentError::InvalidInput {
                reason: "model must not be empty".into(),
            });
        }
        self.mutate(session_id, |db| db.set_model(session_id, model))
    }

    pub fn set_system_prompt(
        &self,
        session_id: &str,
        prompt: &str,
    ) -> Result<SessionState, AgentError> {
        self.mutate(session_id, |db| db.set_system_prompt(session_id, prompt))
    }

    /// Replace the enabled tool set. Duplicates and blank names are dropped,
    /// first occurrence order is kept.
    pub fn set_enabled_tools(
        &self,
        session_id: &str,
        tools: &[String],
    ) -> Result<SessionState, AgentError> {
        let mut unique: Vec<String> = Vec::with_capacity(tools.len());
        for tool in tools.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            if !unique.iter().any(|t| t == tool) {
                unique.push(tool.to_string());
            }
        }
        self.mutate(session_id, |db| db.set_enabled_tools(session_id, &unique))
    }

    /// Empty the message history. Settings and turn flags are untouched.
    pub fn clear(&self, session_id: &str) -> Result<SessionState, AgentError> {
        self.mutate(session_id, |db| {
            let removed = db.delete_messages(session_id)?;
            tracing::info!(session_id = %session_id, removed, "cleared session history");
            Ok(())
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
