//! SQLite persistence for session state.
//!
//! Uses `rusqlite` in synchronous mode behind the session store's mutex.
//! WAL mode keeps snapshot reads cheap while a streamed turn appends chunks.

use rusqlite::{params, Connection, OptionalExtension};

use super::errors::AgentError;
use super::types::{Message, MessageRole, SessionDefaults, SessionState, ToolCallRecord};

// ─── Database ───────────────────────────────────────────────────────────────

/// SQLite database handle for session state.
pub struct SessionDatabase {
    conn: Connection,
}

impl SessionDatabase {
    /// Open (or create) the database at the given path.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, AgentError> {
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self { conn };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<(), AgentError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                model TEXT NOT NULL,
                system_prompt TEXT NOT NULL,
                enabled_tools TEXT NOT NULL DEFAULT '[]',
                is_processing INTEGER NOT NULL DEFAULT 0,
                streaming_message TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                last_activity TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                tool_calls TEXT,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_messages_session
                ON messages(session_id, seq);
            ",
        )?;
        Ok(())
    }

    // ─── Sessions ───────────────────────────────────────────────────────

    /// Insert a session row with default settings unless it already exists.
    pub fn ensure_session(
        &self,
        session_id: &str,
        defaults: &SessionDefaults,
    ) -> Result<(), AgentError> {
        let tools_json = serde_json::to_string(&defaults.enabled_tools)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO sessions (id, model, system_prompt, enabled_tools)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, defaults.model, defaults.system_prompt, tools_json],
        )?;
        Ok(())
    }

    /// Load the full session snapshot, or `None` if the session was never created.
    pub fn load_state(&self, session_id: &str) -> Result<Option<SessionState>, AgentError> {
        let row = self
            .conn
            .query_row(
                "SELECT model, system_prompt, enabled_tools, is_processing, streaming_message
                 FROM sessions WHERE id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((model, system_prompt, tools_json, is_processing, streaming_message)) = row
        else {
            return Ok(None);
        };

        Ok(Some(SessionState {
            session_id: session_id.to_string(),
            messages: self.get_messages(session_id)?,
            is_processing,
            streaming_message,
            model,
            system_prompt,
            enabled_tools: parse_json_array(&tools_json),
        }))
    }

    pub fn set_model(&self, session_id: &str, model: &str) -> Result<(), AgentError> {
        self.update_session(
            "UPDATE sessions SET model = ?2, last_activity = datetime('now') WHERE id = ?1",
            session_id,
            model,
        )
    }

    pub fn set_system_prompt(&self, session_id: &str, prompt: &str) -> Result<(), AgentError> {
        self.update_session(
            "UPDATE sessions SET system_prompt = ?2, last_activity = datetime('now') WHERE id = ?1",
            session_id,
            prompt,
        )
    }

    pub fn set_enabled_tools(&self, session_id: &str, tools: &[String]) -> Result<(), AgentError> {
        let tools_json = serde_json::to_string(tools)?;
        self.update_session(
            "UPDATE sessions SET enabled_tools = ?2, last_activity = datetime('now') WHERE id = ?1",
            session_id,
            &tools_json,
        )
    }

    /// Replace the streaming buffer.
    pub fn set_streaming_message(&self, session_id: &str, text: &str) -> Result<(), AgentError> {
        self.update_session(
            "UPDATE sessions SET streaming_message = ?2 WHERE id = ?1",
            session_id,
            text,
        )
    }

    /// Concatenate onto the streaming buffer and return the buffer as it now
    /// stands.
    pub fn append_streaming_message(&self, session_id: &str, chunk: &str) -> Result<String, AgentError> {
        let buffer = self.conn.query_row(
            "UPDATE sessions SET streaming_message = streaming_message || ?2 WHERE id = ?1
             RETURNING streaming_message",
            params![session_id, chunk],
            |row| row.get(0),
        )?;
        Ok(buffer)
    }

    fn update_session(&self, sql: &str, session_id: &str, value: &str) -> Result<(), AgentError> {
        self.conn.execute(sql, params![session_id, value])?;
        Ok(())
    }

    /// Clear the processing flag of every session.
    ///
    /// Run once at startup: no turn can be in flight in a fresh process, so a
    /// set flag means the previous process died mid-turn.
    pub fn recover_interrupted(&self) -> Result<usize, AgentError> {
        let count = self.conn.execute(
            "UPDATE sessions SET is_processing = 0, streaming_message = ''
             WHERE is_processing = 1 OR streaming_message != ''",
            [],
        )?;
        Ok(count)
    }

    // ─── Turns ──────────────────────────────────────────────────────────

    /// Append the user message and raise the processing flag, atomically.
    pub fn begin_turn(&mut self, session_id: &str, message: &Message) -> Result<(), AgentError> {
        let tx = self.conn.transaction()?;
        insert_message(&tx, session_id, message)?;
        tx.execute(
            "UPDATE sessions SET is_processing = 1, last_activity = datetime('now')
             WHERE id = ?1",
            params![session_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Append the closing assistant message, lower the processing flag and
    /// empty the streaming buffer, atomically.
    pub fn finish_turn(&mut self, session_id: &str, message: &Message) -> Result<(), AgentError> {
        let tx = self.conn.transaction()?;
        insert_message(&tx, session_id, message)?;
        tx.execute(
            "UPDATE sessions
             SET is_processing = 0, streaming_message = '', last_activity = datetime('now')
             WHERE id = ?1",
            params![session_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ─── Messages ───────────────────────────────────────────────────────

    /// All messages for a session in append order.
    pub fn get_messages(&self, session_id: &str) -> Result<Vec<Message>, AgentError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, role, content, timestamp, tool_calls
             FROM messages
             WHERE session_id = ?1
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, role, content, timestamp, tool_calls) = row?;
            let role = MessageRole::parse(&role).ok_or_else(|| AgentError::DatabaseError {
                reason: format!("unknown role '{role}' on message {id}"),
            })?;
            let tool_calls = match tool_calls {
                Some(json) => Some(serde_json::from_str::<Vec<ToolCallRecord>>(&json)?),
                None => None,
            };
            messages.push(Message {
                id,
                role,
                content,
                timestamp,
                tool_calls,
            });
        }
        Ok(messages)
    }

    /// Delete every message of a session. Returns the number removed.
    pub fn delete_messages(&self, session_id: &str) -> Result<usize, AgentError> {
        let count = self.conn.execute(
            "DELETE FROM messages WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(count)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn insert_message(conn: &Connection, session_id: &str, msg: &Message) -> Result<(), AgentError> {
    let tool_calls_json = match &msg.tool_calls {
        Some(calls) => Some(serde_json::to_string(calls)?),
        None => None,
    };
    conn.execute(
        "INSERT INTO messages (id, session_id, role, content, timestamp, tool_calls)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            msg.id,
            session_id,
            msg.role.as_str(),
            msg.content,
            msg.timestamp,
            tool_calls_json,
        ],
    )?;
    Ok(())
}

fn parse_json_array(json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_default()
}

// ─── Tests ──────────────────────────────────────────────────────────────────
