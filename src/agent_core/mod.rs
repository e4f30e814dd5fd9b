//! Agent Core: per-session chat orchestration.
//!
//! Submodules:
//! - `conversation`: Context windows and completion request construction
//! - `database`: SQLite persistence for sessions and messages
//! - `session_store`: The only path through which session state changes
//! - `tool_registry`: Built-in tool catalog merged with bridge tools
//! - `tool_executor`: Runs one tool call, failures become error results
//! - `mock`: Keyword-driven replies when no completion endpoint is configured
//! - `orchestrator`: Two-phase turn (completion, tools, follow-up)
//! - `session_agent`: Drives turns for one session under its turn lock
//! - `types`: Shared types across the agent core
//! - `errors`: Agent-level error types

pub mod conversation;
pub mod database;
pub mod errors;
pub mod mock;
pub mod orchestrator;
pub mod session_agent;
pub mod session_store;
pub mod tool_executor;
pub mod tool_registry;
pub mod types;

// Re-exports for convenience
pub use database::SessionDatabase;
pub use errors::AgentError;
pub use orchestrator::{ChatHandler, CompletionMode, HandlerConfig};
pub use session_agent::{SessionAgent, SessionAgents};
pub use session_store::SessionStore;
pub use tool_executor::ToolExecutor;
pub use tool_registry::ToolRegistry;
pub use types::{Message, MessageRole, SessionDefaults, SessionState, ToolCallRecord, ToolResult};
