//! Shared handler state.

use std::sync::Arc;

use crate::agent_core::session_agent::SessionAgents;
use crate::agent_core::session_store::SessionStore;
use crate::agent_core::tool_registry::ToolRegistry;

#[derive(Clone)]
pub struct AppState {
    pub agents: Arc<SessionAgents>,
}

impl AppState {
    pub fn new(agents: Arc<SessionAgents>) -> Self {
        Self { agents }
    }

    pub fn store(&self) -> &SessionStore {
        self.agents.store()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.agents.config().registry
    }

    /// `live` or `mock`.
    pub fn mode(&self) -> &'static str {
        self.agents.config().mode.label()
    }
}
