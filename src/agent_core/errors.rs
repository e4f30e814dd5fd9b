//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;

/// Errors that can occur during agent core operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The first completion request of a turn failed.
    #[error("completion failed: {0}")]
    Completion(#[from] InferenceError),

    /// Database operation failed.
    #[error("database error: {reason}")]
    DatabaseError { reason: String },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

    /// Caller-supplied value rejected before touching state.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// A session lock was poisoned by a panicking writer.
    #[error("session store lock poisoned")]
    LockPoisoned,
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::DatabaseError {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::SerializationError {
            reason: e.to_string(),
        }
    }
}
