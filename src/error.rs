//! Error taxonomy for the ingest and report paths
//!
//! Validation and authorization failures have no side effects and are never
//! retried. Storage failures are the only retryable class.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input (subject id, period coordinate, event payload)
    #[error("validation error: {0}")]
    Validation(String),

    /// Requester is not the registered owner, or the subject is unregistered.
    /// Carries no detail so a non-owner cannot probe for existence.
    #[error("forbidden")]
    Forbidden,

    /// Ad metadata already registered for this subject
    #[error("ad metadata already exists")]
    AlreadyExists,

    /// Event log or rollup store unavailable
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Whether the caller may retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Storage(format!("serialization: {}", err))
    }
}

impl<T> From<std::sync::PoisonError<T>> for EngineError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        EngineError::Storage("connection mutex poisoned".to_string())
    }
}
