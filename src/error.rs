//! Error types for the orchestration engine.
//!
//! Two layers: [`BackendError`] is what a single remote specialist call can
//! fail with, and is always contained by the invoker. [`OrchestratorError`]
//! is the only class that may abort a run, and only before any specialist
//! has executed.

use crate::models::FailureKind;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by the remote reasoning/tool-execution collaborator.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("tool error: {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl BackendError {
    /// Classify into the failure taxonomy carried by specialist results.
    pub fn kind(&self) -> FailureKind {
        match self {
            BackendError::Timeout(_) => FailureKind::Timeout,
            BackendError::RateLimited { .. } => FailureKind::RateLimited,
            BackendError::Tool { .. } => FailureKind::ToolError,
            BackendError::InvalidResponse(_) => FailureKind::InvalidOutput,
            BackendError::Api { .. } | BackendError::Transport(_) => FailureKind::Unknown,
        }
    }

    /// Server-provided hint for how long to wait before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Run-level failures. Anything else is recorded per specialist.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("repository context error: {0}")]
    Context(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
