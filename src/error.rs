//! Error types for the deliberation engine

use crate::models::{AgentRole, DebateKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for deliberation operations
pub type Result<T> = std::result::Result<T, CouncilError>;

#[derive(Error, Debug)]
pub enum CouncilError {

    // =============================
    // Core Pipeline Errors
    // =============================

    /// Round limits, role lists, or backend parameters are inconsistent.
    /// Raised before any phase runs; a session is never created from a
    /// configuration that fails validation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A reasoning invocation errored, timed out, or returned malformed
    /// structured output. Never retried automatically.
    #[error("Invocation failure for {role}: {reason}")]
    Invocation { role: AgentRole, reason: String },

    /// The debate engine detected an ordering or cap violation it cannot
    /// recover from (e.g. a round started past the configured maximum).
    #[error("Round integrity violation in {debate} round {round}: {reason}")]
    RoundIntegrity {
        debate: DebateKind,
        round: u32,
        reason: String,
    },

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classification recorded in failure reports.
///
/// Discovery failures and retrieval degradation are absorbed where they
/// occur and never reach a report, so they have no variant here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Invocation,
    RoundIntegrity,
    Tool,
    Internal,
}

impl CouncilError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CouncilError::Configuration(_) => ErrorKind::Configuration,
            CouncilError::Invocation { .. } => ErrorKind::Invocation,
            CouncilError::RoundIntegrity { .. } => ErrorKind::RoundIntegrity,
            CouncilError::Tool(_) | CouncilError::ToolNotFound(_) => ErrorKind::Tool,
            _ => ErrorKind::Internal,
        }
    }
}
