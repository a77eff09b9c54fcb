//! Error types for the mortgage research agent

use thiserror::Error;

/// Result type alias for research agent operations
pub type Result<T> = std::result::Result<T, ResearchError>;

#[derive(Error, Debug)]
pub enum ResearchError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Action error: {0}")]
    ActionError(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Sequence violation: {0}")]
    SequenceViolation(String),

    #[error("Debate error: {0}")]
    DebateError(String),

    #[error("Knowledge invariant violated: {0}")]
    InvariantViolation(String),

    // =============================
    // Collaborator Errors
    // =============================

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Fetch error: {0}")]
    FetchError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl ResearchError {
    /// Wraps a sqlx failure with the operation that produced it.
    pub(crate) fn database(context: &str, error: sqlx::Error) -> Self {
        ResearchError::DatabaseError(format!("{}: {}", context, error))
    }
}
