//! Error types for the loan-support orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Error, Debug)]
pub enum DispatchError {

    // =============================
    // Turn Pipeline Errors
    // =============================

    #[error("Dispatch error: {0}")]
    GraphError(String),

    #[error("Handler not found: {0}")]
    HandlerNotFound(String),

    #[error("Invalid handler input: {0}")]
    InvalidInput(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Retrieval error: {0}")]
    RetrievalError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
