//! Error types for DeepNote.

use thiserror::Error;

/// Core error type for all DeepNote operations.
#[derive(Error, Debug)]
pub enum DeepNoteError {
    /// Malformed inbound payload from a chat platform or API caller.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("LLM error: {0}")]
    Llm(String),

    /// User input did not match the shape the current state expects.
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Session expired after {0} minutes of inactivity")]
    SessionExpired(i64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, DeepNoteError>;

