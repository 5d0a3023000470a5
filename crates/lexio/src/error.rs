use std::time::Duration;

use reqwest::StatusCode;

// Custom error type for remote translation calls
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned status code {0}")]
    Status(StatusCode),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed API response: {0}")]
    Protocol(String),

    #[error("No API key configured")]
    MissingApiKey,

    #[error(
        "Translation failed after {attempts} attempts: {last_error}. Check your network connection and API key"
    )]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl ClientError {
    /// Whether the caller should close the call immediately instead of
    /// paying for more attempts. Only missing credentials qualify; every
    /// transport or protocol failure is retried alike (see DESIGN.md).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClientError::MissingApiKey | ClientError::RetriesExhausted { .. }
        )
    }
}

// Errors surfaced while assembling the engine itself
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Failure of a submitted work unit, delivered through the completion
/// callback's error slot rather than unwound on a worker.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<ClientError> for TaskError {
    fn from(err: ClientError) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}
