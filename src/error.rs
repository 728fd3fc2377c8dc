//! Error taxonomy shared by the ingestion and PMS sync pipelines.

use axum::http::StatusCode;

/// Errors surfaced by pipeline entry points.
///
/// Client-facing conditions (`InvalidToken`, `InvalidInput`) are never
/// retried. `Configuration` is fatal for a whole sync call. Everything else is
/// an operator concern and must not leak detail to guests.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid QR code")]
    InvalidToken,
    #[error("{0}")]
    InvalidInput(String),
    #[error("PMS not configured: {0}")]
    Configuration(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl PipelineError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        PipelineError::InvalidInput(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::InvalidToken => StatusCode::NOT_FOUND,
            PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PipelineError::Configuration(_)
            | PipelineError::Storage(_)
            | PipelineError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show on the guest-facing boundary.
    pub fn guest_message(&self) -> String {
        match self {
            PipelineError::InvalidToken | PipelineError::InvalidInput(_) => self.to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::Storage(err.to_string())
    }
}
