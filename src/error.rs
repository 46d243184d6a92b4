use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Local chapter store cannot be opened or written.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Content API unreachable or answered with a non-success status.
    #[error("Network error: {0}")]
    Network(String),

    /// Content API answered successfully but the payload is malformed.
    #[error("Malformed content: {0}")]
    Content(String),

    /// Missing or invalid identifiers.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Progress store rejected or failed the upsert.
    #[error("Progress upsert failed: {0}")]
    RemoteUpsert(String),

    /// Missing or invalid credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Network(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(error = %self, "Request error");

        (status, self.to_string()).into_response()
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;
