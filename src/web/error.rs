use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::docker::EngineError;

/// Coarse classes the boundary uses to decide how a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Auth,
    Conflict,
    Engine,
    Internal,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Configuration value not set: {0}")]
    NotSet(String),
    #[error("Secret not configured: {0}")]
    NotConfigured(String),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("CSRF token mismatch")]
    CsrfMismatch,
    #[error("Session expired")]
    SessionExpired,
    #[error("A backup operation is already running: {0}")]
    AlreadyRunning(String),
    #[error("Already installed")]
    AlreadyInstalled,
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Container engine error: {0}")]
    Engine(String),
    #[error("Password hashing failed: {0}")]
    PasswordHashingError(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidInput(_) | AppError::NotSet(_) | AppError::NotConfigured(_) => {
                ErrorKind::Validation
            }
            AppError::InvalidCredentials | AppError::CsrfMismatch | AppError::SessionExpired => {
                ErrorKind::Auth
            }
            AppError::AlreadyRunning(_) | AppError::AlreadyInstalled => ErrorKind::Conflict,
            AppError::NotFound(_) | AppError::Engine(_) => ErrorKind::Engine,
            AppError::PasswordHashingError(_) | AppError::InternalServerError(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidInput(_) | AppError::NotSet(_) | AppError::NotConfigured(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::InvalidCredentials | AppError::SessionExpired => StatusCode::UNAUTHORIZED,
            AppError::CsrfMismatch => StatusCode::FORBIDDEN,
            AppError::AlreadyRunning(_) | AppError::AlreadyInstalled => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Engine(_) => StatusCode::BAD_GATEWAY,
            AppError::PasswordHashingError(_) | AppError::InternalServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(name) => AppError::NotFound(name),
            other => AppError::Engine(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalServerError(format!("JSON serialization/deserialization error: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalServerError(format!("I/O error: {err}"))
    }
}
