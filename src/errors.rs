use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("query request failed after {attempts} attempt(s): {message}")]
    RequestFailed { attempts: u32, message: String },
    #[error("query rejected by remote ({status}): {message}")]
    ClientError { status: u16, message: String },
    #[error("query failed on remote ({status}): {message}")]
    ServerError { status: u16, message: String },
    #[error("query throttled ({status}) after {attempts} attempt(s)")]
    Throttled { status: u16, attempts: u32 },
    #[error("malformed query response: {0}")]
    MalformedResponse(String),
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl AppError {
    /// Short machine-readable tag, used in telemetry payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::RequestFailed { .. } => "request_failed",
            AppError::ClientError { .. } => "client_error",
            AppError::ServerError { .. } => "server_error",
            AppError::Throttled { .. } => "throttled",
            AppError::MalformedResponse(_) => "malformed_response",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Json(_) => "json",
            AppError::Http(_) => "http",
        }
    }

    /// Failures the query client retries before giving up.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::RequestFailed { .. } | AppError::Throttled { .. }
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::ClientError { status, .. }
            | AppError::ServerError { status, .. }
            | AppError::Throttled { status, .. } => Some(*status),
            _ => None,
        }
    }
}
