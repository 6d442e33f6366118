use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine error kinds
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed file content (CSV, JSON, Excel)
    #[error("Parse error: {0}")]
    Parse(String),

    /// File extension the parser does not handle
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Malformed filter or query configuration
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network or authentication failure reaching a database or API
    #[error("Connection error: {0}")]
    Connection(String),

    /// The provider's driver is not compiled into this build
    #[error("Driver not installed: {driver}. {hint}")]
    DriverNotInstalled { driver: String, hint: String },

    /// The remote engine rejected or failed the query
    #[error("Query execution error: {0}")]
    QueryExecution(String),

    /// Key or payload problems with encrypted connection secrets
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Catalog store failure
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Prefix the message with `prefix`, keeping the error kind.
    pub fn context(self, prefix: &str) -> Self {
        let wrap = |msg: String| format!("{}: {}", prefix, msg);
        match self {
            AppError::Parse(msg) => AppError::Parse(wrap(msg)),
            AppError::UnsupportedFormat(msg) => AppError::UnsupportedFormat(wrap(msg)),
            AppError::Validation(msg) => AppError::Validation(wrap(msg)),
            AppError::Connection(msg) => AppError::Connection(wrap(msg)),
            AppError::DriverNotInstalled { driver, hint } => AppError::DriverNotInstalled {
                driver: wrap(driver),
                hint,
            },
            AppError::QueryExecution(msg) => AppError::QueryExecution(wrap(msg)),
            AppError::Encryption(msg) => AppError::Encryption(wrap(msg)),
            AppError::NotFound(msg) => AppError::NotFound(wrap(msg)),
            AppError::Storage(msg) => AppError::Storage(wrap(msg)),
            AppError::Internal(msg) => AppError::Internal(wrap(msg)),
        }
    }

    /// Stable machine-readable code used in API responses
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Parse(_) => "PARSE_ERROR",
            AppError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Connection(_) => "CONNECTION_ERROR",
            AppError::DriverNotInstalled { .. } => "DRIVER_NOT_INSTALLED",
            AppError::QueryExecution(_) => "QUERY_EXECUTION_ERROR",
            AppError::Encryption(_) => "ENCRYPTION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Parse(_)
            | AppError::UnsupportedFormat(_)
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Connection(_) | AppError::QueryExecution(_) => StatusCode::BAD_GATEWAY,
            AppError::DriverNotInstalled { .. } => StatusCode::NOT_IMPLEMENTED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Encryption(_) | AppError::Storage(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut detail = ErrorDetail::new(self.code(), self.to_string());

        if let AppError::DriverNotInstalled { hint, .. } = &self {
            detail = detail.with_details(hint.clone());
        }

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        (status, Json(ErrorResponse { error: detail })).into_response()
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Convert rusqlite::Error to AppError
impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}
