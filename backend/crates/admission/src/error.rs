//! Admission Error Types
//!
//! Admission-specific error variants that integrate with the unified
//! `kernel::error::AppError` system.
//!
//! Propagation policy: validation and configuration errors surface to the
//! caller; store errors are recovered locally (fail-open) and only surface
//! through metrics and logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kernel::error::{app_error::AppError, kind::ErrorKind};
use thiserror::Error;

/// Admission-specific result type alias
pub type AdmissionResult<T> = Result<T, AdmissionError>;

/// Admission-specific error variants
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Malformed rule at load/reload time; the old rule set keeps serving
    #[error("Invalid rule configuration: {0}")]
    Configuration(String),

    /// Malformed request; rejected before any counter is touched
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Counter store transaction failed or timed out (fail-open path)
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AdmissionError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdmissionError::Configuration(_) | AdmissionError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            AdmissionError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AdmissionError::Database(_) | AdmissionError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the ErrorKind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdmissionError::Configuration(_) | AdmissionError::Validation(_) => {
                ErrorKind::BadRequest
            }
            AdmissionError::StoreUnavailable(_) => ErrorKind::ServiceUnavailable,
            AdmissionError::Database(_) | AdmissionError::Internal(_) => {
                ErrorKind::InternalServerError
            }
        }
    }

    /// Log the error with appropriate level
    fn log(&self) {
        match self {
            AdmissionError::Database(e) => {
                tracing::error!(error = %e, "Admission database error");
            }
            AdmissionError::Internal(msg) => {
                tracing::error!(message = %msg, "Admission internal error");
            }
            AdmissionError::StoreUnavailable(msg) => {
                tracing::warn!(message = %msg, "Counter store unavailable");
            }
            AdmissionError::Configuration(msg) => {
                tracing::warn!(message = %msg, "Rule configuration rejected");
            }
            AdmissionError::Validation(_) => {
                tracing::debug!(error = %self, "Request validation failed");
            }
        }
    }
}

impl From<AdmissionError> for AppError {
    fn from(err: AdmissionError) -> Self {
        let kind = err.kind();
        let message = err.to_string();
        AppError::new(kind, message)
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();
        match self {
            // Validation/configuration detail is safe and useful to callers
            AdmissionError::Configuration(msg) | AdmissionError::Validation(msg) => {
                (status, msg).into_response()
            }
            // Never leak internal detail
            _ => (status, ()).into_response(),
        }
    }
}

impl From<serde_json::Error> for AdmissionError {
    fn from(err: serde_json::Error) -> Self {
        AdmissionError::Internal(format!("counter state serialization: {err}"))
    }
}
