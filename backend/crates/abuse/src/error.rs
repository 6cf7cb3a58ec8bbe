//! Abuse Error Types
//!
//! Detector and enforcement failures are recovered locally: a failing
//! detector contributes a zero risk score, a failing enforcement action is
//! logged. Nothing here ever propagates to the admission caller.

use kernel::error::{app_error::AppError, kind::ErrorKind};
use thiserror::Error;

/// Abuse-specific result type alias
pub type AbuseResult<T> = Result<T, AbuseError>;

/// Abuse-specific error variants
#[derive(Debug, Error)]
pub enum AbuseError {
    /// One detector failed; isolated from its siblings
    #[error("Detector '{detector}' failed: {message}")]
    Detector {
        detector: &'static str,
        message: String,
    },

    /// An enforcement action failed to execute
    #[error("Enforcement action failed: {0}")]
    ActionExecution(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AbuseError {
    /// Every abuse failure is internal; nothing here maps to a client error
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InternalServerError
    }
}

impl From<AbuseError> for AppError {
    fn from(err: AbuseError) -> Self {
        let kind = err.kind();
        let message = err.to_string();
        AppError::new(kind, message)
    }
}
