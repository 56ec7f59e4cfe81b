//! Error types and result handling for event persistence.
//!
//! Defines the structured error taxonomy shared by the storage layer and
//! the consume pipeline. Malformed inbound documents and store failures
//! are kept distinct because the router disposes of them differently.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for persistence and model operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Inbound document could not be parsed or is missing required fields.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Store operation failed (connectivity, query, constraint).
    #[error("storage error: {0}")]
    Storage(String),

    /// Unique or foreign key constraint violation.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input supplied by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested entity not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::ConstraintViolation(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                Self::ConstraintViolation(format!("foreign key constraint violation: {db_err}"))
            },
            _ => Self::Storage(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedPayload(err.to_string())
    }
}
