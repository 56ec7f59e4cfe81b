//! Error types for the consumption pipeline.
//!
//! Defines the failure conditions a message can hit between receipt and
//! persistence, and the coarse [`ErrorKind`] each maps to. Kinds are what
//! the classifier matches against the configured non-retryable set; the
//! router never inspects anything finer.

use std::fmt;

use statline_core::CoreError;
use thiserror::Error;

/// Result type alias for consumption operations.
pub type Result<T> = std::result::Result<T, ConsumeError>;

/// Coarse category of a processing failure.
///
/// The configured non-retryable set is a set of these kinds; handler
/// implementations tag their failures with one so classification stays
/// configuration-driven instead of hard-coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Inbound document unparsable or missing required fields.
    MalformedPayload,
    /// Durable store operation failed.
    Storage,
    /// Operation exceeded its time budget.
    Timeout,
    /// I/O failure talking to a collaborator.
    Io,
    /// Business-level validation rejected the message.
    Validation,
    /// Anything else.
    Other,
}

impl ErrorKind {
    /// All kinds, for registry population.
    pub const ALL: [Self; 6] = [
        Self::MalformedPayload,
        Self::Storage,
        Self::Timeout,
        Self::Io,
        Self::Validation,
        Self::Other,
    ];

    /// Canonical name of the kind, used as its registry key.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MalformedPayload => "MalformedPayload",
            Self::Storage => "Storage",
            Self::Timeout => "Timeout",
            Self::Io => "Io",
            Self::Validation => "Validation",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Error type for message consumption operations.
#[derive(Debug, Clone, Error)]
pub enum ConsumeError {
    /// Inbound payload could not be parsed into an event document.
    #[error("malformed payload: {message}")]
    MalformedPayload {
        /// What failed to parse
        message: String,
    },

    /// Store operation failed during persistence.
    #[error("storage failure: {message}")]
    Storage {
        /// Underlying store error message
        message: String,
    },

    /// Business handler failed with an explicit kind.
    #[error("handler failure ({kind}): {message}")]
    Handler {
        /// Kind the handler tagged the failure with
        kind: ErrorKind,
        /// Handler error message
        message: String,
    },

    /// Publishing to the dead-letter destination failed.
    ///
    /// Not retried by the router; surfaced to the hosting runtime.
    #[error("dead-letter publish to {destination} failed: {message}")]
    DeadLetterPublish {
        /// Destination channel the publish targeted
        destination: String,
        /// Transport error message
        message: String,
    },

    /// Message stream operation failed (receive, ack, nack).
    #[error("bus error: {message}")]
    Bus {
        /// Transport error message
        message: String,
    },

    /// Worker shutdown did not complete within the grace period.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Configured grace period
        timeout: std::time::Duration,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {message}")]
    WorkerPanic {
        /// Index of the panicked worker
        worker_id: usize,
        /// Join error rendering
        message: String,
    },
}

impl ConsumeError {
    /// Creates a malformed payload error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPayload { message: message.into() }
    }

    /// Creates a storage failure.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Creates a handler failure with an explicit kind.
    pub fn handler(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Handler { kind, message: message.into() }
    }

    /// Creates a bus transport error.
    pub fn bus(message: impl Into<String>) -> Self {
        Self::Bus { message: message.into() }
    }

    /// Creates a dead-letter publish failure.
    pub fn dead_letter(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeadLetterPublish { destination: destination.into(), message: message.into() }
    }

    /// The kind this failure classifies as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedPayload { .. } => ErrorKind::MalformedPayload,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Handler { kind, .. } => *kind,
            Self::DeadLetterPublish { .. } | Self::Bus { .. } => ErrorKind::Io,
            Self::ShutdownTimeout { .. } | Self::WorkerPanic { .. } => ErrorKind::Other,
        }
    }
}

impl From<CoreError> for ConsumeError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MalformedPayload(message) => Self::MalformedPayload { message },
            other => Self::Storage { message: other.to_string() },
        }
    }
}

impl From<serde_json::Error> for ConsumeError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedPayload { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_mapped_from_variants() {
        assert_eq!(ConsumeError::malformed("bad json").kind(), ErrorKind::MalformedPayload);
        assert_eq!(ConsumeError::storage("down").kind(), ErrorKind::Storage);
        assert_eq!(
            ConsumeError::handler(ErrorKind::Timeout, "slow upstream").kind(),
            ErrorKind::Timeout
        );
        assert_eq!(ConsumeError::bus("broker gone").kind(), ErrorKind::Io);
    }

    #[test]
    fn core_errors_preserve_kind() {
        let malformed: ConsumeError = CoreError::MalformedPayload("no eventDate".into()).into();
        assert_eq!(malformed.kind(), ErrorKind::MalformedPayload);

        let storage: ConsumeError = CoreError::Storage("connection reset".into()).into();
        assert_eq!(storage.kind(), ErrorKind::Storage);
    }

    #[test]
    fn error_display_format() {
        let err = ConsumeError::handler(ErrorKind::Timeout, "deadline exceeded");
        assert_eq!(err.to_string(), "handler failure (Timeout): deadline exceeded");

        let err = ConsumeError::dead_letter("status-dlt", "broker unreachable");
        assert_eq!(
            err.to_string(),
            "dead-letter publish to status-dlt failed: broker unreachable"
        );
    }
}
