//! Core error types for the staging pipeline.
//!
//! This module defines store- and broker-agnostic error types. Storage-specific
//! errors (Diesel, SQLite) and broker-specific errors are converted to these
//! types by the crates that implement the core traits.

use thiserror::Error;

use crate::staging::{EntityKind, StagingStatus};

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the staging pipeline.
///
/// Every command, query, publish and sync operation reports failures through
/// this enum. Variants map one-to-one onto the error taxonomy callers see.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller input is malformed. Never retried by the core.
    #[error("Input validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A Stats or Metric payload references a manifest that was never staged.
    #[error("{kind} references unknown manifest '{manifest_id}'")]
    Referential {
        kind: EntityKind,
        manifest_id: String,
    },

    /// Unknown id on read or status update.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },

    /// The requested status is not reachable from the current one.
    #[error("Invalid status transition for {kind} '{id}': {from} -> {to}")]
    InvalidTransition {
        kind: EntityKind,
        id: String,
        from: StagingStatus,
        to: StagingStatus,
    },

    /// The durability layer could not be reached.
    #[error("Staged entity store unavailable: {0}")]
    StoreUnavailable(String),

    /// The broker could not be reached; publish failed fast.
    #[error("Messaging gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// The broker was reachable but did not confirm the message
    /// (confirm lost, negative acknowledgment or publish deadline exceeded).
    #[error("Publish not confirmed: {0}")]
    PublishUnconfirmed(String),

    /// Publishing was retried up to the attempt ceiling and gave up.
    #[error("Publishing {kind} '{id}' failed after {attempts} attempt(s): {reason}")]
    PublishFailed {
        kind: EntityKind,
        id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Classification for retry policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// The failure is the caller's fault or terminal; retrying won't help.
    Never,
    /// Transient infrastructure failure; retry with exponential backoff.
    WithBackoff,
}

impl Error {
    /// Returns the retry classification for this error.
    ///
    /// ```
    /// use livesync_core::errors::{Error, RetryClass};
    ///
    /// let error = Error::StoreUnavailable("pool exhausted".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::WithBackoff);
    ///
    /// let error = Error::Unexpected("boom".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::StoreUnavailable(_)
            | Self::GatewayUnavailable(_)
            | Self::PublishUnconfirmed(_) => RetryClass::WithBackoff,

            Self::Validation(_)
            | Self::Referential { .. }
            | Self::NotFound { .. }
            | Self::InvalidTransition { .. }
            | Self::PublishFailed { .. }
            | Self::Database(_)
            | Self::Serialization(_)
            | Self::Unexpected(_) => RetryClass::Never,
        }
    }

    /// Shorthand for `retry_class() == RetryClass::WithBackoff`.
    pub fn is_transient(&self) -> bool {
        self.retry_class() == RetryClass::WithBackoff
    }

    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Database-agnostic error type for storage operations.
///
/// This enum uses `String` for all error details, allowing the storage layer
/// to convert storage-specific errors into this format.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// A database query failed to execute.
    #[error("Database query failed: {0}")]
    QueryFailed(String),

    /// A unique constraint was violated (e.g., duplicate key).
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// A database transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Database migration failed.
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Internal/unexpected database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

/// Validation errors for caller input.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Required field '{0}' is missing")]
    MissingField(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Malformed id '{0}'")]
    MalformedId(String),

    #[error("{kind} '{id}' already exists with a different payload")]
    ConflictingResubmission { kind: EntityKind, id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ValidationError {
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_retry_with_backoff() {
        for error in [
            Error::StoreUnavailable("down".to_string()),
            Error::GatewayUnavailable("offline".to_string()),
            Error::PublishUnconfirmed("confirm lost".to_string()),
        ] {
            assert_eq!(error.retry_class(), RetryClass::WithBackoff);
            assert!(error.is_transient());
        }
    }

    #[test]
    fn test_caller_errors_never_retry() {
        let error = Error::Referential {
            kind: EntityKind::Stats,
            manifest_id: "missing-id".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::Never);

        let error = Error::Validation(ValidationError::MissingField("body".to_string()));
        assert_eq!(error.retry_class(), RetryClass::Never);

        let error = Error::PublishFailed {
            kind: EntityKind::Metric,
            id: "x1".to_string(),
            attempts: 5,
            reason: "nacked".to_string(),
        };
        assert!(!error.is_transient());
    }

    #[test]
    fn test_error_display() {
        let error = Error::InvalidTransition {
            kind: EntityKind::Manifest,
            id: "m1".to_string(),
            from: StagingStatus::Synced,
            to: StagingStatus::Pending,
        };
        assert_eq!(
            error.to_string(),
            "Invalid status transition for manifest 'm1': SYNCED -> PENDING"
        );

        let error = Error::Referential {
            kind: EntityKind::Stats,
            manifest_id: "missing-id".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "stats references unknown manifest 'missing-id'"
        );
    }
}
