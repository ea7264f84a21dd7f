//! Storage-specific error types for SQLite operations.
//!
//! Diesel and r2d2 failures are wrapped here and converted to the
//! store-agnostic errors of `livesync_core` before leaving this crate.
//! Connection-level failures surface as `Error::StoreUnavailable` so the core
//! can retry them.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use livesync_core::errors::{DatabaseError, Error};
use thiserror::Error;

/// Storage-specific errors that wrap Diesel and r2d2 types.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[from] diesel::ConnectionError),

    #[error("Connection pool error: {0}")]
    PoolError(#[from] r2d2::Error),

    #[error("Query execution failed: {0}")]
    QueryFailed(#[from] DieselError),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Writer actor stopped: {0}")]
    WriterStopped(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A core error raised inside a write job, carried through the
    /// transaction wrapper unchanged.
    #[error(transparent)]
    Core(Error),
}

impl From<Error> for StorageError {
    fn from(err: Error) -> Self {
        StorageError::Core(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

/// SQLite reports lock contention as a generic database error.
fn is_busy(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("database is locked") || message.contains("busy")
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ConnectionFailed(e) => Error::StoreUnavailable(e.to_string()),
            StorageError::PoolError(e) => Error::StoreUnavailable(e.to_string()),
            StorageError::WriterStopped(e) => Error::StoreUnavailable(e),
            StorageError::Io(e) => Error::StoreUnavailable(e.to_string()),
            StorageError::QueryFailed(DieselError::NotFound) => {
                Error::Database(DatabaseError::QueryFailed("Record not found".to_string()))
            }
            StorageError::QueryFailed(DieselError::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                info,
            )) => Error::Database(DatabaseError::UniqueViolation(info.message().to_string())),
            StorageError::QueryFailed(DieselError::DatabaseError(
                DatabaseErrorKind::ClosedConnection,
                info,
            )) => Error::StoreUnavailable(info.message().to_string()),
            StorageError::QueryFailed(DieselError::DatabaseError(kind, info))
                if is_busy(info.message()) =>
            {
                Error::StoreUnavailable(format!("{:?}: {}", kind, info.message()))
            }
            StorageError::QueryFailed(e @ DieselError::RollbackTransaction)
            | StorageError::QueryFailed(e @ DieselError::AlreadyInTransaction) => {
                Error::Database(DatabaseError::TransactionFailed(e.to_string()))
            }
            StorageError::QueryFailed(e) => {
                Error::Database(DatabaseError::QueryFailed(e.to_string()))
            }
            StorageError::MigrationFailed(e) => Error::Database(DatabaseError::MigrationFailed(e)),
            StorageError::SerializationError(e) => Error::Serialization(e),
            StorageError::Core(e) => e,
        }
    }
}

/// Extension trait for converting Diesel and r2d2 Results to core Results.
pub trait IntoCore<T> {
    fn into_core(self) -> livesync_core::Result<T>;
}

impl<T> IntoCore<T> for std::result::Result<T, DieselError> {
    fn into_core(self) -> livesync_core::Result<T> {
        self.map_err(|e| StorageError::from(e).into())
    }
}

impl<T> IntoCore<T> for std::result::Result<T, r2d2::Error> {
    fn into_core(self) -> livesync_core::Result<T> {
        self.map_err(|e| StorageError::from(e).into())
    }
}

impl<T> IntoCore<T> for std::result::Result<T, StorageError> {
    fn into_core(self) -> livesync_core::Result<T> {
        self.map_err(Error::from)
    }
}
