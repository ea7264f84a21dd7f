//! Broker error types and their mapping onto core errors.

use livesync_core::errors::Error;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker unreachable at {host}: {reason}")]
    Unreachable { host: String, reason: String },

    #[error("Broker connection lost: {0}")]
    ConnectionLost(String),

    #[error("Publish confirm lost on queue '{0}'")]
    ConfirmLost(String),

    #[error("Broker rejected message on queue '{0}'")]
    Nacked(String),

    #[error("Queue '{0}' is not declared")]
    QueueNotDeclared(String),

    #[error("Unsupported broker scheme '{0}': this build only ships the memory:// transport")]
    UnsupportedScheme(String),

    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),

    #[error("Broker client is closed")]
    Closed,
}

impl BrokerError {
    /// The channel is gone and must be re-established before publishing.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            BrokerError::Unreachable { .. } | BrokerError::ConnectionLost(_) | BrokerError::Closed
        )
    }
}

impl From<BrokerError> for Error {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Unreachable { .. }
            | BrokerError::ConnectionLost(_)
            | BrokerError::Closed => Error::GatewayUnavailable(err.to_string()),
            BrokerError::ConfirmLost(_) | BrokerError::Nacked(_) => {
                Error::PublishUnconfirmed(err.to_string())
            }
            BrokerError::QueueNotDeclared(_)
            | BrokerError::UnsupportedScheme(_)
            | BrokerError::InvalidConfig(_) => Error::Unexpected(err.to_string()),
        }
    }
}
