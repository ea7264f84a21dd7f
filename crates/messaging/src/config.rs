//! Per-queue connection settings and reconnect backoff.

use std::fmt;
use std::time::Duration;

use crate::errors::BrokerError;

/// Connection settings of one logical queue.
#[derive(Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Broker URL, e.g. `amqp://localhost:5672/spot` or `memory://local`.
    pub host: String,
    pub user: String,
    pub password: String,
    /// Physical queue name on the broker.
    pub queue_name: String,
    /// Durable queues survive a broker restart.
    pub durable: bool,
}

impl QueueConfig {
    pub fn new(host: impl Into<String>, queue_name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: "guest".to_string(),
            password: "guest".to_string(),
            queue_name: queue_name.into(),
            durable: true,
        }
    }

    pub fn with_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// URL scheme of `host`, without the `://` separator.
    pub fn scheme(&self) -> Option<&str> {
        self.host
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .filter(|scheme| !scheme.is_empty())
    }

    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.scheme().is_none() {
            return Err(BrokerError::InvalidConfig(format!(
                "host '{}' has no scheme",
                self.host
            )));
        }
        if self.queue_name.trim().is_empty() {
            return Err(BrokerError::InvalidConfig(
                "queue name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for QueueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"***")
            .field("queue_name", &self.queue_name)
            .field("durable", &self.durable)
            .finish()
    }
}

/// Backoff between reconnect attempts after a connection loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    pub fn new(initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            initial_backoff,
            max_backoff,
        }
    }

    /// Delay before the given reconnect attempt (1-based), doubling each time.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(30))
    }
}
