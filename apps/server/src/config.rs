use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use livesync_core::constants::{
    DEFAULT_PUBLISH_BACKOFF_MS, DEFAULT_PUBLISH_MAX_ATTEMPTS, DEFAULT_PUBLISH_MAX_BACKOFF_MS,
    DEFAULT_PUBLISH_TIMEOUT_MS, DEFAULT_SYNC_CONCURRENCY,
};
use livesync_core::publishing::PublishSettings;
use livesync_core::utils::RetryPolicy;
use livesync_messaging::{QueueConfig, ReconnectPolicy};
use thiserror::Error;

/// Production broker. Needs a transport registered for `amqp://`.
const DEFAULT_RABBITMQ_HOST: &str = "amqp://localhost:5672/spot";
/// Every other environment starts against the in-memory broker.
const DEFAULT_MEMORY_HOST: &str = "memory://local";
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}' ({reason})")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },
    #[error("Invalid queue configuration for {var}: {reason}")]
    InvalidQueue { var: String, reason: String },
}

/// Deployment mode of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppEnv {
    #[default]
    Development,
    Production,
    Test,
    Provision,
}

impl AppEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnv::Development => "development",
            AppEnv::Production => "production",
            AppEnv::Test => "test",
            AppEnv::Provision => "provision",
        }
    }
}

impl fmt::Display for AppEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppEnv {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(AppEnv::Development),
            "production" => Ok(AppEnv::Production),
            "test" => Ok(AppEnv::Test),
            "provision" => Ok(AppEnv::Provision),
            other => Err(format!(
                "expected development, production, test or provision, got '{}'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("json") {
            Ok(LogFormat::Json)
        } else if s.eq_ignore_ascii_case("text") {
            Ok(LogFormat::Text)
        } else {
            Err("expected text or json".to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub env: AppEnv,
    pub db_path: String,
    pub stats_queue: QueueConfig,
    pub globe_queue: QueueConfig,
    pub publish: PublishSettings,
    pub reconnect: ReconnectPolicy,
    /// `None` disables the periodic sync.
    pub sync_interval: Option<Duration>,
    pub sync_concurrency: usize,
    pub log_format: LogFormat,
}

impl Config {
    /// Loads `.env` (if present) and then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = parse_or(&lookup, "LIVESYNC_ENV", AppEnv::default())?;
        let db_path = lookup("LIVESYNC_DB_PATH").unwrap_or_else(|| "./db/livesync.db".into());

        let default_host = match env {
            AppEnv::Production => DEFAULT_RABBITMQ_HOST,
            _ => DEFAULT_MEMORY_HOST,
        };
        let stats_queue = queue_config(&lookup, "STATS", "stats_queue", default_host)?;
        let globe_queue = queue_config(&lookup, "GLOBE", "globe_queue", default_host)?;

        let max_attempts: u32 = parse_or(
            &lookup,
            "LIVESYNC_PUBLISH_MAX_ATTEMPTS",
            DEFAULT_PUBLISH_MAX_ATTEMPTS,
        )?;
        if max_attempts == 0 {
            return Err(invalid(
                "LIVESYNC_PUBLISH_MAX_ATTEMPTS",
                "0",
                "at least one attempt is required",
            ));
        }
        let backoff_ms: u64 =
            parse_or(&lookup, "LIVESYNC_PUBLISH_BACKOFF_MS", DEFAULT_PUBLISH_BACKOFF_MS)?;
        let max_backoff_ms: u64 = parse_or(
            &lookup,
            "LIVESYNC_PUBLISH_MAX_BACKOFF_MS",
            DEFAULT_PUBLISH_MAX_BACKOFF_MS,
        )?;
        if max_backoff_ms < backoff_ms {
            return Err(invalid(
                "LIVESYNC_PUBLISH_MAX_BACKOFF_MS",
                &max_backoff_ms.to_string(),
                "must not be lower than LIVESYNC_PUBLISH_BACKOFF_MS",
            ));
        }
        let timeout_ms: u64 =
            parse_or(&lookup, "LIVESYNC_PUBLISH_TIMEOUT_MS", DEFAULT_PUBLISH_TIMEOUT_MS)?;
        if timeout_ms == 0 {
            return Err(invalid(
                "LIVESYNC_PUBLISH_TIMEOUT_MS",
                "0",
                "the publish deadline must be positive",
            ));
        }

        let publish = PublishSettings {
            retry: RetryPolicy::new(
                max_attempts,
                Duration::from_millis(backoff_ms),
                Duration::from_millis(max_backoff_ms),
            ),
            timeout: Duration::from_millis(timeout_ms),
            store_retry: RetryPolicy::store_default(),
        };

        let sync_secs: u64 =
            parse_or(&lookup, "LIVESYNC_SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL_SECS)?;
        let sync_interval = (sync_secs > 0).then(|| Duration::from_secs(sync_secs));

        let sync_concurrency: usize =
            parse_or(&lookup, "LIVESYNC_SYNC_CONCURRENCY", DEFAULT_SYNC_CONCURRENCY)?;
        if sync_concurrency == 0 {
            return Err(invalid(
                "LIVESYNC_SYNC_CONCURRENCY",
                "0",
                "must be at least 1",
            ));
        }

        let log_format = parse_or(&lookup, "LIVESYNC_LOG_FORMAT", LogFormat::default())?;

        Ok(Self {
            env,
            db_path,
            stats_queue,
            globe_queue,
            publish,
            reconnect: ReconnectPolicy::default(),
            sync_interval,
            sync_concurrency,
            log_format,
        })
    }
}

fn invalid(var: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_or<T, F>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, &raw, &e.to_string())),
    }
}

fn queue_config<F>(
    lookup: &F,
    prefix: &str,
    default_queue: &str,
    default_host: &str,
) -> Result<QueueConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |suffix: &str| format!("{}_RABBITMQ_{}", prefix, suffix);
    let host = lookup(&var("HOST")).unwrap_or_else(|| default_host.to_string());
    let user = lookup(&var("USER")).unwrap_or_else(|| "guest".to_string());
    let password = lookup(&var("PASS")).unwrap_or_else(|| "guest".to_string());
    let queue_name = lookup(&var("QUEUE")).unwrap_or_else(|| default_queue.to_string());

    let config = QueueConfig::new(host, queue_name).with_credentials(user, password);
    config.validate().map_err(|e| ConfigError::InvalidQueue {
        var: var("HOST"),
        reason: e.to_string(),
    })?;
    Ok(config)
}
