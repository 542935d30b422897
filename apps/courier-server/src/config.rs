//! Application configuration loaded from environment variables.
//!
//! Loading is fail-fast: required variables must be present and every
//! value must parse, or startup aborts with a clear message. Durations
//! use humantime syntax ("30s", "2m", "168h").

use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub rabbitmq: RabbitMqConfig,
    pub webhook: WebhookConfig,
    pub scheduler: SchedulerConfig,
    pub message: MessageConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub max_idle_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Cache is enabled only when a URL is set.
    pub url: Option<String>,
    pub cache_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct RabbitMqConfig {
    pub enabled: bool,
    pub url: Option<String>,
    pub messages_queue: String,
    pub retry_queue: String,
    pub dead_letter_queue: String,
    pub max_retries: u32,
    /// Seconds multiplied by attempt² for the broker-side backoff.
    pub retry_delay_multiplier: u64,
}

impl RabbitMqConfig {
    /// Push mode requires both the flag and a URL.
    pub fn is_active(&self) -> bool {
        self.enabled && self.url.as_deref().map_or(false, |url| !url.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub auth_key: String,
    pub timeout: Duration,
    /// Per-call re-attempts inside the sender. These compound with the
    /// message-level retry budget of 5: worst case is their product.
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub batch_size: i64,
}

#[derive(Debug, Clone)]
pub struct MessageConfig {
    pub max_length: usize,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
}

impl Config {
    /// Load and validate the full configuration.
    ///
    /// # Errors
    ///
    /// `ConfigError::MissingVar` for absent required variables,
    /// `ConfigError::InvalidValue` for unparseable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            server: ServerConfig {
                port: parse_or("SERVER_PORT", 8080)?,
                read_timeout: duration_or("SERVER_READ_TIMEOUT", Duration::from_secs(15))?,
                write_timeout: duration_or("SERVER_WRITE_TIMEOUT", Duration::from_secs(15))?,
            },
            database: DatabaseConfig {
                url: require("DATABASE_URL")?,
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 25)?,
                max_idle_connections: parse_or("DATABASE_MAX_IDLE_CONNECTIONS", 5)?,
            },
            redis: RedisConfig {
                url: optional("REDIS_URL"),
                cache_ttl: duration_or("REDIS_CACHE_TTL", Duration::from_secs(168 * 3600))?,
            },
            rabbitmq: RabbitMqConfig {
                enabled: bool_or("RABBITMQ_ENABLED", false)?,
                url: optional("RABBITMQ_URL"),
                messages_queue: string_or("RABBITMQ_MESSAGES_QUEUE", "messages.pending"),
                retry_queue: string_or("RABBITMQ_RETRY_QUEUE", "messages.retry"),
                dead_letter_queue: string_or("RABBITMQ_DLQ", "messages.dead_letter"),
                max_retries: parse_or("RABBITMQ_MAX_RETRIES", 5)?,
                retry_delay_multiplier: parse_or("RABBITMQ_RETRY_DELAY_MULTIPLIER", 60)?,
            },
            webhook: WebhookConfig {
                url: require("WEBHOOK_URL")?,
                auth_key: require("WEBHOOK_AUTH_KEY")?,
                timeout: duration_or("WEBHOOK_TIMEOUT", Duration::from_secs(30))?,
                max_retries: parse_or("WEBHOOK_MAX_RETRIES", 3)?,
            },
            scheduler: SchedulerConfig {
                interval: duration_or("SCHEDULER_INTERVAL", Duration::from_secs(120))?,
                batch_size: parse_or("SCHEDULER_BATCH_SIZE", 2)?,
            },
            message: MessageConfig {
                max_length: parse_or("MESSAGE_MAX_LENGTH", 160)?,
            },
            log: LogConfig {
                level: string_or("LOG_LEVEL", "info"),
            },
        })
    }
}

fn require(var: &str) -> Result<String, ConfigError> {
    match env::var(var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(var.to_string())),
    }
}

fn optional(var: &str) -> Option<String> {
    env::var(var).ok().filter(|value| !value.is_empty())
}

fn string_or(var: &str, default: &str) -> String {
    optional(var).unwrap_or_else(|| default.to_string())
}

fn parse_or<T: std::str::FromStr>(var: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match optional(var) {
        None => Ok(default),
        Some(value) => parse_value(var, &value),
    }
}

fn parse_value<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|error| ConfigError::InvalidValue {
        var: var.to_string(),
        message: format!("{error}"),
    })
}

fn bool_or(var: &str, default: bool) -> Result<bool, ConfigError> {
    parse_or(var, default)
}

fn duration_or(var: &str, default: Duration) -> Result<Duration, ConfigError> {
    match optional(var) {
        None => Ok(default),
        Some(value) => duration_value(var, &value),
    }
}

fn duration_value(var: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|error| ConfigError::InvalidValue {
        var: var.to_string(),
        message: format!("{error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_values_use_humantime_syntax() {
        assert_eq!(
            duration_value("X", "30s").unwrap(),
            Duration::from_secs(30)
        );
        assert_eq!(duration_value("X", "2m").unwrap(), Duration::from_secs(120));
        assert_eq!(
            duration_value("X", "168h").unwrap(),
            Duration::from_secs(168 * 3600)
        );
        assert!(duration_value("X", "banana").is_err());
    }

    #[test]
    fn numeric_values_report_the_variable() {
        let error = parse_value::<u16>("SERVER_PORT", "not-a-port").unwrap_err();
        assert!(error.to_string().contains("SERVER_PORT"));
    }

    #[test]
    fn bool_values_parse() {
        assert!(parse_value::<bool>("X", "true").unwrap());
        assert!(!parse_value::<bool>("X", "false").unwrap());
        assert!(parse_value::<bool>("X", "yes").is_err());
    }
}
