//! Application configuration loaded from environment variables.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` bind address (default: `"0.0.0.0"`)
/// - `PORT` listen port (default: `3000`)
/// - `RUST_LOG` tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` `text` or `json` (default: `text`)
/// - `DATABASE_URL` PostgreSQL connection string; unset selects in-memory stores
/// - `SLOW_COMMAND_THRESHOLD_MS` (default: `500`)
/// - `CONSUMER_MAX_ATTEMPTS` (default: `3`)
/// - `CONSUMER_INITIAL_BACKOFF_MS` (default: `100`)
/// - `OUTBOX_RELAY_INTERVAL_MS` (default: `1000`)
/// - `OUTBOX_RELAY_GRACE_MS` (default: `5000`)
/// - `OUTBOX_MAX_ATTEMPTS` failed relays before a row is given up (default: `10`)
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub slow_command_threshold: Duration,
    pub consumer_max_attempts: u32,
    pub consumer_initial_backoff: Duration,
    pub outbox_relay_interval: Duration,
    pub outbox_relay_grace: Duration,
    pub outbox_max_attempts: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`; unset and empty keys take their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let log_format = match get("LOG_FORMAT") {
            None => defaults.log_format,
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "LOG_FORMAT",
                        value,
                        reason: "expected `text` or `json`".to_string(),
                    });
                }
            },
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse(&get, "PORT")?.unwrap_or(defaults.port),
            log_level: get("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            database_url: get("DATABASE_URL"),
            slow_command_threshold: millis(&get, "SLOW_COMMAND_THRESHOLD_MS")?
                .unwrap_or(defaults.slow_command_threshold),
            consumer_max_attempts: parse(&get, "CONSUMER_MAX_ATTEMPTS")?
                .unwrap_or(defaults.consumer_max_attempts),
            consumer_initial_backoff: millis(&get, "CONSUMER_INITIAL_BACKOFF_MS")?
                .unwrap_or(defaults.consumer_initial_backoff),
            outbox_relay_interval: millis(&get, "OUTBOX_RELAY_INTERVAL_MS")?
                .unwrap_or(defaults.outbox_relay_interval),
            outbox_relay_grace: millis(&get, "OUTBOX_RELAY_GRACE_MS")?
                .unwrap_or(defaults.outbox_relay_grace),
            outbox_max_attempts: parse(&get, "OUTBOX_MAX_ATTEMPTS")?
                .unwrap_or(defaults.outbox_max_attempts),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|value| {
            value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
                key,
                reason: err.to_string(),
                value,
            })
        })
        .transpose()
}

fn millis<G>(get: &G, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    Ok(parse::<u64, G>(get, key)?.map(Duration::from_millis))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            slow_command_threshold: pipeline::DEFAULT_SLOW_THRESHOLD,
            consumer_max_attempts: 3,
            consumer_initial_backoff: Duration::from_millis(100),
            outbox_relay_interval: Duration::from_millis(1_000),
            outbox_relay_grace: Duration::from_millis(5_000),
            outbox_max_attempts: domain::DEFAULT_OUTBOX_MAX_ATTEMPTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.slow_command_threshold, Duration::from_millis(500));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/carts"),
            ("CONSUMER_MAX_ATTEMPTS", "5"),
            ("OUTBOX_RELAY_GRACE_MS", "250"),
            ("OUTBOX_MAX_ATTEMPTS", "4"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/carts"));
        assert_eq!(config.consumer_max_attempts, 5);
        assert_eq!(config.outbox_relay_grace, Duration::from_millis(250));
        assert_eq!(config.outbox_max_attempts, 4);
    }

    #[test]
    fn test_empty_values_fall_back_to_defaults() {
        let config = Config::from_lookup(lookup(&[("PORT", ""), ("DATABASE_URL", " ")])).unwrap();
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = Config::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        let err = Config::from_lookup(lookup(&[("LOG_FORMAT", "xml")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "LOG_FORMAT", .. }));
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }
}
