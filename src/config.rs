//! Configuration Module
//!
//! Handles loading and managing cache layer configuration from environment variables.

use std::env;
use std::time::Duration;

use crate::error::{CacheError, Result};
use crate::feed::DEFAULT_DEBOUNCE;
use crate::fetch::RetryPolicy;

/// Cache layer configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// TTL for raw resources
    pub default_ttl: Duration,
    /// TTL for derived aggregates, independent of their sources
    pub aggregate_ttl: Duration,
    /// Retry policy applied to every fetch
    pub retry: RetryPolicy,
    /// Polling interval, None = polling disabled
    pub poll_interval: Option<Duration>,
    /// Debounce window for change events
    pub debounce: Duration,
    /// HTTP server port
    pub server_port: u16,
    /// Base URL of the remote API
    pub upstream_url: String,
    /// Per-request timeout enforced by the upstream client
    pub upstream_timeout: Duration,
    /// Resource names served through the cache
    pub resources: Vec<String>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `DEFAULT_TTL_MS` - Raw resource TTL (default: 30000)
    /// - `AGGREGATE_TTL_MS` - Aggregate TTL (default: 60000)
    /// - `RETRY_MAX_ATTEMPTS` - Attempts per fetch (default: 3)
    /// - `RETRY_BASE_DELAY_MS` - Delay before the second attempt (default: 200)
    /// - `RETRY_BACKOFF_FACTOR` - Delay multiplier per attempt (default: 2.0)
    /// - `POLL_INTERVAL_MS` - Polling interval, 0 disables polling (default: 30000)
    /// - `DEBOUNCE_MS` - Change event debounce window (default: 250)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `UPSTREAM_URL` - Remote API base URL (default: http://localhost:8080)
    /// - `UPSTREAM_TIMEOUT_MS` - Remote request timeout (default: 5000)
    /// - `RESOURCES` - Comma separated resource names (default: users,activities,posts)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let poll_ms = parse_var("POLL_INTERVAL_MS").unwrap_or(30_000u64);

        Self {
            default_ttl: millis_var("DEFAULT_TTL_MS").unwrap_or(defaults.default_ttl),
            aggregate_ttl: millis_var("AGGREGATE_TTL_MS").unwrap_or(defaults.aggregate_ttl),
            retry: RetryPolicy {
                max_attempts: parse_var("RETRY_MAX_ATTEMPTS")
                    .unwrap_or(defaults.retry.max_attempts),
                base_delay: millis_var("RETRY_BASE_DELAY_MS")
                    .unwrap_or(defaults.retry.base_delay),
                backoff_factor: parse_var("RETRY_BACKOFF_FACTOR")
                    .unwrap_or(defaults.retry.backoff_factor),
            },
            poll_interval: (poll_ms > 0).then(|| Duration::from_millis(poll_ms)),
            debounce: millis_var("DEBOUNCE_MS").unwrap_or(defaults.debounce),
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            upstream_url: env::var("UPSTREAM_URL").unwrap_or(defaults.upstream_url),
            upstream_timeout: millis_var("UPSTREAM_TIMEOUT_MS")
                .unwrap_or(defaults.upstream_timeout),
            resources: env::var("RESOURCES")
                .ok()
                .map(|v| parse_list(&v))
                .unwrap_or(defaults.resources),
        }
    }

    /// Rejects configurations the cache layer cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(CacheError::InvalidConfig(
                "RETRY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return Err(CacheError::InvalidConfig(
                "RETRY_BACKOFF_FACTOR must be a finite number >= 1.0".to_string(),
            ));
        }
        if self.default_ttl.is_zero() || self.aggregate_ttl.is_zero() {
            return Err(CacheError::InvalidConfig("TTLs must be non-zero".to_string()));
        }
        if self.resources.is_empty() {
            return Err(CacheError::InvalidConfig(
                "RESOURCES must name at least one resource".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(30),
            aggregate_ttl: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            poll_interval: Some(Duration::from_secs(30)),
            debounce: DEFAULT_DEBOUNCE,
            server_port: 3000,
            upstream_url: "http://localhost:8080".to_string(),
            upstream_timeout: Duration::from_secs(5),
            resources: vec![
                "users".to_string(),
                "activities".to_string(),
                "posts".to_string(),
            ],
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn millis_var(name: &str) -> Option<Duration> {
    parse_var::<u64>(name).map(Duration::from_millis)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.default_ttl, Duration::from_secs(30));
        assert_eq!(config.aggregate_ttl, Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.poll_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.resources, vec!["users", "activities", "posts"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_env_defaults() {
        for var in [
            "DEFAULT_TTL_MS",
            "AGGREGATE_TTL_MS",
            "RETRY_MAX_ATTEMPTS",
            "RETRY_BASE_DELAY_MS",
            "RETRY_BACKOFF_FACTOR",
            "POLL_INTERVAL_MS",
            "DEBOUNCE_MS",
            "SERVER_PORT",
            "UPSTREAM_URL",
            "UPSTREAM_TIMEOUT_MS",
            "RESOURCES",
        ] {
            env::remove_var(var);
        }

        let config = Config::from_env();
        assert_eq!(config.default_ttl, Duration::from_secs(30));
        assert_eq!(config.retry.base_delay, Duration::from_millis(200));
        assert_eq!(config.upstream_url, "http://localhost:8080");
        assert_eq!(config.resources.len(), 3);
    }

    #[test]
    fn test_parse_list_skips_blanks() {
        assert_eq!(parse_list(" users, ,posts ,"), vec!["users", "posts"]);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let mut config = Config::default();
        config.retry.backoff_factor = 0.5;
        assert!(config.validate().is_err());
    }
}
