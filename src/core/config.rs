//! # Configuration Module
//!
//! Configuration structures and loading for the caching and performance layer.
//!
//! ## Key Features
//! - YAML configuration parsing with serde
//! - Human-readable durations (`300s`, `15m`) via `humantime-serde`
//! - Environment variable overrides applied after file loading
//! - Validation that reports every problem at once

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::error::{ServiceError, ServiceResult};

/// Complete configuration for the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener settings
    pub server: ServerConfig,

    /// Key-value store connection settings
    pub redis: RedisConfig,

    /// HTTP response cache settings
    pub cache: CacheSettings,

    /// Fixed-window rate limiting settings
    pub rate_limit: RateLimitSettings,

    /// Request performance monitor settings
    pub performance: PerformanceSettings,

    /// Log output settings
    pub logging: LogConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file, then apply environment overrides.
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ServiceResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            ServiceError::config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let mut config: AppConfig = serde_yaml::from_str(&content)
            .map_err(|e| ServiceError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from defaults and environment variables only.
    pub fn from_env() -> ServiceResult<Self> {
        let mut config = AppConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// `REDIS_URL` is honored as-is so the service picks up the same connection
    /// string as the rest of the platform; every other override is prefixed
    /// with `SKILLSWAP_`.
    pub fn apply_env_overrides(&mut self) -> ServiceResult<()> {
        use std::env;

        if let Ok(url) = env::var("REDIS_URL") {
            self.redis.url = url;
        }

        if let Ok(enabled) = env::var("SKILLSWAP_REDIS_ENABLED") {
            self.redis.enabled = enabled.parse().map_err(|e| {
                ServiceError::config(format!("Invalid SKILLSWAP_REDIS_ENABLED: {}", e))
            })?;
        }

        if let Ok(addr) = env::var("SKILLSWAP_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Ok(port) = env::var("SKILLSWAP_SERVER_PORT") {
            self.server.port = port.parse().map_err(|e| {
                ServiceError::config(format!("Invalid SKILLSWAP_SERVER_PORT: {}", e))
            })?;
        }

        if let Ok(limit) = env::var("SKILLSWAP_RATE_LIMIT_REQUESTS") {
            self.rate_limit.requests_per_window = limit.parse().map_err(|e| {
                ServiceError::config(format!("Invalid SKILLSWAP_RATE_LIMIT_REQUESTS: {}", e))
            })?;
        }

        if let Ok(window) = env::var("SKILLSWAP_RATE_LIMIT_WINDOW") {
            self.rate_limit.window = humantime::parse_duration(&window).map_err(|e| {
                ServiceError::config(format!("Invalid SKILLSWAP_RATE_LIMIT_WINDOW: {}", e))
            })?;
        }

        if let Ok(threshold) = env::var("SKILLSWAP_SLOW_THRESHOLD") {
            self.performance.slow_threshold =
                humantime::parse_duration(&threshold).map_err(|e| {
                    ServiceError::config(format!("Invalid SKILLSWAP_SLOW_THRESHOLD: {}", e))
                })?;
        }

        if let Ok(level) = env::var("SKILLSWAP_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = env::var("SKILLSWAP_LOG_FORMAT") {
            self.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" | "pretty" => LogFormat::Text,
                other => {
                    return Err(ServiceError::config(format!(
                        "Invalid SKILLSWAP_LOG_FORMAT: {}",
                        other
                    )))
                }
            };
        }

        Ok(())
    }

    /// Validate the configuration, collecting every violation.
    pub fn validate(&self) -> ServiceResult<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be greater than 0".to_string());
        }

        if self.redis.enabled && self.redis.url.trim().is_empty() {
            errors.push("redis.url must be set when redis is enabled".to_string());
        }

        if self.redis.max_connect_attempts == 0 {
            errors.push("redis.max_connect_attempts must be greater than 0".to_string());
        }

        if self.redis.connect_timeout.is_zero() {
            errors.push("redis.connect_timeout must be greater than 0".to_string());
        }

        if self.redis.max_backoff < self.redis.initial_backoff {
            errors.push("redis.max_backoff must not be shorter than redis.initial_backoff".to_string());
        }

        if self.rate_limit.requests_per_window == 0 {
            errors.push("rate_limit.requests_per_window must be greater than 0".to_string());
        }

        if self.rate_limit.window.as_secs() == 0 {
            errors.push("rate_limit.window must be at least one second".to_string());
        }

        if self.performance.capacity == 0 {
            errors.push("performance.capacity must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::config(errors.join("; ")))
        }
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Key-value store connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection string
    pub url: String,

    /// Use Redis; when false the in-process backend is used instead
    pub enabled: bool,

    /// Per-command timeout
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Upper bound on a single connection attempt
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Consecutive failed connection attempts before giving up
    pub max_connect_attempts: u32,

    /// Delay before the second connection attempt
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Upper bound on the delay between attempts
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            enabled: true,
            command_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(3),
            max_connect_attempts: 10,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(3),
        }
    }
}

impl RedisConfig {
    /// Backoff before retrying after `attempt` consecutive failures (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// HTTP response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    #[serde(with = "humantime_serde")]
    pub response_ttl: Duration,
    pub max_body_bytes: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            response_ttl: Duration::from_secs(300),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub requests_per_window: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: 100,
            window: Duration::from_secs(15 * 60),
        }
    }
}

/// Performance monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    /// Number of metrics retained in the in-process window
    pub capacity: usize,

    /// Requests slower than this are logged and counted as slow
    #[serde(with = "humantime_serde")]
    pub slow_threshold: Duration,

    /// Expiry of the per-metric copies written to the store
    #[serde(with = "humantime_serde")]
    pub metric_ttl: Duration,

    /// Mirror every metric and the running counters into the store
    pub mirror_to_store: bool,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            capacity: 1000,
            slow_threshold: Duration::from_millis(1000),
            metric_ttl: Duration::from_secs(3600),
            mirror_to_store: true,
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.performance.capacity, 1000);
        assert_eq!(config.cache.response_ttl, Duration::from_secs(300));
        assert_eq!(config.redis.command_timeout, Duration::from_secs(10));
        assert_eq!(config.redis.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        config.performance.capacity = 0;
        config.rate_limit.requests_per_window = 0;
        config.redis.connect_timeout = Duration::ZERO;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("server.port"));
        assert!(err.contains("redis.connect_timeout"));
        assert!(err.contains("performance.capacity"));
        assert!(err.contains("rate_limit.requests_per_window"));
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let redis = RedisConfig::default();
        assert_eq!(redis.backoff_for(1), Duration::from_millis(50));
        assert_eq!(redis.backoff_for(2), Duration::from_millis(100));
        assert_eq!(redis.backoff_for(4), Duration::from_millis(400));
        assert_eq!(redis.backoff_for(10), Duration::from_secs(3));
        assert_eq!(redis.backoff_for(40), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_load_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  port: 8088
redis:
  enabled: false
rate_limit:
  requests_per_window: 5
  window: 30s
performance:
  slow_threshold: 250ms
logging:
  format: text
"#
        )
        .unwrap();

        let config = AppConfig::load_from_file(file.path()).await.unwrap();
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.rate_limit.requests_per_window, 5);
        assert_eq!(config.rate_limit.window, Duration::from_secs(30));
        assert_eq!(config.performance.slow_threshold, Duration::from_millis(250));
        assert_eq!(config.performance.capacity, 1000);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[tokio::test]
    async fn test_missing_file_is_configuration_error() {
        let err = AppConfig::load_from_file("/definitely/not/here.yaml")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Configuration { .. }));
    }
}
