//! Engine configuration.
//!
//! Consolidates the environment variables the accounting engine reads and
//! validates them before any store is opened.

use std::time::Duration;

use crate::db::timeouts::DEFAULT_LOCK_TIMEOUT;

/// Default number of retries after a conflicting unit of work
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default base backoff between retries in milliseconds
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 25;

/// Upper bound on a single backoff sleep
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Engine configuration loaded from environment variables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Retry behaviour for conflicting units of work
    pub retry: RetryPolicy,
    /// Longest time a unit of work may wait for its locks
    pub lock_timeout: Duration,
}

/// Bounded retry with jittered exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying
    pub max_retries: u32,
    /// Backoff before the first retry, doubled for each further retry
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Policy that gives up on the first conflict
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_backoff: Duration::ZERO,
        }
    }

    /// Total attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Deterministic part of the delay before retry number `retry` (1-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1).min(16));
        self.base_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// - `CENTELHAS_MAX_RETRIES` (default: 5)
    /// - `CENTELHAS_LOCK_TIMEOUT_MS` (default: 2000)
    /// - `CENTELHAS_RETRY_BACKOFF_MS` (default: 25)
    ///
    /// Unparseable values fall back to the default; out-of-range values are
    /// caught by [`EngineConfig::validate`].
    pub fn from_env() -> Self {
        let lock_timeout_ms = parse_env_or(
            "CENTELHAS_LOCK_TIMEOUT_MS",
            DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
        );

        Self {
            retry: RetryPolicy {
                max_retries: parse_env_or("CENTELHAS_MAX_RETRIES", DEFAULT_MAX_RETRIES),
                base_backoff: Duration::from_millis(parse_env_or(
                    "CENTELHAS_RETRY_BACKOFF_MS",
                    DEFAULT_RETRY_BACKOFF_MS,
                )),
            },
            lock_timeout: Duration::from_millis(lock_timeout_ms),
        }
    }

    /// Validate configuration after loading
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the offending variable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "CENTELHAS_LOCK_TIMEOUT_MS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.lock_timeout > Duration::from_secs(60) {
            return Err(ConfigError::Invalid {
                var: "CENTELHAS_LOCK_TIMEOUT_MS".to_string(),
                reason: "Must be at most 60000 (no unit of work waits unbounded)".to_string(),
            });
        }

        if self.retry.max_retries > 50 {
            return Err(ConfigError::Invalid {
                var: "CENTELHAS_MAX_RETRIES".to_string(),
                reason: "Must be at most 50".to_string(),
            });
        }

        if self.retry.base_backoff > MAX_BACKOFF {
            return Err(ConfigError::Invalid {
                var: "CENTELHAS_RETRY_BACKOFF_MS".to_string(),
                reason: format!("Must be at most {}", MAX_BACKOFF.as_millis()),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Parse an environment variable, falling back to `default`
pub(crate) fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
