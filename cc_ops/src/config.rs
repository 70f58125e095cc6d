//! Operator configuration.
//!
//! Consolidates all environment variable reads for the ops binary and
//! validates them before any database work starts.

use centelhas::EngineConfig;
use centelhas::config::ConfigError;
use centelhas::db::DatabaseConfig;
use std::time::Duration;

/// Default pause between reconciliation passes in watch mode
pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 60;

/// Complete operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct OpsConfig {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Retry and lock window settings for the engine
    pub engine: EngineConfig,
    /// Pause between reconciliation passes in watch mode
    pub watch_interval: Duration,
}

impl OpsConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `database_url_override` - Optional database URL override (from CLI args)
    /// * `interval_override` - Optional watch interval in seconds (from CLI args)
    ///
    /// # Errors
    ///
    /// Returns error if `DATABASE_URL` is missing and no override is given
    pub fn from_env(
        database_url_override: Option<String>,
        interval_override: Option<u64>,
    ) -> Result<Self, ConfigError> {
        let database = match database_url_override {
            Some(url) => DatabaseConfig::with_url(url),
            None => DatabaseConfig::from_env()?,
        };

        let interval_secs = interval_override
            .unwrap_or_else(|| parse_env_or("OPS_WATCH_INTERVAL_SECS", DEFAULT_WATCH_INTERVAL_SECS));

        Ok(OpsConfig {
            database,
            engine: EngineConfig::from_env(),
            watch_interval: Duration::from_secs(interval_secs),
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.engine.validate()?;

        if self.watch_interval.is_zero() {
            return Err(ConfigError::Invalid {
                var: "OPS_WATCH_INTERVAL_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn config() -> OpsConfig {
        OpsConfig {
            database: DatabaseConfig::development(),
            engine: EngineConfig::default(),
            watch_interval: Duration::from_secs(DEFAULT_WATCH_INTERVAL_SECS),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = config();
        config.watch_interval = Duration::ZERO;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "OPS_WATCH_INTERVAL_SECS"));
    }

    #[test]
    #[serial]
    fn test_missing_database_url() {
        // SAFETY: tests touching the environment are serialized
        unsafe { std::env::remove_var("DATABASE_URL") };

        let err = OpsConfig::from_env(None, None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { .. }));
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    #[serial]
    fn test_overrides_win() {
        // SAFETY: tests touching the environment are serialized
        unsafe {
            std::env::remove_var("DATABASE_URL");
            std::env::set_var("OPS_WATCH_INTERVAL_SECS", "5");
        }

        let config = OpsConfig::from_env(Some("postgres://ops@localhost/ledger".to_string()), Some(9))
            .unwrap();
        assert_eq!(config.database.database_url, "postgres://ops@localhost/ledger");
        assert_eq!(config.watch_interval, Duration::from_secs(9));

        let config = OpsConfig::from_env(Some("postgres://ops@localhost/ledger".to_string()), None)
            .unwrap();
        assert_eq!(config.watch_interval, Duration::from_secs(5));

        unsafe { std::env::remove_var("OPS_WATCH_INTERVAL_SECS") };
    }
}
