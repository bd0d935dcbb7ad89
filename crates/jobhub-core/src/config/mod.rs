//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section. Every section has defaults, so an empty or missing file yields
//! a working configuration.

pub mod logging;
pub mod persistence;
pub mod retention;
pub mod retry;
pub mod scheduler;

use serde::{Deserialize, Serialize};

use self::logging::LoggingConfig;
use self::persistence::PersistenceConfig;
use self::retention::RetentionConfig;
use self::retry::RetryConfig;
use self::scheduler::SchedulerConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (base file + environment overlay + `JOBHUB__*`
/// environment variables).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Dispatch loop and worker pool settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Retry backoff settings.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Job state persistence settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Terminal record retention settings.
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges the base file at `path` with the optional `config/{env}`
    /// overlay and environment variables prefixed with `JOBHUB__`
    /// (e.g. `JOBHUB__SCHEDULER__MAX_WORKERS=8`).
    pub fn load(path: &str, env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("JOBHUB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.scheduler.max_workers == 0 {
            return Err(AppError::configuration(
                "scheduler.max_workers must be at least 1",
            ));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(AppError::configuration(
                "scheduler.poll_interval_ms must be greater than 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(AppError::configuration(format!(
                "retry.jitter must be within [0.0, 1.0], got {}",
                self.retry.jitter
            )));
        }
        if self.retry.max_delay_seconds < self.retry.base_delay_seconds {
            return Err(AppError::configuration(
                "retry.max_delay_seconds must not be smaller than retry.base_delay_seconds",
            ));
        }
        Ok(())
    }
}
