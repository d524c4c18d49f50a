//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, every key optional)
//! 2. Environment variables prefixed with `FIELDBUS_SCOPE_`, sections
//!    separated by a double underscore
//!
//! Durations are written in humantime notation (`250ms`, `1s`).
//!
//! # Example
//! ```no_run
//! use fieldbus_scope::config::ScopeConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // FIELDBUS_SCOPE_STORAGE__MEMORY_BUDGET_BYTES=1000000 overrides the file
//! let config = ScopeConfig::load_from("config/fieldbus-scope.toml")?;
//! println!("Application: {}", config.application.name);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use scope_core::limits::{
    DEFAULT_BATCH_CAPACITY_BYTES, DEFAULT_BUCKET_WIDTH, DEFAULT_HIGH_CHURN_QUOTA,
    DEFAULT_HIGH_WATER, DEFAULT_LOW_WATER, DEFAULT_NODE_CAPACITY, DEFAULT_RATE_WINDOW,
    DEFAULT_RECLAIM_INTERVAL, DEFAULT_STATISTIC_HISTORY, DEFAULT_STATISTIC_RESOLUTION,
    DEFAULT_WRITER_IDLE,
};
use scope_stats::StatisticsConfig;
use scope_storage::{ReclaimPolicy, SeriesConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "FIELDBUS_SCOPE_";

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File or environment could not be parsed.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A value is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Series layout and memory budget
    pub storage: StorageConfig,
    /// Derived statistics
    pub statistics: StatisticsSettings,
    /// Producer to writer handoff
    pub acquisition: AcquisitionConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "fieldbus-scope".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Slots per node
    #[serde(default = "default_node_capacity")]
    pub node_capacity: usize,
    /// Width of a time-index bucket
    #[serde(default = "default_bucket_width", with = "humantime_serde")]
    pub bucket_width: Duration,
    /// Memory ceiling in bytes (0 = unlimited)
    #[serde(default)]
    pub memory_budget_bytes: usize,
    /// Fraction of the budget that triggers reclamation
    #[serde(default = "default_high_water")]
    pub high_water: f64,
    /// Fraction of the budget reclamation frees down to
    #[serde(default = "default_low_water")]
    pub low_water: f64,
    /// Share of each pass taken from high-churn series
    #[serde(default = "default_high_churn_quota")]
    pub high_churn_quota: f64,
    /// Period of the background reclamation task
    #[serde(default = "default_reclaim_interval", with = "humantime_serde")]
    pub reclaim_interval: Duration,
}

/// Statistics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSettings {
    /// Totals kept per statistic for frequency computation
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Tick period and counter sampling resolution
    #[serde(default = "default_resolution", with = "humantime_serde")]
    pub resolution: Duration,
}

/// Acquisition configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Writer sleep when no batch is pending
    #[serde(default = "default_writer_idle", with = "humantime_serde")]
    pub writer_idle: Duration,
    /// Cycles kept for ingest rate estimation
    #[serde(default = "default_rate_window")]
    pub rate_window: usize,
    /// Initial byte arena of every batch
    #[serde(default = "default_batch_capacity")]
    pub batch_capacity_bytes: usize,
}

// Default value functions
fn default_node_capacity() -> usize {
    DEFAULT_NODE_CAPACITY
}

fn default_bucket_width() -> Duration {
    DEFAULT_BUCKET_WIDTH
}

fn default_high_water() -> f64 {
    DEFAULT_HIGH_WATER
}

fn default_low_water() -> f64 {
    DEFAULT_LOW_WATER
}

fn default_high_churn_quota() -> f64 {
    DEFAULT_HIGH_CHURN_QUOTA
}

fn default_reclaim_interval() -> Duration {
    DEFAULT_RECLAIM_INTERVAL
}

fn default_history_size() -> usize {
    DEFAULT_STATISTIC_HISTORY
}

fn default_resolution() -> Duration {
    DEFAULT_STATISTIC_RESOLUTION
}

fn default_writer_idle() -> Duration {
    DEFAULT_WRITER_IDLE
}

fn default_rate_window() -> usize {
    DEFAULT_RATE_WINDOW
}

fn default_batch_capacity() -> usize {
    DEFAULT_BATCH_CAPACITY_BYTES
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            node_capacity: default_node_capacity(),
            bucket_width: default_bucket_width(),
            memory_budget_bytes: 0,
            high_water: default_high_water(),
            low_water: default_low_water(),
            high_churn_quota: default_high_churn_quota(),
            reclaim_interval: default_reclaim_interval(),
        }
    }
}

impl Default for StatisticsSettings {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
            resolution: default_resolution(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            writer_idle: default_writer_idle(),
            rate_window: default_rate_window(),
            batch_capacity_bytes: default_batch_capacity(),
        }
    }
}

impl StorageConfig {
    /// Layout of new series.
    pub fn series_config(&self) -> SeriesConfig {
        SeriesConfig {
            node_capacity: self.node_capacity,
            bucket_width: self.bucket_width,
        }
    }

    /// Reclamation thresholds.
    pub fn reclaim_policy(&self) -> ReclaimPolicy {
        ReclaimPolicy {
            high_water: self.high_water,
            low_water: self.low_water,
            high_churn_quota: self.high_churn_quota,
        }
    }
}

impl StatisticsSettings {
    /// Engine configuration.
    pub fn engine_config(&self) -> StatisticsConfig {
        StatisticsConfig {
            history_size: self.history_size,
            resolution: self.resolution,
        }
    }
}

impl ScopeConfig {
    /// Load configuration from a TOML file and environment variables
    ///
    /// A missing file is not an error; defaults and the environment apply.
    /// Example override: `FIELDBUS_SCOPE_APPLICATION__LOG_LEVEL=debug`
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.storage.node_capacity == 0 {
            return Err(ConfigError::Invalid(
                "storage.node_capacity must be positive".to_string(),
            ));
        }
        if self.storage.bucket_width.is_zero() {
            return Err(ConfigError::Invalid(
                "storage.bucket_width must be positive".to_string(),
            ));
        }
        if self.storage.reclaim_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "storage.reclaim_interval must be positive".to_string(),
            ));
        }
        self.storage
            .reclaim_policy()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        self.statistics
            .engine_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.statistics.resolution.is_zero() {
            return Err(ConfigError::Invalid(
                "statistics.resolution must be positive".to_string(),
            ));
        }

        if self.acquisition.rate_window < 2 {
            return Err(ConfigError::Invalid(format!(
                "acquisition.rate_window must be at least 2, got {}",
                self.acquisition.rate_window
            )));
        }

        Ok(())
    }
}
