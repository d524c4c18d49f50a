//! Tracing initialisation for the binary and integration tests.
//!
//! Library crates only emit `tracing` events; this module installs the
//! `tracing-subscriber` stack that prints them:
//! - an [`EnvFilter`] (`RUST_LOG` wins over the configured level)
//! - one `fmt` layer in pretty, compact or JSON form
//!
//! # Example
//! ```no_run
//! use fieldbus_scope::{config::ScopeConfig, tracing_setup};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ScopeConfig::from_env()?;
//! tracing_setup::init_from_config(&config)?;
//! info!(slaves = 4, "acquisition started");
//! # Ok(())
//! # }
//! ```

use crate::config::ScopeConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer,
};

/// Errors raised while installing the subscriber.
#[derive(Error, Debug)]
pub enum TracingError {
    /// Unknown level name.
    #[error("Invalid log level '{0}'. Must be one of: trace, debug, info, warn, error")]
    InvalidLevel(String),

    /// The subscriber could not be installed.
    #[error("Failed to initialize tracing: {0}")]
    Init(#[from] TryInitError),
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, coloured (development)
    #[default]
    Pretty,
    /// One line per event, no colours
    Compact,
    /// One JSON object per event (log aggregation)
    Json,
}

/// Subscriber options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level used when `RUST_LOG` is not set
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Log span creation and close
    pub with_span_events: bool,
    /// Include thread names (the storage writer is a named thread)
    pub with_thread_names: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_thread_names: true,
        }
    }
}

impl TracingConfig {
    /// Options at `level` with defaults otherwise
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Options from the `application.log_level` setting
    pub fn from_scope_config(config: &ScopeConfig) -> Result<Self, TracingError> {
        Ok(Self::new(parse_log_level(&config.application.log_level)?))
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span events
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }
}

/// Install the subscriber described by the configuration file settings.
pub fn init_from_config(config: &ScopeConfig) -> Result<(), TracingError> {
    init(TracingConfig::from_scope_config(config)?)
}

/// Install the global subscriber.
///
/// Idempotent: when a subscriber is already installed (tests, embedding
/// applications) this returns `Ok(())`.
pub fn init(config: TracingConfig) -> Result<(), TracingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));
    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .with_span_events(span_events)
        .with_thread_names(config.with_thread_names);
    let layer = match config.format {
        OutputFormat::Pretty => layer.pretty().with_filter(filter).boxed(),
        OutputFormat::Compact => layer.compact().with_ansi(false).with_filter(filter).boxed(),
        OutputFormat::Json => layer.json().with_filter(filter).boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        // Expected in tests and when several components race to install one.
        Err(e) if already_installed(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn already_installed(err: &TryInitError) -> bool {
    err.to_string()
        .contains("a global default trace dispatcher has already been set")
}

/// Parse a level name, case-insensitively
pub fn parse_log_level(level: &str) -> Result<Level, TracingError> {
    Level::from_str(&level.to_lowercase())
        .ok()
        .filter(|_| !level.chars().all(|c| c.is_ascii_digit()))
        .ok_or_else(|| TracingError::InvalidLevel(level.to_string()))
}
