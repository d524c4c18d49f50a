//! # fieldbus-scope
//!
//! Concurrent time-series storage for fieldbus telemetry. A real-time
//! producer hands raw samples to a storage writer without blocking; consumers
//! read the stored series through cursors; derived error statistics and a
//! memory ceiling are maintained in the background.
//!
//! ## Crate Structure
//!
//! - **`scope-core`**: timestamps, series keys, projections and errors.
//! - **`scope-pool`**: triple buffer and fixed-capacity histories.
//! - **`scope-storage`**: time-series lists, views, registry and reclaimer.
//! - **`scope-stats`**: error statistics catalog and engine.
//!
//! This crate wires them together:
//!
//! - **`store`**: [`TelemetryStore`], the downstream API.
//! - **`acquisition`**: sample batches and the producer side of the handoff.
//! - **`writer`**: the storage writer thread.
//! - **`tasks`**: periodic reclamation and statistics on tokio.
//! - **`config`**: Figment configuration.
//! - **`tracing_setup`**: subscriber initialisation.
//! - **`simulator`**: synthetic bus for demos and tests.

pub mod acquisition;
pub mod config;
pub mod simulator;
pub mod store;
pub mod tasks;
pub mod tracing_setup;
pub mod writer;

pub use acquisition::{acquisition_channel, AcquisitionProducer, SampleBatch};
pub use config::{ConfigError, ScopeConfig};
pub use store::{BusLayout, IngestRates, RawValue, TelemetryStore};
pub use tasks::{BackgroundTasks, TaskSummary};
pub use writer::{BatchDrain, StorageWriter, WriterReport};
