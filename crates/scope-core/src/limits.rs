//! Default sizing of the storage engine and its background tasks.
//!
//! These are the values used when the configuration file leaves a setting
//! out. Keeping them in one place keeps the storage, statistics and service
//! crates in agreement.

use std::time::Duration;

// =============================================================================
// Series Layout
// =============================================================================

/// Points per node. A node is the unit of allocation and of eviction.
pub const DEFAULT_NODE_CAPACITY: usize = 1000;

/// Width of one time bucket in the seek index.
///
/// A seek jumps to the bucket of the requested instant and scans forward from
/// there, so the residual scan covers at most one bucket of points.
pub const DEFAULT_BUCKET_WIDTH: Duration = Duration::from_secs(1);

// =============================================================================
// Memory Reclamation
// =============================================================================

/// Fraction of the memory budget that triggers reclamation.
pub const DEFAULT_HIGH_WATER: f64 = 0.9;

/// Fraction of the memory budget reclamation frees down to.
pub const DEFAULT_LOW_WATER: f64 = 0.7;

/// Share of each reclamation target taken from high-churn series (process image).
pub const DEFAULT_HIGH_CHURN_QUOTA: f64 = 0.05;

/// Interval of the periodic reclamation task.
pub const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_millis(250);

// =============================================================================
// Statistics
// =============================================================================

/// Samples kept per statistic for frequency computation.
pub const DEFAULT_STATISTIC_HISTORY: usize = 100;

/// Sampling resolution of the statistics engine.
pub const DEFAULT_STATISTIC_RESOLUTION: Duration = Duration::from_millis(30);

// =============================================================================
// Acquisition
// =============================================================================

/// Sleep of the storage writer when no fresh batch is available.
pub const DEFAULT_WRITER_IDLE: Duration = Duration::from_millis(1);

/// Batch timestamps kept for ingest rate estimation.
pub const DEFAULT_RATE_WINDOW: usize = 100;

/// Initial byte arena of one acquisition batch.
pub const DEFAULT_BATCH_CAPACITY_BYTES: usize = 64 * 1024;
