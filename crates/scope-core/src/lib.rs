//! `scope-core`
//!
//! Shared vocabulary of the fieldbus-scope workspace.
//!
//! ## Key Types
//!
//! - [`Timestamp`]: monotonic nanoseconds, the ordering key of every series
//! - [`DataPoint`]: a value paired with its timestamp
//! - [`SeriesKey`] / [`SeriesKind`]: identity and raw representation of a series
//! - [`Projection`]: bit/type projection applied by views
//! - [`ScopeError`]: error type of the engine

pub mod convert;
pub mod error;
pub mod key;
pub mod limits;
pub mod time;

pub use convert::{OutputType, Projection, ResolvedProjection, Value};
pub use error::{ScopeError, ScopeResult};
pub use key::{
    SeriesKey, SeriesKind, StatisticCategory, StatisticId, StatisticKind, StatisticScope,
};
pub use time::{TimeSeries, Timestamp};

use serde::{Deserialize, Serialize};

/// A value together with the instant it was sampled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint<V> {
    /// Sampled value.
    pub value: V,
    /// Sampling instant.
    pub timestamp: Timestamp,
}

impl<V> DataPoint<V> {
    /// Pair `value` with `timestamp`.
    pub const fn new(value: V, timestamp: Timestamp) -> Self {
        Self { value, timestamp }
    }

    /// Convert the value, keeping the timestamp.
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> DataPoint<U> {
        DataPoint {
            value: f(self.value),
            timestamp: self.timestamp,
        }
    }
}
