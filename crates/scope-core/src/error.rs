//! Error type shared by every fieldbus-scope crate.
//!
//! `ScopeError` covers the misuse conditions of the storage engine. All of them
//! are reported to the caller as `Err` values; nothing in the engine panics on
//! bad input.
//!
//! ## Error Hierarchy
//!
//! - **`EmptySeries`**: a view was dereferenced before it was positioned on a
//!   point. The caller should check `is_empty()` or `has_next()` first.
//! - **`InvalidProjection`**: a bit/type projection does not fit the raw
//!   representation of the series. Raised when the view is created, never
//!   while reading.
//! - **`UnknownSeries`** / **`DuplicateSeries`** / **`KindMismatch`**: registry
//!   lookups and declarations that do not match what was declared.
//! - **`RawLength`**: an upstream raw sample whose byte length does not match
//!   the declared kind.
//! - **`ConcurrentAppend`**: a second writer raced the single writer of a list.
//!   The conflicting point is rejected and the stored data stays intact.
//! - **`Configuration`**: semantic configuration errors caught by validation.
//!
//! Memory pressure and clock anomalies are deliberately absent: eviction is
//! silent and an anomalous statistics tick is skipped.

use crate::key::{SeriesKey, SeriesKind, StatisticId};
use thiserror::Error;

/// Errors raised by the storage engine and its facade.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScopeError {
    /// The view has not been positioned on any point yet.
    #[error("series has no data point at the view position")]
    EmptySeries,

    /// The projection cannot be applied to the series' raw representation.
    #[error("invalid projection for {kind}: {reason}")]
    InvalidProjection {
        /// Kind of the series the projection was checked against.
        kind: SeriesKind,
        /// Human readable rejection reason.
        reason: String,
    },

    /// No series has been declared under this key.
    #[error("unknown series: {0}")]
    UnknownSeries(SeriesKey),

    /// A series with this key already exists.
    #[error("series already declared: {0}")]
    DuplicateSeries(SeriesKey),

    /// The series exists but stores a different kind of value.
    #[error("series {key} stores {actual} values, not {expected}")]
    KindMismatch {
        /// Series key.
        key: SeriesKey,
        /// Kind the caller asked for.
        expected: String,
        /// Kind the series was declared with.
        actual: SeriesKind,
    },

    /// A series kind that cannot be stored (e.g. a 12-bit word).
    #[error("unsupported series kind: {0}")]
    UnsupportedKind(String),

    /// A raw sample does not have the byte length its kind requires.
    #[error("raw sample for {key} has {actual} bytes, expected {expected}")]
    RawLength {
        /// Series key.
        key: SeriesKey,
        /// Bytes required by the declared kind.
        expected: usize,
        /// Bytes received.
        actual: usize,
    },

    /// The statistic is not part of the catalog.
    #[error("unknown statistic: {0}")]
    UnknownStatistic(StatisticId),

    /// A second writer appended to a single-writer list at the same time.
    #[error("concurrent append detected on {0}")]
    ConcurrentAppend(SeriesKey),

    /// Semantic configuration error.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl ScopeError {
    /// Shorthand for an [`ScopeError::InvalidProjection`].
    pub fn invalid_projection(kind: SeriesKind, reason: impl Into<String>) -> Self {
        ScopeError::InvalidProjection {
            kind,
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the engine.
pub type ScopeResult<T> = std::result::Result<T, ScopeError>;
