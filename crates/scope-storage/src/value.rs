//! Raw value types a series can store.

use bytes::Bytes;
use scope_core::{ResolvedProjection, SeriesKind, Value};

/// A raw value stored in a [`TimeSeriesList`](crate::TimeSeriesList).
///
/// Implemented for `u64` (words), `f64` (reals) and [`Bytes`] (frames).
pub trait SeriesValue: Clone + Send + Sync + 'static {
    /// Name used in kind mismatch errors.
    const TYPE_NAME: &'static str;

    /// Whether a series of `kind` stores this type.
    fn accepts(kind: SeriesKind) -> bool;

    /// Heap memory owned by the value, on top of its slot.
    fn heap_bytes(&self) -> usize {
        0
    }

    /// Apply a projection checked against the series kind.
    fn project(&self, projection: &ResolvedProjection) -> Value;
}

impl SeriesValue for u64 {
    const TYPE_NAME: &'static str = "word";

    fn accepts(kind: SeriesKind) -> bool {
        matches!(kind, SeriesKind::Word { .. })
    }

    fn project(&self, projection: &ResolvedProjection) -> Value {
        projection.project_word(*self)
    }
}

impl SeriesValue for f64 {
    const TYPE_NAME: &'static str = "real";

    fn accepts(kind: SeriesKind) -> bool {
        matches!(kind, SeriesKind::Real)
    }

    fn project(&self, projection: &ResolvedProjection) -> Value {
        projection.project_real(*self)
    }
}

impl SeriesValue for Bytes {
    const TYPE_NAME: &'static str = "frame";

    fn accepts(kind: SeriesKind) -> bool {
        matches!(kind, SeriesKind::Frame { .. })
    }

    fn heap_bytes(&self) -> usize {
        self.len()
    }

    fn project(&self, projection: &ResolvedProjection) -> Value {
        projection.project_frame(self)
    }
}
