//! Read cursors over a [`TimeSeriesList`].
//!
//! - [`PointView`]: forward-only cursor that yields points at least `step`
//!   apart, with a bit/type projection applied on read.
//! - [`LatestView`]: always reflects the newest point.
//!
//! Both are also available as the object-safe traits [`DataView`] and
//! [`NewestValueView`], so consumers can hold views of any series kind.

use crate::node::Location;
use crate::series::{TimeSeriesList, ViewAnchor};
use crate::value::SeriesValue;
use scope_core::time::duration_nanos;
use scope_core::{
    DataPoint, Projection, ResolvedProjection, ScopeError, ScopeResult, SeriesKey, Timestamp,
    Value,
};
use std::sync::Arc;
use std::time::Duration;

/// Forward cursor over a series.
///
/// A view created on an empty list starts unpositioned and moves onto the
/// oldest point on its first [`advance`](PointView::advance). Once positioned
/// it never moves backwards.
pub struct PointView<T: SeriesValue> {
    list: Arc<TimeSeriesList<T>>,
    position: Option<Location<T>>,
    step: Duration,
    projection: ResolvedProjection,
    anchor: Arc<ViewAnchor>,
}

impl<T: SeriesValue> PointView<T> {
    pub(crate) fn new(
        list: Arc<TimeSeriesList<T>>,
        position: Option<Location<T>>,
        step: Duration,
        projection: ResolvedProjection,
        anchor: Arc<ViewAnchor>,
    ) -> Self {
        Self {
            list,
            position,
            step,
            projection,
            anchor,
        }
    }

    fn next_location(&self) -> Option<Location<T>> {
        let Some(current) = &self.position else {
            return self.list.head_location();
        };
        if self.step.is_zero() {
            return current.successor();
        }
        let target = current.timestamp()?.saturating_add(self.step);
        current.find(target).ok()
    }

    /// Whether [`advance`](Self::advance) would move the view.
    pub fn has_next(&self) -> bool {
        self.next_location().is_some()
    }

    /// Move to the earliest point at least `step` after the current one.
    /// Does nothing when there is no such point.
    pub fn advance(&mut self) {
        if let Some(next) = self.next_location() {
            if let Some(ts) = next.timestamp() {
                self.anchor.set(ts);
            }
            self.position = Some(next);
        }
    }

    /// `true` while the view is not positioned on a point.
    pub fn is_empty(&self) -> bool {
        self.position.is_none()
    }

    /// The raw point under the cursor.
    pub fn current_point(&self) -> ScopeResult<&DataPoint<T>> {
        self.position
            .as_ref()
            .and_then(Location::point)
            .ok_or(ScopeError::EmptySeries)
    }

    /// Timestamp of the point under the cursor.
    pub fn current_timestamp(&self) -> ScopeResult<Timestamp> {
        self.current_point().map(|p| p.timestamp)
    }

    /// The point under the cursor through the view's projection.
    pub fn current_value(&self) -> ScopeResult<Value> {
        self.current_point().map(|p| p.value.project(&self.projection))
    }

    /// The point under the cursor through another projection.
    pub fn current_value_with(&self, projection: &Projection) -> ScopeResult<Value> {
        let resolved = projection.resolve(self.list.kind())?;
        self.current_point().map(|p| p.value.project(&resolved))
    }

    /// Minimum spacing between yielded points.
    pub fn step(&self) -> Duration {
        self.step
    }

    /// Key of the underlying series.
    pub fn key(&self) -> &SeriesKey {
        self.list.key()
    }
}

impl<T: SeriesValue> std::fmt::Debug for PointView<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointView")
            .field("key", self.list.key())
            .field("position", &self.current_timestamp().ok())
            .field("step_nanos", &duration_nanos(self.step))
            .finish()
    }
}

/// Cursor that re-resolves to the newest point on every read.
pub struct LatestView<T: SeriesValue> {
    list: Arc<TimeSeriesList<T>>,
    projection: ResolvedProjection,
}

impl<T: SeriesValue> LatestView<T> {
    pub(crate) fn new(list: Arc<TimeSeriesList<T>>, projection: ResolvedProjection) -> Self {
        Self { list, projection }
    }

    /// Newest raw point.
    pub fn latest_raw(&self) -> ScopeResult<DataPoint<T>> {
        self.list.latest().ok_or(ScopeError::EmptySeries)
    }

    /// Newest point through the view's projection.
    pub fn latest(&self) -> ScopeResult<DataPoint<Value>> {
        self.latest_raw()
            .map(|point| point.map(|value| value.project(&self.projection)))
    }

    /// `true` before the first append.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Key of the underlying series.
    pub fn key(&self) -> &SeriesKey {
        self.list.key()
    }
}

/// Type-erased [`PointView`].
pub trait DataView: Send {
    /// See [`PointView::has_next`].
    fn has_next(&self) -> bool;
    /// See [`PointView::advance`].
    fn advance(&mut self);
    /// See [`PointView::is_empty`].
    fn is_empty(&self) -> bool;
    /// See [`PointView::current_timestamp`].
    fn current_timestamp(&self) -> ScopeResult<Timestamp>;
    /// See [`PointView::current_value`].
    fn current_value(&self) -> ScopeResult<Value>;
    /// See [`PointView::current_value_with`].
    fn current_value_with(&self, projection: &Projection) -> ScopeResult<Value>;

    /// Current value as a plotting number, `None` for byte snapshots.
    fn current_f64(&self) -> ScopeResult<Option<f64>> {
        self.current_value().map(|v| v.as_f64())
    }
}

impl<T: SeriesValue> DataView for PointView<T> {
    fn has_next(&self) -> bool {
        PointView::has_next(self)
    }

    fn advance(&mut self) {
        PointView::advance(self)
    }

    fn is_empty(&self) -> bool {
        PointView::is_empty(self)
    }

    fn current_timestamp(&self) -> ScopeResult<Timestamp> {
        PointView::current_timestamp(self)
    }

    fn current_value(&self) -> ScopeResult<Value> {
        PointView::current_value(self)
    }

    fn current_value_with(&self, projection: &Projection) -> ScopeResult<Value> {
        PointView::current_value_with(self, projection)
    }
}

/// Type-erased [`LatestView`].
pub trait NewestValueView: Send + Sync {
    /// See [`LatestView::latest`].
    fn latest(&self) -> ScopeResult<DataPoint<Value>>;
    /// See [`LatestView::is_empty`].
    fn is_empty(&self) -> bool;
}

impl<T: SeriesValue> NewestValueView for LatestView<T> {
    fn latest(&self) -> ScopeResult<DataPoint<Value>> {
        LatestView::latest(self)
    }

    fn is_empty(&self) -> bool {
        LatestView::is_empty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::SeriesConfig;
    use scope_core::{OutputType, SeriesKind, TimeSeries};

    fn list() -> Arc<TimeSeriesList<u64>> {
        Arc::new(
            TimeSeriesList::new(
                SeriesKey::Register {
                    slave: 1,
                    register: 0x130,
                },
                SeriesKind::U16,
                SeriesConfig {
                    node_capacity: 4,
                    bucket_width: Duration::from_millis(50),
                },
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_has_next_is_idempotent() {
        let list = list();
        for ms in [0, 10, 20] {
            list.append(ms, Timestamp::from_millis(ms)).unwrap();
        }
        let mut view = list
            .view(TimeSeries::everything(), Projection::natural(SeriesKind::U16))
            .unwrap();
        for _ in 0..5 {
            assert!(view.has_next());
        }
        view.advance();
        view.advance();
        for _ in 0..5 {
            assert!(!view.has_next());
        }
        // Advancing at the end is a no-op.
        view.advance();
        assert_eq!(view.current_timestamp().unwrap(), Timestamp::from_millis(20));
    }

    #[test]
    fn test_view_follows_appends() {
        let list = list();
        list.append(1, Timestamp::from_millis(1)).unwrap();
        let mut view = list
            .view(TimeSeries::everything(), Projection::natural(SeriesKind::U16))
            .unwrap();
        assert!(!view.has_next());
        for ms in 2..20u64 {
            list.append(ms, Timestamp::from_millis(ms)).unwrap();
            assert!(view.has_next());
            view.advance();
            assert_eq!(view.current_point().unwrap().value, ms);
        }
    }

    #[test]
    fn test_step_larger_than_gap() {
        let list = list();
        for ms in [0, 4, 9, 15, 16, 40] {
            list.append(ms, Timestamp::from_millis(ms)).unwrap();
        }
        let mut view = list
            .view(
                TimeSeries::new(Timestamp::ZERO, Duration::from_millis(10)),
                Projection::natural(SeriesKind::U16),
            )
            .unwrap();
        let mut seen = vec![view.current_point().unwrap().value];
        while view.has_next() {
            view.advance();
            seen.push(view.current_point().unwrap().value);
        }
        assert_eq!(seen, vec![0, 15, 40]);
    }

    #[test]
    fn test_projection_override() {
        let list = list();
        list.append(0xA5F0, Timestamp::from_millis(1)).unwrap();
        let view = list
            .view(TimeSeries::everything(), Projection::natural(SeriesKind::U16))
            .unwrap();
        assert_eq!(view.current_value().unwrap(), Value::U16(0xA5F0));
        assert_eq!(
            view.current_value_with(&Projection::bits(12, 4, OutputType::U8))
                .unwrap(),
            Value::U8(0xA)
        );
        assert_eq!(
            view.current_value_with(&Projection::full(OutputType::U16).flipped())
                .unwrap(),
            Value::U16(0xF0A5)
        );
        assert!(view
            .current_value_with(&Projection::bits(12, 8, OutputType::U8))
            .is_err());
    }

    #[test]
    fn test_latest_view() {
        let list = list();
        let latest = list
            .latest_view(Projection::bits(0, 1, OutputType::Bool))
            .unwrap();
        assert!(latest.is_empty());
        assert_eq!(latest.latest(), Err(ScopeError::EmptySeries));

        list.append(3, Timestamp::from_millis(5)).unwrap();
        let point = latest.latest().unwrap();
        assert_eq!(point.value, Value::Bool(true));
        assert_eq!(point.timestamp, Timestamp::from_millis(5));

        list.append(2, Timestamp::from_millis(6)).unwrap();
        assert_eq!(latest.latest().unwrap().value, Value::Bool(false));
        assert_eq!(latest.latest_raw().unwrap().value, 2);
    }

    #[test]
    fn test_views_are_send() {
        fn assert_send<V: Send>() {}
        assert_send::<PointView<u64>>();
        assert_send::<PointView<bytes::Bytes>>();
        assert_send::<Box<dyn DataView>>();
        assert_send::<LatestView<f64>>();
    }
}
