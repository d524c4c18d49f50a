//! Concurrent time-series storage for fieldbus telemetry.
//!
//! - [`TimeSeriesList`]: append-only segmented series with O(1) append and
//!   bucket-indexed seek
//! - [`PointView`] / [`LatestView`]: reader cursors with bit/type projection
//! - [`SeriesRegistry`]: all series of a session, keyed by [`SeriesKey`]
//! - [`MemoryReclaimer`]: keeps the registry within a memory budget
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use scope_core::{Projection, SeriesKey, SeriesKind, TimeSeries, Timestamp, Value};
//! use scope_storage::{SeriesConfig, TimeSeriesList};
//!
//! let list = Arc::new(TimeSeriesList::<u64>::new(
//!     SeriesKey::Custom("temperature".into()),
//!     SeriesKind::U16,
//!     SeriesConfig::default(),
//! ).unwrap());
//!
//! for (i, raw) in [210u64, 212, 215].into_iter().enumerate() {
//!     list.append(raw, Timestamp::from_millis(10 * i as u64)).unwrap();
//! }
//!
//! let mut view = list
//!     .view(TimeSeries::new(Timestamp::ZERO, Duration::from_millis(20)), Projection::natural(SeriesKind::U16))
//!     .unwrap();
//! assert_eq!(view.current_value().unwrap(), Value::U16(210));
//! view.advance();
//! assert_eq!(view.current_value().unwrap(), Value::U16(215));
//! assert!(!view.has_next());
//! ```
//!
//! [`SeriesKey`]: scope_core::SeriesKey

mod bucket_index;
mod node;
pub mod reclaim;
pub mod registry;
pub mod series;
pub mod value;
pub mod view;

pub use reclaim::{MemoryReclaimer, ReclaimPolicy, ReclaimReport};
pub use registry::{SeriesHandle, SeriesRegistry};
pub use series::{Eviction, SeriesConfig, TimeSeriesList};
pub use value::SeriesValue;
pub use view::{DataView, LatestView, NewestValueView, PointView};
