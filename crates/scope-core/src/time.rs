//! Monotonic timestamps and sampling descriptors.
//!
//! Every point stored by the engine carries a [`Timestamp`]: nanoseconds since
//! a process-wide monotonic epoch captured on first use. Using a monotonic
//! source keeps timestamps strictly increasing even when the wall clock is
//! adjusted, which the series lists rely on for seeking.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds since the process-wide monotonic epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch itself. Views created with this start time begin at the oldest point.
    pub const ZERO: Timestamp = Timestamp(0);
    /// Largest representable instant.
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    /// Current monotonic time.
    pub fn now() -> Self {
        let epoch = EPOCH.get_or_init(Instant::now);
        Self::from_duration(epoch.elapsed())
    }

    /// Timestamp at `nanos` after the epoch.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Timestamp at `micros` after the epoch.
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros.saturating_mul(1_000))
    }

    /// Timestamp at `millis` after the epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Timestamp at `elapsed` after the epoch, saturating at [`Timestamp::MAX`].
    pub fn from_duration(elapsed: Duration) -> Self {
        Self(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
    }

    /// Nanoseconds since the epoch.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// `self + step`, saturating at [`Timestamp::MAX`].
    pub fn saturating_add(self, step: Duration) -> Self {
        Self(self.0.saturating_add(duration_nanos(step)))
    }

    /// Time elapsed from `earlier` to `self`, or `None` if `earlier` is not before `self`.
    pub fn checked_duration_since(self, earlier: Timestamp) -> Option<Duration> {
        match self.0.checked_sub(earlier.0) {
            Some(0) | None => None,
            Some(nanos) => Some(Duration::from_nanos(nanos)),
        }
    }

    /// Index of the time bucket this instant falls into.
    ///
    /// `width_nanos` must be non-zero.
    pub const fn bucket(self, width_nanos: u64) -> u64 {
        self.0 / width_nanos
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}s", self.0 / 1_000_000_000, self.0 % 1_000_000_000)
    }
}

/// Nanoseconds in `d`, saturating at `u64::MAX`.
pub fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Sampling request for a view: where to start and the minimum spacing between
/// consecutive points the view yields.
///
/// A zero `step` yields every stored point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeSeries {
    /// First instant of interest.
    pub start: Timestamp,
    /// Minimum distance between yielded points.
    #[serde(with = "duration_as_nanos")]
    pub step: Duration,
}

impl TimeSeries {
    /// Sampling from `start` with spacing `step`.
    pub const fn new(start: Timestamp, step: Duration) -> Self {
        Self { start, step }
    }

    /// Every point from the oldest one on.
    pub const fn everything() -> Self {
        Self {
            start: Timestamp::ZERO,
            step: Duration::ZERO,
        }
    }
}

mod duration_as_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(super::duration_nanos(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_nanos)
    }
}
