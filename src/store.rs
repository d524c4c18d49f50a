//! Downstream API of the engine.
//!
//! [`TelemetryStore`] owns the series registry, the memory reclaimer and the
//! statistics catalog of one bus. Consumers declare series, obtain views and
//! look up statistics through it; the storage writer and the periodic tasks
//! share it behind an `Arc`.

use bytes::Bytes;
use scope_core::convert::mask;
use scope_core::{
    Projection, ScopeError, ScopeResult, SeriesKey, SeriesKind, StatisticCategory,
    StatisticKind, StatisticScope, TimeSeries, Timestamp,
};
use scope_pool::RingBuffer;
use scope_stats::{StatisticsCatalog, StatisticsConfig, StatisticsEngine};
use scope_storage::{
    DataView, MemoryReclaimer, NewestValueView, ReclaimReport, SeriesHandle, SeriesRegistry,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ScopeConfig;

/// Shape of the monitored bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusLayout {
    /// Slaves numbered `1..=slave_count`.
    pub slave_count: u16,
    /// Bytes of the process image, 0 when it is not recorded.
    pub process_image_len: usize,
}

/// A decoded sample ready to append.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Integer register or process variable.
    Word(u64),
    /// Floating point value.
    Real(f64),
    /// Byte snapshot.
    Frame(Bytes),
}

impl RawValue {
    /// Decode upstream bytes according to the declared kind.
    ///
    /// Words and reals are little-endian; frames are copied.
    pub fn decode(key: &SeriesKey, kind: SeriesKind, raw: &[u8]) -> ScopeResult<Self> {
        let expected = kind.raw_len();
        if raw.len() != expected {
            return Err(ScopeError::RawLength {
                key: key.clone(),
                expected,
                actual: raw.len(),
            });
        }
        Ok(match kind {
            SeriesKind::Word { .. } => {
                let mut word = [0u8; 8];
                word[..raw.len()].copy_from_slice(raw);
                RawValue::Word(u64::from_le_bytes(word))
            }
            SeriesKind::Real => {
                let bytes: [u8; 8] = raw.try_into().map_err(|_| ScopeError::RawLength {
                    key: key.clone(),
                    expected,
                    actual: raw.len(),
                })?;
                RawValue::Real(f64::from_le_bytes(bytes))
            }
            SeriesKind::Frame { .. } => RawValue::Frame(Bytes::copy_from_slice(raw)),
        })
    }

    fn type_name(&self) -> &'static str {
        match self {
            RawValue::Word(_) => "word",
            RawValue::Real(_) => "real",
            RawValue::Frame(_) => "frame",
        }
    }
}

/// Cycle rates observed by the storage writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IngestRates {
    /// Process image snapshots per second.
    pub process_image_hz: f64,
    /// Register batches per second.
    pub register_hz: f64,
}

/// Registry, reclaimer and statistics catalog of one bus.
pub struct TelemetryStore {
    registry: SeriesRegistry,
    reclaimer: MemoryReclaimer,
    catalog: Arc<StatisticsCatalog>,
    layout: BusLayout,
    process_image_cycles: RingBuffer,
    register_cycles: RingBuffer,
}

impl TelemetryStore {
    /// Store with the error counter registers of every slave and, when
    /// `layout.process_image_len > 0`, the process image declared.
    pub fn new(config: &ScopeConfig, layout: BusLayout) -> ScopeResult<Self> {
        let registry = SeriesRegistry::new(config.storage.series_config());
        let policy = config.storage.reclaim_policy();
        policy.validate()?;
        let catalog = Arc::new(StatisticsCatalog::new(layout.slave_count));
        catalog.declare_sources(&registry)?;
        if layout.process_image_len > 0 {
            registry.declare(
                SeriesKey::ProcessImage,
                SeriesKind::Frame {
                    len: layout.process_image_len,
                },
            )?;
        }
        info!(
            slaves = layout.slave_count,
            process_image_len = layout.process_image_len,
            series = registry.len(),
            "telemetry store ready"
        );
        Ok(Self {
            registry,
            reclaimer: MemoryReclaimer::new(policy, config.storage.memory_budget_bytes),
            catalog,
            layout,
            process_image_cycles: RingBuffer::new(config.acquisition.rate_window),
            register_cycles: RingBuffer::new(config.acquisition.rate_window),
        })
    }

    /// Bus layout the store was built for.
    pub fn layout(&self) -> BusLayout {
        self.layout
    }

    /// Every declared series.
    pub fn registry(&self) -> &SeriesRegistry {
        &self.registry
    }

    /// Statistics metadata.
    pub fn catalog(&self) -> &Arc<StatisticsCatalog> {
        &self.catalog
    }

    /// Engine deriving the catalog's statistics from this store.
    pub fn statistics_engine(&self, config: StatisticsConfig) -> ScopeResult<StatisticsEngine> {
        StatisticsEngine::new(Arc::clone(&self.catalog), &self.registry, config)
    }

    /// Declare an additional series.
    pub fn declare_series(&self, key: SeriesKey, kind: SeriesKind) -> ScopeResult<()> {
        self.registry.declare(key, kind).map(|_| ())
    }

    /// Append a decoded sample.
    ///
    /// Words wider than the declared width keep their low bits. Frames must
    /// have the declared length.
    pub fn append_series(
        &self,
        key: &SeriesKey,
        value: RawValue,
        timestamp: Timestamp,
    ) -> ScopeResult<()> {
        let handle = self.registry.get(key)?;
        match (&handle, value) {
            (SeriesHandle::Word(list), RawValue::Word(word)) => {
                let bits = u32::try_from(list.kind().raw_bits()).unwrap_or(64);
                list.append(word & mask(bits), timestamp)
            }
            (SeriesHandle::Real(list), RawValue::Real(real)) => list.append(real, timestamp),
            (SeriesHandle::Frame(list), RawValue::Frame(frame)) => {
                let expected = list.kind().raw_len();
                if frame.len() != expected {
                    return Err(ScopeError::RawLength {
                        key: key.clone(),
                        expected,
                        actual: frame.len(),
                    });
                }
                list.append(frame, timestamp)
            }
            (handle, value) => Err(ScopeError::KindMismatch {
                key: key.clone(),
                expected: value.type_name().to_string(),
                actual: handle.kind(),
            }),
        }
    }

    /// Decode upstream bytes and append them.
    pub fn append_raw(&self, key: &SeriesKey, raw: &[u8], timestamp: Timestamp) -> ScopeResult<()> {
        let kind = self.registry.get(key)?.kind();
        let value = RawValue::decode(key, kind, raw)?;
        self.append_series(key, value, timestamp)
    }

    /// View of the newest point, read in the series' natural type.
    pub fn get_latest_view(&self, key: &SeriesKey) -> ScopeResult<Box<dyn NewestValueView>> {
        let handle = self.registry.get(key)?;
        handle.latest_view(Projection::natural(handle.kind()))
    }

    /// View of the newest point through `projection`.
    pub fn get_latest_view_with(
        &self,
        key: &SeriesKey,
        projection: Projection,
    ) -> ScopeResult<Box<dyn NewestValueView>> {
        self.registry.get(key)?.latest_view(projection)
    }

    /// Forward cursor from `start`, yielding points at least `step` apart.
    pub fn get_view(
        &self,
        key: &SeriesKey,
        start: Timestamp,
        step: Duration,
        projection: Projection,
    ) -> ScopeResult<Box<dyn DataView>> {
        self.registry
            .get(key)?
            .view(TimeSeries::new(start, step), projection)
    }

    /// Change the memory ceiling; 0 disables reclamation.
    pub fn set_memory_budget(&self, bytes: usize) {
        debug!(bytes, "memory budget changed");
        self.reclaimer.set_budget(bytes);
    }

    /// Current memory ceiling.
    pub fn memory_budget(&self) -> usize {
        self.reclaimer.budget()
    }

    /// Bytes held by every series.
    pub fn memory_usage(&self) -> usize {
        self.registry.memory_usage()
    }

    /// Run a reclamation pass if usage is above the high-water mark.
    pub fn reclaim_now(&self) -> Option<ReclaimReport> {
        self.reclaimer.reclaim_if_needed(&self.registry)
    }

    /// The reclaimer, for its counters.
    pub fn reclaimer(&self) -> &MemoryReclaimer {
        &self.reclaimer
    }

    /// Series key of a statistic.
    pub fn get_statistic(
        &self,
        kind: StatisticKind,
        category: StatisticCategory,
        scope: StatisticScope,
    ) -> ScopeResult<SeriesKey> {
        self.catalog.lookup(kind, category, scope)
    }

    pub(crate) fn record_process_image_cycle(&self, timestamp: Timestamp) {
        self.process_image_cycles.record(timestamp.as_nanos());
    }

    pub(crate) fn record_register_cycle(&self, timestamp: Timestamp) {
        self.register_cycles.record(timestamp.as_nanos());
    }

    /// Cycle rates measured over the configured window.
    pub fn ingest_rates(&self) -> IngestRates {
        IngestRates {
            process_image_hz: self.process_image_cycles.rate_hz(),
            register_hz: self.register_cycles.rate_hz(),
        }
    }
}

impl std::fmt::Debug for TelemetryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryStore")
            .field("layout", &self.layout)
            .field("series", &self.registry.len())
            .field("budget", &self.reclaimer.budget())
            .finish()
    }
}
