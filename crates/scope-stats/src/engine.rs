//! Derives error totals and frequencies from the raw counter registers.
//!
//! Every statistic kind is processed in rounds. In each round a slave whose
//! source registers all have an unread sample contributes one new total, the
//! sum of those samples, stamped with the newest of their timestamps. After a
//! round the bus-wide total is republished as the sum of every slave's newest
//! total. Frequencies are computed once per tick from a bounded history of
//! published totals.

use crate::catalog::StatisticsCatalog;
use scope_core::limits::{DEFAULT_STATISTIC_HISTORY, DEFAULT_STATISTIC_RESOLUTION};
use scope_core::{
    DataPoint, OutputType, Projection, ScopeError, ScopeResult, SeriesKey, SeriesKind,
    StatisticCategory, StatisticId, StatisticKind, StatisticScope, TimeSeries, Timestamp,
};
use scope_pool::HistoryBuffer;
use scope_storage::{PointView, SeriesRegistry, TimeSeriesList};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Tuning of the statistics engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatisticsConfig {
    /// Totals kept per statistic for frequency computation.
    pub history_size: usize,
    /// Minimum spacing between counter samples that are read.
    pub resolution: Duration,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            history_size: DEFAULT_STATISTIC_HISTORY,
            resolution: DEFAULT_STATISTIC_RESOLUTION,
        }
    }
}

impl StatisticsConfig {
    /// Reject settings the engine cannot work with.
    pub fn validate(&self) -> ScopeResult<()> {
        if self.history_size < 2 {
            return Err(ScopeError::Configuration(format!(
                "statistics history_size must be at least 2, got {}",
                self.history_size
            )));
        }
        Ok(())
    }
}

/// What a [`StatisticsEngine::tick`] published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Total points appended, per slave and global.
    pub totals_published: usize,
    /// Frequency points appended, per slave and global.
    pub frequencies_published: usize,
    /// Frequency computations skipped because time did not advance.
    pub clock_anomalies: usize,
}

impl TickReport {
    /// `true` when nothing was published.
    pub fn is_idle(&self) -> bool {
        self.totals_published == 0 && self.frequencies_published == 0
    }
}

/// Lockstep reader of one counter register.
///
/// `peek` keeps returning the same sample until it is consumed, so a slave
/// whose other registers lag behind does not lose samples.
struct CounterCursor {
    view: PointView<u64>,
    consumed: bool,
}

impl CounterCursor {
    fn new(view: PointView<u64>) -> Self {
        Self {
            view,
            consumed: false,
        }
    }

    fn peek(&mut self) -> Option<DataPoint<u64>> {
        if self.view.is_empty() || self.consumed {
            if !self.view.has_next() {
                return None;
            }
            self.view.advance();
            self.consumed = false;
        }
        self.view.current_point().ok().copied()
    }

    fn consume(&mut self) {
        self.consumed = true;
    }
}

/// Output series that only accepts strictly newer points.
struct DerivedSeries {
    list: Arc<TimeSeriesList<f64>>,
    last: Option<Timestamp>,
}

impl DerivedSeries {
    fn declare(registry: &SeriesRegistry, id: StatisticId) -> ScopeResult<Self> {
        let key = SeriesKey::Statistic(id);
        if !registry.contains(&key) {
            registry.declare(key.clone(), SeriesKind::Real)?;
        }
        let list = registry.reals(&key)?;
        let last = list.latest().map(|point| point.timestamp);
        Ok(Self { list, last })
    }

    fn publish(&mut self, value: f64, timestamp: Timestamp) -> bool {
        if self.last.is_some_and(|last| timestamp <= last) {
            return false;
        }
        match self.list.append(value, timestamp) {
            Ok(()) => {
                self.last = Some(timestamp);
                true
            }
            Err(err) => {
                warn!(key = %self.list.key(), error = %err, "dropping statistic point");
                false
            }
        }
    }
}

/// Total and frequency outputs of one scope, with the totals history.
struct Outputs {
    total: DerivedSeries,
    frequency: DerivedSeries,
    history: HistoryBuffer<DataPoint<u64>>,
}

impl Outputs {
    fn declare(
        registry: &SeriesRegistry,
        kind: StatisticKind,
        scope: StatisticScope,
        history_size: usize,
    ) -> ScopeResult<Self> {
        Ok(Self {
            total: DerivedSeries::declare(
                registry,
                StatisticId::new(kind, StatisticCategory::Total, scope),
            )?,
            frequency: DerivedSeries::declare(
                registry,
                StatisticId::new(kind, StatisticCategory::Frequency, scope),
            )?,
            history: HistoryBuffer::new(history_size),
        })
    }

    fn publish_total(&mut self, total: DataPoint<u64>, report: &mut TickReport) {
        if self.total.publish(total.value as f64, total.timestamp) {
            self.history.push(total);
            report.totals_published += 1;
        }
    }

    fn publish_frequency(&mut self, report: &mut TickReport) {
        match frequency(&self.history) {
            Frequency::Idle => {}
            Frequency::ClockAnomaly => {
                debug!(key = %self.frequency.list.key(), "time did not advance, skipping frequency");
                report.clock_anomalies += 1;
            }
            Frequency::Rate(point) => {
                if self.frequency.publish(point.value, point.timestamp) {
                    report.frequencies_published += 1;
                }
            }
        }
    }
}

enum Frequency {
    Idle,
    ClockAnomaly,
    Rate(DataPoint<f64>),
}

/// Rate of change over the history window, in counts per second.
///
/// A counter that went backwards (device reset) yields zero.
fn frequency(history: &HistoryBuffer<DataPoint<u64>>) -> Frequency {
    let (Some(oldest), Some(newest)) = (history.oldest(), history.newest()) else {
        return Frequency::Idle;
    };
    if history.len() < 2 {
        return Frequency::Rate(DataPoint::new(0.0, newest.timestamp));
    }
    let Some(elapsed) = newest.timestamp.checked_duration_since(oldest.timestamp) else {
        return Frequency::ClockAnomaly;
    };
    let delta = newest.value.saturating_sub(oldest.value);
    Frequency::Rate(DataPoint::new(
        delta as f64 / elapsed.as_secs_f64(),
        newest.timestamp,
    ))
}

struct SlaveStatistic {
    slave: u16,
    counters: Vec<CounterCursor>,
    outputs: Outputs,
    newest: Option<DataPoint<u64>>,
}

impl SlaveStatistic {
    /// Sum one unread sample of every counter, or nothing if any counter has
    /// no unread sample yet.
    fn collect(&mut self) -> Option<DataPoint<u64>> {
        let mut sum = 0u64;
        let mut timestamp = Timestamp::ZERO;
        for counter in &mut self.counters {
            let sample = counter.peek()?;
            sum = sum.saturating_add(sample.value);
            timestamp = timestamp.max(sample.timestamp);
        }
        for counter in &mut self.counters {
            counter.consume();
        }
        Some(DataPoint::new(sum, timestamp))
    }
}

struct KindStatistics {
    kind: StatisticKind,
    slaves: Vec<SlaveStatistic>,
    global: Outputs,
}

impl KindStatistics {
    fn tick(&mut self, report: &mut TickReport) {
        loop {
            let mut progressed = false;
            for slave in &mut self.slaves {
                if let Some(total) = slave.collect() {
                    progressed = true;
                    slave.newest = Some(total);
                    slave.outputs.publish_total(total, report);
                }
            }
            if !progressed {
                break;
            }
            let newest = self.slaves.iter().filter_map(|s| s.newest);
            let global = newest.fold(None, |acc: Option<DataPoint<u64>>, point| {
                Some(match acc {
                    None => point,
                    Some(acc) => DataPoint::new(
                        acc.value.saturating_add(point.value),
                        acc.timestamp.max(point.timestamp),
                    ),
                })
            });
            if let Some(global) = global {
                self.global.publish_total(global, report);
            }
        }
        for slave in &mut self.slaves {
            slave.outputs.publish_frequency(report);
        }
        self.global.publish_frequency(report);
    }
}

/// Computes every statistic of a [`StatisticsCatalog`].
///
/// Reads the source registers through views and appends to `Real` series
/// keyed by [`SeriesKey::Statistic`]. [`tick`](Self::tick) must be called from
/// a single task.
pub struct StatisticsEngine {
    catalog: Arc<StatisticsCatalog>,
    config: StatisticsConfig,
    kinds: Vec<KindStatistics>,
    ticks: u64,
}

impl StatisticsEngine {
    /// Open views on the source registers and declare the output series.
    ///
    /// The source registers must already be declared, see
    /// [`StatisticsCatalog::declare_sources`].
    pub fn new(
        catalog: Arc<StatisticsCatalog>,
        registry: &SeriesRegistry,
        config: StatisticsConfig,
    ) -> ScopeResult<Self> {
        config.validate()?;
        let counters = TimeSeries::new(Timestamp::ZERO, config.resolution);
        let mut kinds = Vec::with_capacity(catalog.definitions().len());
        for def in catalog.definitions() {
            let mut slaves = Vec::new();
            for slave in catalog.slaves() {
                let mut cursors = Vec::with_capacity(def.registers.len());
                for &register in def.registers {
                    let key = SeriesKey::Register { slave, register };
                    let view = registry
                        .words(&key)?
                        .view(counters, Projection::full(OutputType::U64))?;
                    cursors.push(CounterCursor::new(view));
                }
                slaves.push(SlaveStatistic {
                    slave,
                    counters: cursors,
                    outputs: Outputs::declare(
                        registry,
                        def.kind,
                        StatisticScope::Slave(slave),
                        config.history_size,
                    )?,
                    newest: None,
                });
            }
            kinds.push(KindStatistics {
                kind: def.kind,
                slaves,
                global: Outputs::declare(
                    registry,
                    def.kind,
                    StatisticScope::Global,
                    config.history_size,
                )?,
            });
        }
        debug!(
            slaves = catalog.slave_count(),
            kinds = kinds.len(),
            "statistics engine ready"
        );
        Ok(Self {
            catalog,
            config,
            kinds,
            ticks: 0,
        })
    }

    /// Catalog the engine computes.
    pub fn catalog(&self) -> &Arc<StatisticsCatalog> {
        &self.catalog
    }

    /// Active configuration.
    pub fn config(&self) -> StatisticsConfig {
        self.config
    }

    /// Number of completed ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Consume every new counter sample and publish the derived points.
    #[instrument(skip(self), fields(tick = self.ticks))]
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        for kind in &mut self.kinds {
            kind.tick(&mut report);
        }
        self.ticks += 1;
        if !report.is_idle() {
            debug!(
                totals = report.totals_published,
                frequencies = report.frequencies_published,
                "published statistics"
            );
        }
        report
    }

    /// Newest per-slave totals of `kind`, for diagnostics.
    pub fn newest_totals(&self, kind: StatisticKind) -> Vec<(u16, Option<DataPoint<u64>>)> {
        self.kinds
            .iter()
            .filter(|k| k.kind == kind)
            .flat_map(|k| k.slaves.iter().map(|s| (s.slave, s.newest)))
            .collect()
    }
}

impl std::fmt::Debug for StatisticsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticsEngine")
            .field("slaves", &self.catalog.slave_count())
            .field("config", &self.config)
            .field("ticks", &self.ticks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    const FRAME_PORTS: [u16; 4] = [0x300, 0x302, 0x304, 0x306];

    fn setup(slaves: u16) -> (SeriesRegistry, StatisticsEngine) {
        let registry = SeriesRegistry::default();
        let catalog = Arc::new(StatisticsCatalog::new(slaves));
        catalog.declare_sources(&registry).unwrap();
        let engine = StatisticsEngine::new(
            catalog,
            &registry,
            StatisticsConfig {
                history_size: 4,
                resolution: Duration::ZERO,
            },
        )
        .unwrap();
        (registry, engine)
    }

    fn write(registry: &SeriesRegistry, slave: u16, register: u16, value: u64, ms: u64) {
        registry
            .words(&SeriesKey::Register { slave, register })
            .unwrap()
            .append(value, Timestamp::from_millis(ms))
            .unwrap();
    }

    fn latest(registry: &SeriesRegistry, category: StatisticCategory, scope: StatisticScope) -> DataPoint<f64> {
        registry
            .reals(&SeriesKey::Statistic(StatisticId::new(
                StatisticKind::Frame,
                category,
                scope,
            )))
            .unwrap()
            .latest()
            .unwrap()
    }

    #[test]
    fn test_global_total_sums_slaves() {
        let (registry, mut engine) = setup(2);
        for (i, &port) in FRAME_PORTS.iter().enumerate() {
            write(&registry, 1, port, 5, 10 + i as u64);
            write(&registry, 2, port, 2, 20 + i as u64);
        }
        let report = engine.tick();
        assert!(report.totals_published >= 3);

        let slave1 = latest(&registry, StatisticCategory::Total, StatisticScope::Slave(1));
        assert_eq!(slave1.value, 20.0);
        assert_eq!(slave1.timestamp, Timestamp::from_millis(13));
        let slave2 = latest(&registry, StatisticCategory::Total, StatisticScope::Slave(2));
        assert_eq!(slave2.value, 8.0);

        let global = latest(&registry, StatisticCategory::Total, StatisticScope::Global);
        assert_eq!(global.value, 28.0);
        assert_eq!(global.timestamp, Timestamp::from_millis(23));
    }

    #[test]
    fn test_slave_waits_for_every_counter() {
        let (registry, mut engine) = setup(1);
        for &port in &FRAME_PORTS[..3] {
            write(&registry, 1, port, 1, 5);
        }
        assert_eq!(engine.tick().totals_published, 0);

        write(&registry, 1, FRAME_PORTS[3], 1, 6);
        engine.tick();
        let total = latest(&registry, StatisticCategory::Total, StatisticScope::Slave(1));
        assert_eq!(total.value, 4.0);
        assert_eq!(total.timestamp, Timestamp::from_millis(6));
    }

    #[test]
    fn test_frequency_from_history() {
        let (registry, mut engine) = setup(1);
        // counters grow by 10 per port every 100 ms
        for step in 0..3u64 {
            for &port in &FRAME_PORTS {
                write(&registry, 1, port, step * 10, step * 100);
            }
            engine.tick();
        }
        let freq = latest(&registry, StatisticCategory::Frequency, StatisticScope::Slave(1));
        // 80 counts over 200 ms
        assert!((freq.value - 400.0).abs() < 1e-9);
        assert_eq!(freq.timestamp, Timestamp::from_millis(200));
    }

    #[test]
    fn test_single_sample_frequency_is_zero() {
        let (registry, mut engine) = setup(1);
        for &port in &FRAME_PORTS {
            write(&registry, 1, port, 7, 50);
        }
        engine.tick();
        let freq = latest(&registry, StatisticCategory::Frequency, StatisticScope::Slave(1));
        assert_eq!(freq.value, 0.0);
    }

    #[test]
    fn test_counter_reset_clamps_to_zero() {
        let (registry, mut engine) = setup(1);
        for (value, ms) in [(50, 0), (1, 100)] {
            for &port in &FRAME_PORTS {
                write(&registry, 1, port, value, ms);
            }
            engine.tick();
        }
        let freq = latest(&registry, StatisticCategory::Frequency, StatisticScope::Slave(1));
        assert_eq!(freq.value, 0.0);
    }

    #[test]
    fn test_derived_timestamps_strictly_increase() {
        let (registry, mut engine) = setup(2);
        for ms in 0..20u64 {
            for &port in &FRAME_PORTS {
                write(&registry, 1, port, ms, ms * 2);
                write(&registry, 2, port, ms, ms * 2 + 1);
            }
            if ms % 3 == 0 {
                engine.tick();
            }
        }
        engine.tick();
        let global = registry
            .reals(&SeriesKey::Statistic(StatisticId::new(
                StatisticKind::Frame,
                StatisticCategory::Total,
                StatisticScope::Global,
            )))
            .unwrap();
        let mut view = global
            .view(TimeSeries::everything(), Projection::natural(SeriesKind::Real))
            .unwrap();
        let mut previous = view.current_timestamp().unwrap();
        while view.has_next() {
            view.advance();
            let ts = view.current_timestamp().unwrap();
            assert!(ts > previous);
            previous = ts;
        }
    }

    #[test]
    #[traced_test]
    fn test_idle_tick_publishes_nothing() {
        let (_registry, mut engine) = setup(1);
        let report = engine.tick();
        assert!(report.is_idle());
        assert_eq!(engine.ticks(), 1);
        assert!(logs_contain("statistics engine ready"));
    }

    #[test]
    fn test_missing_sources_fail() {
        let registry = SeriesRegistry::default();
        let catalog = Arc::new(StatisticsCatalog::new(1));
        let err = StatisticsEngine::new(catalog, &registry, StatisticsConfig::default()).unwrap_err();
        assert!(matches!(err, ScopeError::UnknownSeries(_)));
    }

    #[test]
    fn test_config_validation() {
        let config = StatisticsConfig {
            history_size: 1,
            ..StatisticsConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(StatisticsConfig::default().validate().is_ok());
    }

    fn history(points: &[(u64, u64)]) -> HistoryBuffer<DataPoint<u64>> {
        let mut history = HistoryBuffer::new(4);
        for &(value, ms) in points {
            history.push(DataPoint::new(value, Timestamp::from_millis(ms)));
        }
        history
    }

    #[test]
    fn test_frequency_rejects_stalled_or_reversed_clock() {
        assert!(matches!(
            frequency(&history(&[(1, 50), (9, 50)])),
            Frequency::ClockAnomaly
        ));
        assert!(matches!(
            frequency(&history(&[(1, 80), (9, 40)])),
            Frequency::ClockAnomaly
        ));
        assert!(matches!(frequency(&history(&[])), Frequency::Idle));
        match frequency(&history(&[(1, 0), (9, 100)])) {
            Frequency::Rate(point) => assert_eq!(point.value, 80.0),
            _ => panic!("expected a rate"),
        }
    }

    #[test]
    fn test_clock_anomaly_is_counted_not_published() {
        let registry = SeriesRegistry::default();
        let mut outputs =
            Outputs::declare(&registry, StatisticKind::Frame, StatisticScope::Global, 4).unwrap();
        outputs.history = history(&[(3, 20), (7, 20)]);

        let mut report = TickReport::default();
        outputs.publish_frequency(&mut report);
        assert_eq!(report.clock_anomalies, 1);
        assert_eq!(report.frequencies_published, 0);
        assert!(outputs.frequency.list.is_empty());
    }
}
