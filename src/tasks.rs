//! Periodic background work on the tokio runtime.
//!
//! - reclamation: runs a memory pass every `storage.reclaim_interval`
//! - statistics: ticks the [`StatisticsEngine`] every `statistics.resolution`
//!
//! Both stop when the shutdown `watch` channel flips.

use crate::config::ScopeConfig;
use crate::store::TelemetryStore;
use scope_stats::{StatisticsEngine, TickReport};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What the background tasks did before shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    /// Reclamation passes that freed memory.
    pub reclaim_passes: u64,
    /// Statistics ticks run.
    pub statistics_ticks: u64,
    /// Statistic points published over all ticks.
    pub totals_published: usize,
    /// Frequency points published over all ticks.
    pub frequencies_published: usize,
    /// Ticks that skipped a frequency because time did not advance.
    pub clock_anomalies: usize,
}

/// Running background tasks.
pub struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    reclaim: JoinHandle<u64>,
    statistics: JoinHandle<(u64, TickReport)>,
}

impl BackgroundTasks {
    /// Spawn both tasks on the current runtime.
    pub fn spawn(
        store: Arc<TelemetryStore>,
        engine: StatisticsEngine,
        config: &ScopeConfig,
    ) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let reclaim = tokio::spawn(reclaim_loop(
            store,
            config.storage.reclaim_interval,
            rx.clone(),
        ));
        let statistics = tokio::spawn(statistics_loop(engine, config.statistics.resolution, rx));
        info!("background tasks started");
        Self {
            shutdown,
            reclaim,
            statistics,
        }
    }

    /// Signal both tasks and wait for them.
    pub async fn shutdown(self) -> TaskSummary {
        // Receivers may already be gone if a task ended early.
        let _ = self.shutdown.send(true);
        let mut summary = TaskSummary::default();
        match self.reclaim.await {
            Ok(passes) => summary.reclaim_passes = passes,
            Err(e) => warn!(error = %e, "reclamation task failed"),
        }
        match self.statistics.await {
            Ok((ticks, totals)) => {
                summary.statistics_ticks = ticks;
                summary.totals_published = totals.totals_published;
                summary.frequencies_published = totals.frequencies_published;
                summary.clock_anomalies = totals.clock_anomalies;
            }
            Err(e) => warn!(error = %e, "statistics task failed"),
        }
        info!(
            reclaim_passes = summary.reclaim_passes,
            ticks = summary.statistics_ticks,
            "background tasks stopped"
        );
        summary
    }
}

async fn reclaim_loop(
    store: Arc<TelemetryStore>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut passes = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(report) = store.reclaim_now() {
                    if report.nodes_freed > 0 {
                        passes += 1;
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    passes
}

async fn statistics_loop(
    mut engine: StatisticsEngine,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> (u64, TickReport) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut totals = TickReport::default();
    let mut ticks = engine.ticks();
    loop {
        tokio::select! {
            _ = ticker.tick() => match tick_blocking(engine).await {
                Some((returned, report)) => {
                    engine = returned;
                    ticks = engine.ticks();
                    accumulate(&mut totals, report);
                }
                None => return (ticks, totals),
            },
            _ = shutdown.changed() => break,
        }
    }
    // Publish what arrived since the last tick.
    if let Some((returned, report)) = tick_blocking(engine).await {
        ticks = returned.ticks();
        accumulate(&mut totals, report);
    }
    debug!(ticks, "statistics task stopped");
    (ticks, totals)
}

/// Run one tick on the blocking pool. A backlog after a stall can take a
/// while to drain and must not hold a runtime worker.
async fn tick_blocking(mut engine: StatisticsEngine) -> Option<(StatisticsEngine, TickReport)> {
    match tokio::task::spawn_blocking(move || {
        let report = engine.tick();
        (engine, report)
    })
    .await
    {
        Ok(result) => Some(result),
        Err(e) => {
            error!(error = %e, "statistics tick failed, stopping statistics task");
            None
        }
    }
}

fn accumulate(totals: &mut TickReport, report: TickReport) {
    totals.totals_published += report.totals_published;
    totals.frequencies_published += report.frequencies_published;
    totals.clock_anomalies += report.clock_anomalies;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BusLayout, RawValue};
    use scope_core::{SeriesKey, StatisticCategory, StatisticKind, StatisticScope, Timestamp};

    #[tokio::test]
    async fn test_tasks_publish_statistics_and_stop() {
        let mut config = ScopeConfig::default();
        config.statistics.resolution = Duration::from_millis(5);
        config.storage.reclaim_interval = Duration::from_millis(5);
        let store = Arc::new(
            TelemetryStore::new(
                &config,
                BusLayout {
                    slave_count: 1,
                    process_image_len: 0,
                },
            )
            .unwrap(),
        );
        let engine = store
            .statistics_engine(config.statistics.engine_config())
            .unwrap();
        let tasks = BackgroundTasks::spawn(Arc::clone(&store), engine, &config);

        for register in [0x300, 0x302, 0x304, 0x306] {
            store
                .append_series(
                    &SeriesKey::Register { slave: 1, register },
                    RawValue::Word(4),
                    Timestamp::from_millis(10),
                )
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        let summary = tasks.shutdown().await;
        assert!(summary.statistics_ticks > 0);
        assert!(summary.totals_published >= 2);

        let key = store
            .get_statistic(
                StatisticKind::Frame,
                StatisticCategory::Total,
                StatisticScope::Global,
            )
            .unwrap();
        let total = store.registry().reals(&key).unwrap().latest().unwrap();
        assert_eq!(total.value, 16.0);
    }

    #[tokio::test]
    async fn test_shutdown_without_work() {
        let config = ScopeConfig::default();
        let store = Arc::new(
            TelemetryStore::new(
                &config,
                BusLayout {
                    slave_count: 2,
                    process_image_len: 4,
                },
            )
            .unwrap(),
        );
        let engine = store
            .statistics_engine(config.statistics.engine_config())
            .unwrap();
        let summary = BackgroundTasks::spawn(store, engine, &config).shutdown().await;
        assert_eq!(summary.reclaim_passes, 0);
        assert_eq!(summary.totals_published, 0);
    }

    #[tokio::test]
    async fn test_backlog_is_drained_off_the_runtime() {
        let mut config = ScopeConfig::default();
        config.statistics.resolution = Duration::from_millis(5);
        let store = Arc::new(
            TelemetryStore::new(
                &config,
                BusLayout {
                    slave_count: 1,
                    process_image_len: 0,
                },
            )
            .unwrap(),
        );
        let engine = store
            .statistics_engine(config.statistics.engine_config())
            .unwrap();
        // Samples arrive before the task starts, as after a stall.
        for i in 1..=2_000u64 {
            for register in [0x300, 0x302, 0x304, 0x306] {
                store
                    .append_series(
                        &SeriesKey::Register { slave: 1, register },
                        RawValue::Word(i % 256),
                        Timestamp::from_millis(i * 5),
                    )
                    .unwrap();
            }
        }
        let tasks = BackgroundTasks::spawn(Arc::clone(&store), engine, &config);

        // The runtime keeps serving timers while the backlog drains.
        tokio::time::timeout(Duration::from_secs(1), tokio::time::sleep(Duration::from_millis(10)))
            .await
            .unwrap();
        let summary = tasks.shutdown().await;
        assert!(summary.statistics_ticks >= 1);

        let key = store
            .get_statistic(
                StatisticKind::Frame,
                StatisticCategory::Total,
                StatisticScope::Global,
            )
            .unwrap();
        let total = store.registry().reals(&key).unwrap().latest().unwrap();
        assert_eq!(total.timestamp, Timestamp::from_millis(10_000));
        assert_eq!(total.value, f64::from((2_000u32 % 256) * 4));
    }
}
