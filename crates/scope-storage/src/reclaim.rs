//! Bounded-memory policy across all series.
//!
//! When the bytes held by the registry exceed `high_water × budget`, the
//! reclaimer frees down toward `low_water × budget` by releasing the oldest
//! nodes of every list:
//!
//! 1. high-churn series (the process image) give up `high_churn_quota` of the
//!    target, spread evenly between them;
//! 2. whatever they could not free, plus the rest of the target, is spread
//!    evenly over all other series. A list that cannot give its share (live
//!    views, only a tail node left) passes the remainder on to the lists after
//!    it;
//! 3. a remainder the other series could not cover goes back to the
//!    high-churn series.
//!
//! Memory pressure is never an error: reclamation is best effort and silent
//! apart from logging.

use crate::registry::{SeriesHandle, SeriesRegistry};
use parking_lot::Mutex;
use scope_core::limits::{DEFAULT_HIGH_CHURN_QUOTA, DEFAULT_HIGH_WATER, DEFAULT_LOW_WATER};
use scope_core::{ScopeError, ScopeResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info};

/// Thresholds of the reclamation policy, as fractions of the budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReclaimPolicy {
    /// Usage above `high_water × budget` triggers a pass.
    pub high_water: f64,
    /// A pass frees down toward `low_water × budget`.
    pub low_water: f64,
    /// Share of each pass taken from high-churn series.
    pub high_churn_quota: f64,
}

impl Default for ReclaimPolicy {
    fn default() -> Self {
        Self {
            high_water: DEFAULT_HIGH_WATER,
            low_water: DEFAULT_LOW_WATER,
            high_churn_quota: DEFAULT_HIGH_CHURN_QUOTA,
        }
    }
}

impl ReclaimPolicy {
    /// Check that the fractions are ordered and within `0..=1`.
    pub fn validate(&self) -> ScopeResult<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.high_water) || !in_unit(self.low_water) || !in_unit(self.high_churn_quota) {
            return Err(ScopeError::Configuration(
                "reclaim fractions must lie within 0.0..=1.0".into(),
            ));
        }
        if self.low_water >= self.high_water {
            return Err(ScopeError::Configuration(format!(
                "low_water ({}) must be below high_water ({})",
                self.low_water, self.high_water
            )));
        }
        Ok(())
    }
}

/// Outcome of one reclamation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    /// Bytes held before the pass.
    pub usage_before: usize,
    /// Bytes held after the pass.
    pub usage_after: usize,
    /// Bytes the pass tried to free.
    pub target_bytes: usize,
    /// Nodes released.
    pub nodes_freed: usize,
    /// Bytes released.
    pub bytes_freed: usize,
    /// Evictions that released at least one node.
    pub lists_trimmed: usize,
}

/// Keeps the registry within a memory budget.
#[derive(Debug)]
pub struct MemoryReclaimer {
    /// Budget in bytes; zero disables reclamation.
    budget: AtomicUsize,
    policy: ReclaimPolicy,
    running: Mutex<()>,
    passes: AtomicU64,
    nodes_freed: AtomicU64,
}

impl MemoryReclaimer {
    /// Reclaimer with `policy` and an initial budget (zero = unlimited).
    pub fn new(policy: ReclaimPolicy, budget_bytes: usize) -> Self {
        Self {
            budget: AtomicUsize::new(budget_bytes),
            policy,
            running: Mutex::new(()),
            passes: AtomicU64::new(0),
            nodes_freed: AtomicU64::new(0),
        }
    }

    /// Change the budget. Takes effect on the next pass.
    pub fn set_budget(&self, bytes: usize) {
        self.budget.store(bytes, Ordering::Relaxed);
        info!(budget_bytes = bytes, "memory budget updated");
    }

    /// Current budget in bytes; zero means unlimited.
    pub fn budget(&self) -> usize {
        self.budget.load(Ordering::Relaxed)
    }

    /// Configured policy.
    pub fn policy(&self) -> ReclaimPolicy {
        self.policy
    }

    /// Passes that released memory so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Nodes released over the reclaimer's lifetime.
    pub fn total_nodes_freed(&self) -> u64 {
        self.nodes_freed.load(Ordering::Relaxed)
    }

    /// Run a pass if usage exceeds the high-water mark.
    ///
    /// Returns `None` when no pass was needed, the budget is unlimited, or
    /// another pass is already running.
    pub fn reclaim_if_needed(&self, registry: &SeriesRegistry) -> Option<ReclaimReport> {
        let budget = self.budget();
        if budget == 0 {
            return None;
        }
        let handles = registry.snapshot();
        let usage: usize = handles.iter().map(SeriesHandle::memory_usage).sum();
        if (usage as f64) <= budget as f64 * self.policy.high_water {
            return None;
        }
        let _running = self.running.try_lock()?;
        Some(self.run(&handles, usage, budget))
    }

    fn run(&self, handles: &[SeriesHandle], usage: usize, budget: usize) -> ReclaimReport {
        let floor = (budget as f64 * self.policy.low_water) as usize;
        let target = usage.saturating_sub(floor);
        let mut report = ReclaimReport {
            usage_before: usage,
            target_bytes: target,
            ..ReclaimReport::default()
        };

        let (churn, steady): (Vec<&SeriesHandle>, Vec<&SeriesHandle>) =
            handles.iter().partition(|h| h.key().is_high_churn());

        let mut freed = 0;
        if !churn.is_empty() {
            let share = (target as f64 * self.policy.high_churn_quota) as usize;
            freed += spread(&churn, share, &mut report);
        }
        let rest = target.saturating_sub(freed);
        let steady_freed = spread(&steady, rest, &mut report);
        // Whatever the steady lists could not give falls back on high-churn ones.
        let leftover = rest.saturating_sub(steady_freed);
        if leftover > 0 {
            spread(&churn, leftover, &mut report);
        }

        report.usage_after = handles.iter().map(SeriesHandle::memory_usage).sum();
        if report.nodes_freed > 0 {
            self.passes.fetch_add(1, Ordering::Relaxed);
            self.nodes_freed
                .fetch_add(report.nodes_freed as u64, Ordering::Relaxed);
            info!(
                usage_before = report.usage_before,
                usage_after = report.usage_after,
                nodes = report.nodes_freed,
                lists = report.lists_trimmed,
                "reclaimed memory"
            );
        } else {
            debug!(
                usage = usage,
                budget = budget,
                "memory above high water but nothing could be released"
            );
        }
        report
    }
}

/// Free about `bytes` from `lists`, evenly, passing each list's shortfall on
/// to the lists after it. Returns the bytes freed.
fn spread(lists: &[&SeriesHandle], bytes: usize, report: &mut ReclaimReport) -> usize {
    let mut remaining = bytes;
    let mut freed = 0;
    for (i, handle) in lists.iter().enumerate() {
        if remaining == 0 {
            break;
        }
        let share = remaining / (lists.len() - i);
        if share == 0 {
            continue;
        }
        let nodes = share.div_ceil(handle.average_node_bytes().max(1));
        let eviction = handle.remove_oldest(nodes);
        if eviction.nodes > 0 {
            report.lists_trimmed += 1;
        }
        report.nodes_freed += eviction.nodes;
        report.bytes_freed += eviction.bytes;
        freed += eviction.bytes;
        remaining = remaining.saturating_sub(eviction.bytes);
    }
    freed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::SeriesConfig;
    use bytes::Bytes;
    use scope_core::{SeriesKey, SeriesKind, Timestamp};
    use std::time::Duration;
    use tracing_test::traced_test;

    fn registry() -> SeriesRegistry {
        SeriesRegistry::new(SeriesConfig {
            node_capacity: 10,
            bucket_width: Duration::from_millis(100),
        })
    }

    fn fill_words(registry: &SeriesRegistry, slave: u16, points: u64) {
        let key = SeriesKey::Register {
            slave,
            register: 0x300,
        };
        registry.declare(key.clone(), SeriesKind::U8).unwrap();
        let list = registry.words(&key).unwrap();
        for i in 0..points {
            list.append(i % 256, Timestamp::from_millis(i)).unwrap();
        }
    }

    #[test]
    fn test_policy_validation() {
        assert!(ReclaimPolicy::default().validate().is_ok());
        let inverted = ReclaimPolicy {
            high_water: 0.5,
            low_water: 0.6,
            high_churn_quota: 0.05,
        };
        assert!(inverted.validate().is_err());
        let out_of_range = ReclaimPolicy {
            high_water: 1.5,
            ..ReclaimPolicy::default()
        };
        assert!(out_of_range.validate().is_err());
    }

    #[test]
    fn test_unlimited_budget_never_reclaims() {
        let registry = registry();
        fill_words(&registry, 1, 1_000);
        let reclaimer = MemoryReclaimer::new(ReclaimPolicy::default(), 0);
        assert!(reclaimer.reclaim_if_needed(&registry).is_none());
    }

    #[test]
    fn test_below_high_water_is_left_alone() {
        let registry = registry();
        fill_words(&registry, 1, 100);
        let usage = registry.memory_usage();
        let reclaimer = MemoryReclaimer::new(ReclaimPolicy::default(), usage * 2);
        assert!(reclaimer.reclaim_if_needed(&registry).is_none());
    }

    #[test]
    #[traced_test]
    fn test_reclaims_toward_low_water() {
        let registry = registry();
        for slave in 1..=4 {
            fill_words(&registry, slave, 1_000);
        }
        let usage = registry.memory_usage();
        let reclaimer = MemoryReclaimer::new(ReclaimPolicy::default(), usage);
        // Budget equals usage: above 90%, so free down toward 70%.
        let report = reclaimer.reclaim_if_needed(&registry).unwrap();
        assert_eq!(report.usage_before, usage);
        assert!(report.nodes_freed > 0);
        assert_eq!(report.lists_trimmed, 4);
        assert!(report.usage_after <= (usage as f64 * 0.7) as usize + usage / 40);
        assert_eq!(report.usage_after, registry.memory_usage());
        assert_eq!(reclaimer.passes(), 1);
        assert!(logs_contain("reclaimed memory"));
    }

    #[test]
    fn test_high_churn_series_pay_a_small_quota() {
        let registry = registry();
        fill_words(&registry, 1, 2_000);
        registry
            .declare(SeriesKey::ProcessImage, SeriesKind::Frame { len: 64 })
            .unwrap();
        let frames = registry.frames(&SeriesKey::ProcessImage).unwrap();
        for i in 0..2_000u64 {
            frames
                .append(Bytes::from(vec![0u8; 64]), Timestamp::from_millis(i))
                .unwrap();
        }
        let frames_before = frames.memory_usage();
        let words = registry
            .words(&SeriesKey::Register {
                slave: 1,
                register: 0x300,
            })
            .unwrap();
        let words_before = words.memory_usage();

        let reclaimer = MemoryReclaimer::new(ReclaimPolicy::default(), registry.memory_usage());
        let report = reclaimer.reclaim_if_needed(&registry).unwrap();
        let frames_freed = frames_before - frames.memory_usage();
        let words_freed = words_before - words.memory_usage();
        assert!(frames_freed > 0);
        assert!(words_freed > frames_freed);
        assert_eq!(report.bytes_freed, frames_freed + words_freed);
    }

    #[test]
    fn test_tiny_budget_keeps_newest_points() {
        let registry = registry();
        for slave in 1..=3 {
            fill_words(&registry, slave, 500);
        }
        let reclaimer = MemoryReclaimer::new(ReclaimPolicy::default(), 1);
        let report = reclaimer.reclaim_if_needed(&registry).unwrap();
        assert!(report.nodes_freed > 0);
        for slave in 1..=3 {
            let list = registry
                .words(&SeriesKey::Register {
                    slave,
                    register: 0x300,
                })
                .unwrap();
            assert_eq!(list.node_count(), 1);
            assert_eq!(list.latest().map(|p| p.value), Some(499 % 256));
        }
        // Nothing left to free; further passes release nothing.
        let again = reclaimer.reclaim_if_needed(&registry).unwrap();
        assert_eq!(again.nodes_freed, 0);
    }
}
