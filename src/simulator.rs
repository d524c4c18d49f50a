//! Synthetic bus used by the `simulate` command and the integration tests.
//!
//! Every cycle pushes one sample per error counter register of every slave
//! and, when configured, a process image snapshot. Counters saturate at 255
//! like the real registers; each one increments with probability
//! `error_rate` per cycle.

use crate::acquisition::AcquisitionProducer;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use scope_core::{SeriesKey, Timestamp};
use scope_stats::StatisticsCatalog;
use std::time::Duration;

/// Parameters of the synthetic bus.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Cycle period.
    pub cycle: Duration,
    /// Bytes of process image per cycle, 0 for none.
    pub process_image_len: usize,
    /// Probability that a counter increments in a cycle.
    pub error_rate: f64,
    /// Seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            cycle: Duration::from_millis(1),
            process_image_len: 64,
            error_rate: 0.01,
            seed: None,
        }
    }
}

/// Generates cycles of raw samples.
pub struct BusSimulator {
    config: SimulationConfig,
    rng: StdRng,
    counters: Vec<(SeriesKey, u8)>,
    image: Vec<u8>,
    start: Timestamp,
    cycles: u64,
}

impl BusSimulator {
    /// Simulator for the registers of `catalog`, with cycle timestamps
    /// starting at `start`.
    pub fn new(catalog: &StatisticsCatalog, config: SimulationConfig, start: Timestamp) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            counters: catalog.source_keys().into_iter().map(|k| (k, 0)).collect(),
            image: vec![0; config.process_image_len],
            config,
            rng,
            start,
            cycles: 0,
        }
    }

    /// Cycles generated so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Timestamp of the next cycle.
    pub fn next_timestamp(&self) -> Timestamp {
        let offset = self.config.cycle.saturating_mul(u32::try_from(self.cycles).unwrap_or(u32::MAX));
        self.start.saturating_add(offset)
    }

    /// Push one cycle into `producer` and publish it.
    pub fn cycle(&mut self, producer: &mut AcquisitionProducer) -> u64 {
        let timestamp = self.next_timestamp();
        for (key, value) in &mut self.counters {
            if self.rng.gen_bool(self.config.error_rate.clamp(0.0, 1.0)) {
                *value = value.saturating_add(1);
            }
            producer.push(key.clone(), &[*value], timestamp);
        }
        if !self.image.is_empty() {
            self.rng.fill_bytes(&mut self.image);
            producer.push(SeriesKey::ProcessImage, &self.image, timestamp);
        }
        self.cycles += 1;
        producer.publish()
    }

    /// Sum of the simulated counter values, for checking derived totals.
    pub fn counter_sum(&self) -> u64 {
        self.counters.iter().map(|(_, v)| u64::from(*v)).sum()
    }
}
