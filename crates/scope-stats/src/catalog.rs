//! Immutable description of the error statistics the engine derives.
//!
//! Every slave exposes its bus error counters as one-byte registers. A
//! statistic kind sums a fixed set of them (one per port for most kinds) and
//! is reported in four flavours: total and frequency, per slave and for the
//! whole bus.

use scope_core::{
    ScopeError, ScopeResult, SeriesKey, SeriesKind, StatisticCategory, StatisticId,
    StatisticKind, StatisticScope,
};
use scope_storage::SeriesRegistry;
use std::ops::RangeInclusive;
use tracing::debug;

/// Error counter registers per port, in port order.
const FRAME_ERROR_COUNTERS: [u16; 4] = [0x300, 0x302, 0x304, 0x306];
const PHYSICAL_ERROR_COUNTERS: [u16; 4] = [0x301, 0x303, 0x305, 0x307];
const PREVIOUS_ERROR_COUNTERS: [u16; 4] = [0x308, 0x309, 0x30A, 0x30B];
const LOST_LINK_COUNTERS: [u16; 4] = [0x310, 0x311, 0x312, 0x313];
const MALFORMAT_FRAME_COUNTER: [u16; 1] = [0x30C];
const LOCAL_PROBLEM_COUNTER: [u16; 1] = [0x30D];

/// Registers summed by a statistic kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatisticDefinition {
    /// Kind of the statistic.
    pub kind: StatisticKind,
    /// Source registers on every slave.
    pub registers: &'static [u16],
}

/// All statistics of a bus with a fixed number of slaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticsCatalog {
    slave_count: u16,
    definitions: Vec<StatisticDefinition>,
}

impl StatisticsCatalog {
    /// Catalog of the standard error counters for slaves `1..=slave_count`.
    pub fn new(slave_count: u16) -> Self {
        let definitions = StatisticKind::ALL
            .iter()
            .map(|&kind| StatisticDefinition {
                kind,
                registers: registers_of(kind),
            })
            .collect();
        Self {
            slave_count,
            definitions,
        }
    }

    /// Number of slaves covered.
    pub fn slave_count(&self) -> u16 {
        self.slave_count
    }

    /// Slave positions covered.
    pub fn slaves(&self) -> RangeInclusive<u16> {
        1..=self.slave_count
    }

    /// Kinds and their source registers.
    pub fn definitions(&self) -> &[StatisticDefinition] {
        &self.definitions
    }

    /// Raw representation of every source register.
    pub fn source_kind(&self) -> SeriesKind {
        SeriesKind::U8
    }

    /// Keys of every source register on every slave.
    pub fn source_keys(&self) -> Vec<SeriesKey> {
        self.slaves()
            .flat_map(|slave| {
                self.definitions.iter().flat_map(move |def| {
                    def.registers
                        .iter()
                        .map(move |&register| SeriesKey::Register { slave, register })
                })
            })
            .collect()
    }

    /// Declare every source register that is not declared yet.
    pub fn declare_sources(&self, registry: &SeriesRegistry) -> ScopeResult<usize> {
        let mut declared = 0;
        for key in self.source_keys() {
            if !registry.contains(&key) {
                registry.declare(key, self.source_kind())?;
                declared += 1;
            }
        }
        debug!(declared, slaves = self.slave_count, "declared error counter registers");
        Ok(declared)
    }

    /// Every statistic in the catalog.
    pub fn statistics(&self) -> Vec<StatisticId> {
        let scopes: Vec<StatisticScope> = self
            .slaves()
            .map(StatisticScope::Slave)
            .chain(std::iter::once(StatisticScope::Global))
            .collect();
        let mut ids = Vec::new();
        for def in &self.definitions {
            for category in [StatisticCategory::Total, StatisticCategory::Frequency] {
                for &scope in &scopes {
                    ids.push(StatisticId::new(def.kind, category, scope));
                }
            }
        }
        ids
    }

    /// Series key of a statistic.
    pub fn lookup(
        &self,
        kind: StatisticKind,
        category: StatisticCategory,
        scope: StatisticScope,
    ) -> ScopeResult<SeriesKey> {
        let id = StatisticId::new(kind, category, scope);
        let known_kind = self.definitions.iter().any(|def| def.kind == kind);
        let known_scope = match scope {
            StatisticScope::Global => true,
            StatisticScope::Slave(slave) => self.slaves().contains(&slave),
        };
        if known_kind && known_scope {
            Ok(SeriesKey::Statistic(id))
        } else {
            Err(ScopeError::UnknownStatistic(id))
        }
    }
}

fn registers_of(kind: StatisticKind) -> &'static [u16] {
    match kind {
        StatisticKind::Frame => &FRAME_ERROR_COUNTERS,
        StatisticKind::Physical => &PHYSICAL_ERROR_COUNTERS,
        StatisticKind::Previous => &PREVIOUS_ERROR_COUNTERS,
        StatisticKind::LinkLost => &LOST_LINK_COUNTERS,
        StatisticKind::MalformatFrame => &MALFORMAT_FRAME_COUNTER,
        StatisticKind::LocalProblem => &LOCAL_PROBLEM_COUNTER,
    }
}
