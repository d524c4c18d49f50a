//! Series identity and raw representation.

use crate::error::{ScopeError, ScopeResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a monitored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKey {
    /// A device register, addressed by slave position and register address.
    Register {
        /// 1-based slave position on the bus.
        slave: u16,
        /// Register address.
        register: u16,
    },
    /// The cyclic process image exchanged with all slaves.
    ProcessImage,
    /// A series derived by the statistics engine.
    Statistic(StatisticId),
    /// Any other application-defined series.
    Custom(String),
}

impl SeriesKey {
    /// Series that are appended every bus cycle and dominate memory usage.
    pub fn is_high_churn(&self) -> bool {
        matches!(self, SeriesKey::ProcessImage)
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesKey::Register { slave, register } => {
                write!(f, "slave {slave} register {register:#06x}")
            }
            SeriesKey::ProcessImage => write!(f, "process image"),
            SeriesKey::Statistic(id) => write!(f, "statistic {id}"),
            SeriesKey::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// How values of a series are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    /// Unsigned little-endian word of 8, 16, 32 or 64 bits, stored as `u64`.
    Word {
        /// Declared width in bits.
        bits: u8,
    },
    /// Floating point value, stored as `f64`.
    Real,
    /// Opaque byte snapshot (e.g. a process image), stored as `bytes::Bytes`.
    Frame {
        /// Snapshot length in bytes.
        len: usize,
    },
}

impl SeriesKind {
    /// One byte register.
    pub const U8: SeriesKind = SeriesKind::Word { bits: 8 };
    /// Two byte register.
    pub const U16: SeriesKind = SeriesKind::Word { bits: 16 };
    /// Four byte register.
    pub const U32: SeriesKind = SeriesKind::Word { bits: 32 };
    /// Eight byte register.
    pub const U64: SeriesKind = SeriesKind::Word { bits: 64 };

    /// Rejects kinds the engine cannot store.
    pub fn validate(self) -> ScopeResult<()> {
        match self {
            SeriesKind::Word { bits: 8 | 16 | 32 | 64 } | SeriesKind::Real => Ok(()),
            SeriesKind::Word { bits } => Err(ScopeError::UnsupportedKind(format!(
                "{bits}-bit words (expected 8, 16, 32 or 64)"
            ))),
            SeriesKind::Frame { len: 0 } => {
                Err(ScopeError::UnsupportedKind("zero-length frames".into()))
            }
            SeriesKind::Frame { .. } => Ok(()),
        }
    }

    /// Width of one raw value in bits.
    pub fn raw_bits(self) -> u64 {
        match self {
            SeriesKind::Word { bits } => u64::from(bits),
            SeriesKind::Real => 64,
            SeriesKind::Frame { len } => (len as u64).saturating_mul(8),
        }
    }

    /// Bytes an upstream raw sample of this kind must have.
    pub fn raw_len(self) -> usize {
        match self {
            SeriesKind::Word { bits } => usize::from(bits / 8),
            SeriesKind::Real => 8,
            SeriesKind::Frame { len } => len,
        }
    }
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesKind::Word { bits } => write!(f, "u{bits} word"),
            SeriesKind::Real => write!(f, "real"),
            SeriesKind::Frame { len } => write!(f, "{len}-byte frame"),
        }
    }
}

// =============================================================================
// Statistic identifiers
// =============================================================================

/// Class of bus error counters a statistic aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticKind {
    /// Invalid frame counters, one per port.
    Frame,
    /// Physical layer error counters, one per port.
    Physical,
    /// Errors forwarded from a previous slave, one per port.
    Previous,
    /// Lost link counters, one per port.
    LinkLost,
    /// Malformatted frame counter.
    MalformatFrame,
    /// Local problem counter.
    LocalProblem,
}

impl StatisticKind {
    /// Every kind, in catalog order.
    pub const ALL: [StatisticKind; 6] = [
        StatisticKind::Frame,
        StatisticKind::Physical,
        StatisticKind::Previous,
        StatisticKind::LinkLost,
        StatisticKind::MalformatFrame,
        StatisticKind::LocalProblem,
    ];

    /// Short name used in logs and keys.
    pub fn name(self) -> &'static str {
        match self {
            StatisticKind::Frame => "frame",
            StatisticKind::Physical => "physical",
            StatisticKind::Previous => "previous",
            StatisticKind::LinkLost => "link_lost",
            StatisticKind::MalformatFrame => "malformat_frame",
            StatisticKind::LocalProblem => "local_problem",
        }
    }
}

/// What a statistic reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticCategory {
    /// Accumulated error count.
    Total,
    /// Errors per second over the recent history.
    Frequency,
}

/// Whether a statistic covers one slave or the whole bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticScope {
    /// A single slave, by 1-based position.
    Slave(u16),
    /// Aggregate over all slaves.
    Global,
}

/// Identity of one derived statistic series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatisticId {
    /// Error counter class.
    pub kind: StatisticKind,
    /// Total or frequency.
    pub category: StatisticCategory,
    /// Slave or global.
    pub scope: StatisticScope,
}

impl StatisticId {
    /// Convenience constructor.
    pub const fn new(kind: StatisticKind, category: StatisticCategory, scope: StatisticScope) -> Self {
        Self {
            kind,
            category,
            scope,
        }
    }
}

impl fmt::Display for StatisticId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let category = match self.category {
            StatisticCategory::Total => "total",
            StatisticCategory::Frequency => "frequency",
        };
        match self.scope {
            StatisticScope::Slave(slave) => {
                write!(f, "{}/{category}/slave {slave}", self.kind.name())
            }
            StatisticScope::Global => write!(f, "{}/{category}/global", self.kind.name()),
        }
    }
}
