//! Registry of every series held by the engine.

use crate::series::{Eviction, SeriesConfig, TimeSeriesList};
use crate::view::{DataView, NewestValueView};
use bytes::Bytes;
use parking_lot::RwLock;
use scope_core::{
    Projection, ScopeError, ScopeResult, SeriesKey, SeriesKind, TimeSeries,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A declared series with its concrete value type.
#[derive(Debug, Clone)]
pub enum SeriesHandle {
    /// Integer registers and process variables.
    Word(Arc<TimeSeriesList<u64>>),
    /// Floating point series, including derived statistics.
    Real(Arc<TimeSeriesList<f64>>),
    /// Byte snapshots such as the process image.
    Frame(Arc<TimeSeriesList<Bytes>>),
}

macro_rules! with_list {
    ($handle:expr, $list:ident => $body:expr) => {
        match $handle {
            SeriesHandle::Word($list) => $body,
            SeriesHandle::Real($list) => $body,
            SeriesHandle::Frame($list) => $body,
        }
    };
}

impl SeriesHandle {
    fn create(key: SeriesKey, kind: SeriesKind, config: SeriesConfig) -> ScopeResult<Self> {
        Ok(match kind {
            SeriesKind::Word { .. } => {
                SeriesHandle::Word(Arc::new(TimeSeriesList::new(key, kind, config)?))
            }
            SeriesKind::Real => SeriesHandle::Real(Arc::new(TimeSeriesList::new(key, kind, config)?)),
            SeriesKind::Frame { .. } => {
                SeriesHandle::Frame(Arc::new(TimeSeriesList::new(key, kind, config)?))
            }
        })
    }

    /// Series key.
    pub fn key(&self) -> &SeriesKey {
        with_list!(self, list => list.key())
    }

    /// Declared kind.
    pub fn kind(&self) -> SeriesKind {
        with_list!(self, list => list.kind())
    }

    /// See [`TimeSeriesList::memory_usage`].
    pub fn memory_usage(&self) -> usize {
        with_list!(self, list => list.memory_usage())
    }

    /// See [`TimeSeriesList::node_count`].
    pub fn node_count(&self) -> usize {
        with_list!(self, list => list.node_count())
    }

    /// See [`TimeSeriesList::average_node_bytes`].
    pub fn average_node_bytes(&self) -> usize {
        with_list!(self, list => list.average_node_bytes())
    }

    /// See [`TimeSeriesList::remove_oldest`].
    pub fn remove_oldest(&self, max_nodes: usize) -> Eviction {
        with_list!(self, list => list.remove_oldest(max_nodes))
    }

    /// Type-erased [`PointView`](crate::PointView).
    pub fn view(&self, series: TimeSeries, projection: Projection) -> ScopeResult<Box<dyn DataView>> {
        with_list!(self, list => Ok(Box::new(list.view(series, projection)?)))
    }

    /// Type-erased [`LatestView`](crate::LatestView).
    pub fn latest_view(&self, projection: Projection) -> ScopeResult<Box<dyn NewestValueView>> {
        with_list!(self, list => Ok(Box::new(list.latest_view(projection)?)))
    }

    fn mismatch(&self, expected: &str) -> ScopeError {
        ScopeError::KindMismatch {
            key: self.key().clone(),
            expected: expected.to_string(),
            actual: self.kind(),
        }
    }
}

/// Every series of a session, keyed by [`SeriesKey`].
///
/// Series are declared once and live until the registry is dropped.
#[derive(Debug, Default)]
pub struct SeriesRegistry {
    series: RwLock<HashMap<SeriesKey, SeriesHandle>>,
    config: SeriesConfig,
}

impl SeriesRegistry {
    /// Empty registry creating lists with `config`.
    pub fn new(config: SeriesConfig) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Layout applied to new lists.
    pub fn config(&self) -> SeriesConfig {
        self.config
    }

    /// Declare a new series.
    pub fn declare(&self, key: SeriesKey, kind: SeriesKind) -> ScopeResult<SeriesHandle> {
        let mut series = self.series.write();
        if series.contains_key(&key) {
            return Err(ScopeError::DuplicateSeries(key));
        }
        let handle = SeriesHandle::create(key.clone(), kind, self.config)?;
        debug!(%key, %kind, "declared series");
        series.insert(key, handle.clone());
        Ok(handle)
    }

    /// Look up a declared series.
    pub fn get(&self, key: &SeriesKey) -> ScopeResult<SeriesHandle> {
        self.series
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ScopeError::UnknownSeries(key.clone()))
    }

    /// Look up a word series.
    pub fn words(&self, key: &SeriesKey) -> ScopeResult<Arc<TimeSeriesList<u64>>> {
        match self.get(key)? {
            SeriesHandle::Word(list) => Ok(list),
            other => Err(other.mismatch("word")),
        }
    }

    /// Look up a real series.
    pub fn reals(&self, key: &SeriesKey) -> ScopeResult<Arc<TimeSeriesList<f64>>> {
        match self.get(key)? {
            SeriesHandle::Real(list) => Ok(list),
            other => Err(other.mismatch("real")),
        }
    }

    /// Look up a frame series.
    pub fn frames(&self, key: &SeriesKey) -> ScopeResult<Arc<TimeSeriesList<Bytes>>> {
        match self.get(key)? {
            SeriesHandle::Frame(list) => Ok(list),
            other => Err(other.mismatch("frame")),
        }
    }

    /// Whether `key` is declared.
    pub fn contains(&self, key: &SeriesKey) -> bool {
        self.series.read().contains_key(key)
    }

    /// Number of declared series.
    pub fn len(&self) -> usize {
        self.series.read().len()
    }

    /// `true` when nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.series.read().is_empty()
    }

    /// Declared keys, sorted.
    pub fn keys(&self) -> Vec<SeriesKey> {
        let mut keys: Vec<_> = self.series.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Handles of every declared series, for passes over the whole registry
    /// that must not hold the registry lock.
    pub fn snapshot(&self) -> Vec<SeriesHandle> {
        self.series.read().values().cloned().collect()
    }

    /// Bytes held by all series.
    pub fn memory_usage(&self) -> usize {
        self.series.read().values().map(SeriesHandle::memory_usage).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scope_core::{OutputType, Timestamp, Value};

    fn register(slave: u16, register: u16) -> SeriesKey {
        SeriesKey::Register { slave, register }
    }

    #[test]
    fn test_declare_and_lookup() {
        let registry = SeriesRegistry::default();
        assert!(registry.is_empty());
        registry.declare(register(1, 0x300), SeriesKind::U8).unwrap();
        registry
            .declare(SeriesKey::ProcessImage, SeriesKind::Frame { len: 16 })
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&SeriesKey::ProcessImage));
        assert!(registry.words(&register(1, 0x300)).is_ok());
        assert!(registry.frames(&SeriesKey::ProcessImage).is_ok());
        assert_eq!(
            registry.keys(),
            vec![register(1, 0x300), SeriesKey::ProcessImage]
        );
    }

    #[test]
    fn test_duplicate_declaration_fails() {
        let registry = SeriesRegistry::default();
        registry.declare(register(1, 0x300), SeriesKind::U8).unwrap();
        let err = registry
            .declare(register(1, 0x300), SeriesKind::U16)
            .unwrap_err();
        assert_eq!(err, ScopeError::DuplicateSeries(register(1, 0x300)));
    }

    #[test]
    fn test_unknown_and_mismatched_lookups() {
        let registry = SeriesRegistry::default();
        assert!(matches!(
            registry.get(&SeriesKey::ProcessImage),
            Err(ScopeError::UnknownSeries(_))
        ));
        registry.declare(register(2, 0x310), SeriesKind::U8).unwrap();
        assert!(matches!(
            registry.reals(&register(2, 0x310)),
            Err(ScopeError::KindMismatch { .. })
        ));
        assert!(matches!(
            registry.declare(register(2, 0x311), SeriesKind::Word { bits: 24 }),
            Err(ScopeError::UnsupportedKind(_))
        ));
    }

    #[test]
    fn test_type_erased_views() {
        let registry = SeriesRegistry::default();
        let handle = registry.declare(register(1, 0x300), SeriesKind::U8).unwrap();
        let words = registry.words(&register(1, 0x300)).unwrap();
        words.append(9, Timestamp::from_millis(1)).unwrap();

        let latest = handle.latest_view(Projection::natural(SeriesKind::U8)).unwrap();
        assert_eq!(latest.latest().unwrap().value, Value::U8(9));

        let view = handle
            .view(TimeSeries::everything(), Projection::full(OutputType::I8))
            .unwrap();
        assert_eq!(view.current_value().unwrap(), Value::I8(9));
        assert_eq!(view.current_f64().unwrap(), Some(9.0));
        assert!(registry.memory_usage() > 0);
    }
}
