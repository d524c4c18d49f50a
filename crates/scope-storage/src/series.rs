//! Append-only, segmented time series with time-based seek.
//!
//! A [`TimeSeriesList`] stores the `(value, timestamp)` pairs of one key in a
//! chain of fixed-capacity nodes. One writer appends; any number of readers
//! traverse it through views, concurrently with appends and with eviction of
//! the oldest nodes.
//!
//! # Architecture
//!
//! ```text
//!  head ──► [node 0] ──► [node 1] ──► [node 2] ◄── tail
//!             ▲             ▲   ▲
//!  bucket index: b0 ────────┘   │
//!                b1 ────────────┘  (first point at or after each bucket start)
//! ```
//!
//! - **Append** writes into the tail node and publishes the slot with a
//!   release store of the node length. A full tail gets a successor, which is
//!   initialised before it is linked and before the tail pointer moves.
//! - **Seek** consults the bucket index under the list lock, then scans
//!   forward without holding any lock.
//! - **Eviction** releases the oldest nodes that no live view still needs.
//!   Views hold their nodes through `Arc`, so eviction never frees memory a
//!   reader is using; the view inventory only decides what the list lets go.
//!
//! # Thread Safety
//!
//! - **Appends**: single writer by contract. A second concurrent writer is
//!   detected on the slot it races for and rejected with `ConcurrentAppend`.
//! - **Reads**: lock-free once a view is positioned.
//! - **Bookkeeping** (bucket index, view inventory): one short per-list mutex,
//!   taken once per newly crossed bucket, per view creation and per eviction.

use crate::bucket_index::{BucketIndex, Lookup};
use crate::node::{Location, Node, PushError};
use crate::value::SeriesValue;
use crate::view::{LatestView, PointView};
use parking_lot::{Mutex, RwLock};
use scope_core::limits::{DEFAULT_BUCKET_WIDTH, DEFAULT_NODE_CAPACITY};
use scope_core::time::duration_nanos;
use scope_core::{
    DataPoint, Projection, ScopeError, ScopeResult, SeriesKey, SeriesKind, TimeSeries, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

const NO_BUCKET: u64 = u64::MAX;
const UNPOSITIONED: u64 = u64::MAX;
const MIN_PRUNE_THRESHOLD: usize = 64;

/// Layout parameters shared by every list of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesConfig {
    /// Points per node.
    pub node_capacity: usize,
    /// Width of one seek-index bucket.
    pub bucket_width: Duration,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            node_capacity: DEFAULT_NODE_CAPACITY,
            bucket_width: DEFAULT_BUCKET_WIDTH,
        }
    }
}

/// Result of [`TimeSeriesList::remove_oldest`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Eviction {
    /// Nodes released.
    pub nodes: usize,
    /// Bytes released.
    pub bytes: usize,
}

/// Position a live view still needs, shared between the view and the list's
/// inventory.
#[derive(Debug)]
pub(crate) struct ViewAnchor {
    position: AtomicU64,
}

impl ViewAnchor {
    fn new() -> Self {
        Self {
            position: AtomicU64::new(UNPOSITIONED),
        }
    }

    pub(crate) fn set(&self, timestamp: Timestamp) {
        self.position.store(timestamp.as_nanos(), Ordering::Release);
    }

    fn required(&self) -> Option<Timestamp> {
        match self.position.load(Ordering::Acquire) {
            UNPOSITIONED => None,
            nanos => Some(Timestamp::from_nanos(nanos)),
        }
    }
}

struct Bookkeeping<T> {
    index: BucketIndex<T>,
    views: Vec<Weak<ViewAnchor>>,
    prune_at: usize,
}

impl<T> Bookkeeping<T> {
    fn register(&mut self, anchor: &Arc<ViewAnchor>) {
        self.views.push(Arc::downgrade(anchor));
        if self.views.len() >= self.prune_at {
            self.prune();
            self.prune_at = (self.views.len() * 2).max(MIN_PRUNE_THRESHOLD);
        }
    }

    fn prune(&mut self) {
        self.views.retain(|view| view.strong_count() > 0);
    }

    /// Oldest timestamp any live, positioned view still needs.
    fn min_required(&mut self) -> Option<Timestamp> {
        self.prune();
        self.views
            .iter()
            .filter_map(Weak::upgrade)
            .filter_map(|anchor| anchor.required())
            .min()
    }
}

/// Append-only time series of one key.
pub struct TimeSeriesList<T> {
    key: SeriesKey,
    kind: SeriesKind,
    node_capacity: usize,
    bucket_nanos: u64,
    head: RwLock<Option<Arc<Node<T>>>>,
    tail: RwLock<Option<Arc<Node<T>>>>,
    book: Mutex<Bookkeeping<T>>,
    /// Writer-owned: newest bucket already recorded in the index.
    last_bucket: AtomicU64,
    /// Writer-owned: sequence number of the next node.
    next_sequence: AtomicU64,
    node_count: AtomicUsize,
    bytes: AtomicUsize,
}

impl<T: SeriesValue> TimeSeriesList<T> {
    /// Empty list for `key`.
    ///
    /// Fails when `kind` cannot be stored as `T`.
    pub fn new(key: SeriesKey, kind: SeriesKind, config: SeriesConfig) -> ScopeResult<Self> {
        kind.validate()?;
        if !T::accepts(kind) {
            return Err(ScopeError::KindMismatch {
                key,
                expected: T::TYPE_NAME.to_string(),
                actual: kind,
            });
        }
        Ok(Self {
            key,
            kind,
            node_capacity: config.node_capacity.max(1),
            bucket_nanos: duration_nanos(config.bucket_width).max(1),
            head: RwLock::new(None),
            tail: RwLock::new(None),
            book: Mutex::new(Bookkeeping {
                index: BucketIndex::new(),
                views: Vec::new(),
                prune_at: MIN_PRUNE_THRESHOLD,
            }),
            last_bucket: AtomicU64::new(NO_BUCKET),
            next_sequence: AtomicU64::new(0),
            node_count: AtomicUsize::new(0),
            bytes: AtomicUsize::new(0),
        })
    }

    /// Key this list stores.
    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    /// Raw representation of the stored values.
    pub fn kind(&self) -> SeriesKind {
        self.kind
    }

    /// Points per node.
    pub fn node_capacity(&self) -> usize {
        self.node_capacity
    }

    /// Append a point.
    ///
    /// `timestamp` must be strictly greater than every timestamp appended
    /// before; this is not checked. Must only be called from the list's single
    /// writer.
    pub fn append(&self, value: T, timestamp: Timestamp) -> ScopeResult<()> {
        let heap = value.heap_bytes();
        let point = DataPoint::new(value, timestamp);
        let tail = self.tail.read().clone();

        let point = match &tail {
            Some(node) => match node.try_push(point) {
                Ok(slot) => {
                    self.bytes.fetch_add(heap, Ordering::Relaxed);
                    self.index(node, slot, timestamp);
                    return Ok(());
                }
                Err(PushError::Full(point)) => point,
                Err(PushError::Contended) => {
                    return Err(ScopeError::ConcurrentAppend(self.key.clone()))
                }
            },
            None => point,
        };

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let node = Arc::new(Node::with_first(self.node_capacity, sequence, point));
        if let Some(previous) = &tail {
            if previous.link(Arc::clone(&node)).is_err() {
                return Err(ScopeError::ConcurrentAppend(self.key.clone()));
            }
        }
        self.node_count.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(node.footprint(), Ordering::Relaxed);
        if tail.is_none() {
            *self.head.write() = Some(Arc::clone(&node));
        }
        *self.tail.write() = Some(Arc::clone(&node));
        self.index(&node, 0, timestamp);
        Ok(())
    }

    fn index(&self, node: &Arc<Node<T>>, slot: usize, timestamp: Timestamp) {
        let bucket = timestamp.bucket(self.bucket_nanos);
        let last = self.last_bucket.load(Ordering::Relaxed);
        if last != NO_BUCKET && bucket <= last {
            return;
        }
        self.book
            .lock()
            .index
            .record(bucket, Location::new(Arc::clone(node), slot));
        self.last_bucket.store(bucket, Ordering::Relaxed);
    }

    pub(crate) fn head_location(&self) -> Option<Location<T>> {
        self.head
            .read()
            .as_ref()
            .map(|node| Location::new(Arc::clone(node), 0))
    }

    pub(crate) fn tail_location(&self) -> Option<Location<T>> {
        self.tail
            .read()
            .as_ref()
            .map(|node| Location::last_of(Arc::clone(node)))
    }

    /// Newest point, `None` before the first append.
    pub fn latest(&self) -> Option<DataPoint<T>> {
        let tail = self.tail.read().clone()?;
        tail.last().cloned()
    }

    /// Oldest retained point.
    pub fn oldest(&self) -> Option<DataPoint<T>> {
        let head = self.head.read().clone()?;
        head.get(0).cloned()
    }

    /// `true` before the first append.
    pub fn is_empty(&self) -> bool {
        self.tail.read().is_none()
    }

    /// Cursor starting at the first point at or after `series.start`.
    ///
    /// - start before all data: the view starts at the oldest retained point
    /// - start after all data: the view starts at the newest point
    /// - empty list: the view is unpositioned and picks up the oldest point
    ///   on its first `advance`
    pub fn view(self: &Arc<Self>, series: TimeSeries, projection: Projection) -> ScopeResult<PointView<T>> {
        let resolved = projection.resolve(self.kind)?;
        let anchor = Arc::new(ViewAnchor::new());

        let start = {
            let mut book = self.book.lock();
            book.register(&anchor);
            let start = match book.index.lookup(series.start.bucket(self.bucket_nanos)) {
                Lookup::Empty | Lookup::Before => self.head_location(),
                Lookup::At(location) => Some(location),
                Lookup::After => self.tail_location(),
            };
            // Provisional position; it is never later than the final one.
            if let Some(ts) = start.as_ref().and_then(Location::timestamp) {
                anchor.set(ts);
            }
            start
        };

        let position = start.map(|location| match location.find(series.start) {
            Ok(found) | Err(found) => found,
        });
        if let Some(ts) = position.as_ref().and_then(Location::timestamp) {
            anchor.set(ts);
        }
        Ok(PointView::new(
            Arc::clone(self),
            position,
            series.step,
            resolved,
            anchor,
        ))
    }

    /// Cursor that always reflects the newest point.
    pub fn latest_view(self: &Arc<Self>, projection: Projection) -> ScopeResult<LatestView<T>> {
        let resolved = projection.resolve(self.kind)?;
        Ok(LatestView::new(Arc::clone(self), resolved))
    }

    /// Release up to `max_nodes` of the oldest nodes.
    ///
    /// A node is released only if its newest point is older than every
    /// position a live view still needs. The tail node is never released.
    pub fn remove_oldest(&self, max_nodes: usize) -> Eviction {
        if max_nodes == 0 {
            return Eviction::default();
        }
        let mut book = self.book.lock();
        let required = book.min_required();
        let Some(old_head) = self.head.read().clone() else {
            return Eviction::default();
        };

        let mut eviction = Eviction::default();
        let mut cursor = Arc::clone(&old_head);
        while eviction.nodes < max_nodes {
            let Some(next) = cursor.next().cloned() else {
                break;
            };
            let last = cursor.last().map(|p| p.timestamp);
            if matches!((last, required), (Some(last), Some(required)) if last >= required) {
                break;
            }
            eviction.nodes += 1;
            eviction.bytes += cursor.footprint();
            cursor = next;
        }
        if eviction.nodes == 0 {
            return eviction;
        }

        *self.head.write() = Some(Arc::clone(&cursor));
        let head_bucket = cursor
            .first_timestamp()
            .map_or(0, |ts| ts.bucket(self.bucket_nanos));
        book.index.evict_before(&cursor, head_bucket);
        drop(book);

        self.node_count.fetch_sub(eviction.nodes, Ordering::Relaxed);
        self.bytes.fetch_sub(eviction.bytes, Ordering::Relaxed);
        debug!(
            key = %self.key,
            nodes = eviction.nodes,
            bytes = eviction.bytes,
            "evicted oldest nodes"
        );
        // The released chain is dropped here, outside the bookkeeping lock.
        drop(old_head);
        eviction
    }

    /// Nodes currently held.
    pub fn node_count(&self) -> usize {
        self.node_count.load(Ordering::Relaxed)
    }

    /// Bytes attributed to this list: node slots plus value heap memory.
    pub fn memory_usage(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Average bytes per node, or the footprint of an empty node.
    pub fn average_node_bytes(&self) -> usize {
        match self.node_count() {
            0 => Node::<T>::fixed_footprint(self.node_capacity),
            nodes => self.memory_usage() / nodes,
        }
    }

    /// Views whose owners have not dropped them yet.
    pub fn live_views(&self) -> usize {
        let mut book = self.book.lock();
        book.prune();
        book.views.len()
    }
}

impl<T> std::fmt::Debug for TimeSeriesList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSeriesList")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("nodes", &self.node_count.load(Ordering::Relaxed))
            .field("bytes", &self.bytes.load(Ordering::Relaxed))
            .finish()
    }
}
