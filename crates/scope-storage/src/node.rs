//! Fixed-capacity segment of a time-series list.
//!
//! A node is written by exactly one thread and read by any number of others
//! without locks:
//!
//! 1. the writer fills slot `len` (a write-once cell),
//! 2. then publishes it by storing `len + 1` with `Release`,
//! 3. readers load `len` with `Acquire` and only look at slots below it.
//!
//! Successor links are write-once as well, and a node is fully initialised
//! before it is linked. Nodes are shared through `Arc`, so a reader holding a
//! node keeps it (and everything after it) alive regardless of eviction.

use crate::value::SeriesValue;
use scope_core::{DataPoint, Timestamp};
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

pub(crate) struct Node<T> {
    slots: Box<[OnceLock<DataPoint<T>>]>,
    len: AtomicUsize,
    next: OnceLock<Arc<Node<T>>>,
    /// Heap bytes owned by the stored values.
    heap_bytes: AtomicUsize,
    /// Position of the node in its list, increasing from the first node.
    sequence: u64,
}

/// Why a point could not be written into a node.
pub(crate) enum PushError<T> {
    /// All slots are used.
    Full(DataPoint<T>),
    /// Another writer filled the slot first.
    Contended,
}

impl<T: SeriesValue> Node<T> {
    /// Node of `capacity` slots holding `first` in slot 0.
    pub(crate) fn with_first(capacity: usize, sequence: u64, first: DataPoint<T>) -> Self {
        let capacity = capacity.max(1);
        let heap = first.value.heap_bytes();
        let slots = std::iter::once(OnceLock::from(first))
            .chain((1..capacity).map(|_| OnceLock::new()))
            .collect();
        Self {
            slots,
            len: AtomicUsize::new(1),
            next: OnceLock::new(),
            heap_bytes: AtomicUsize::new(heap),
            sequence,
        }
    }

    /// Memory of a node with `capacity` slots, excluding value heap memory.
    pub(crate) fn fixed_footprint(capacity: usize) -> usize {
        mem::size_of::<Node<T>>() + capacity.max(1) * mem::size_of::<OnceLock<DataPoint<T>>>()
    }

    /// Memory currently attributed to this node.
    pub(crate) fn footprint(&self) -> usize {
        Self::fixed_footprint(self.slots.len()) + self.heap_bytes.load(Ordering::Relaxed)
    }

    /// Write `point` into the next free slot and publish it.
    ///
    /// Returns the slot index.
    pub(crate) fn try_push(&self, point: DataPoint<T>) -> Result<usize, PushError<T>> {
        let len = self.len.load(Ordering::Acquire);
        let Some(slot) = self.slots.get(len) else {
            return Err(PushError::Full(point));
        };
        let heap = point.value.heap_bytes();
        if slot.set(point).is_err() {
            return Err(PushError::Contended);
        }
        self.heap_bytes.fetch_add(heap, Ordering::Relaxed);
        self.len.store(len + 1, Ordering::Release);
        Ok(len)
    }

    /// Attach the successor. Fails if one is already linked.
    pub(crate) fn link(&self, next: Arc<Node<T>>) -> Result<(), Arc<Node<T>>> {
        self.next.set(next)
    }
}

impl<T> Node<T> {
    /// Number of published points.
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Published point at `slot`.
    pub(crate) fn get(&self, slot: usize) -> Option<&DataPoint<T>> {
        if slot >= self.len() {
            return None;
        }
        self.slots.get(slot).and_then(OnceLock::get)
    }

    pub(crate) fn timestamp(&self, slot: usize) -> Option<Timestamp> {
        self.get(slot).map(|p| p.timestamp)
    }

    pub(crate) fn first_timestamp(&self) -> Option<Timestamp> {
        self.timestamp(0)
    }

    /// Newest published point.
    pub(crate) fn last(&self) -> Option<&DataPoint<T>> {
        self.len().checked_sub(1).and_then(|slot| self.get(slot))
    }

    pub(crate) fn next(&self) -> Option<&Arc<Node<T>>> {
        self.next.get()
    }

    /// First slot in `from..len` whose timestamp is at or after `target`.
    pub(crate) fn search_from(&self, from: usize, target: Timestamp) -> Option<usize> {
        let len = self.len();
        let (mut lo, mut hi) = (from, len);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.timestamp(mid) {
                Some(ts) if ts < target => lo = mid + 1,
                _ => hi = mid,
            }
        }
        (lo < len).then_some(lo)
    }
}

impl<T> Drop for Node<T> {
    fn drop(&mut self) {
        // Unlink iteratively so dropping a long chain cannot overflow the stack.
        let mut next = self.next.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut owned) => next = owned.next.take(),
                Err(_) => break,
            }
        }
    }
}

/// A published slot of a node.
pub(crate) struct Location<T> {
    pub(crate) node: Arc<Node<T>>,
    pub(crate) slot: usize,
}

impl<T> Clone for Location<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            slot: self.slot,
        }
    }
}

impl<T> Location<T> {
    pub(crate) fn new(node: Arc<Node<T>>, slot: usize) -> Self {
        Self { node, slot }
    }

    /// Newest published slot of `node`.
    pub(crate) fn last_of(node: Arc<Node<T>>) -> Self {
        let slot = node.len().saturating_sub(1);
        Self { node, slot }
    }

    pub(crate) fn point(&self) -> Option<&DataPoint<T>> {
        self.node.get(self.slot)
    }

    pub(crate) fn timestamp(&self) -> Option<Timestamp> {
        self.node.timestamp(self.slot)
    }

    /// The point stored right after this one, if published.
    pub(crate) fn successor(&self) -> Option<Location<T>> {
        if self.slot + 1 < self.node.len() {
            return Some(Self::new(Arc::clone(&self.node), self.slot + 1));
        }
        self.node.next().map(|next| Self::new(Arc::clone(next), 0))
    }

    /// First point at or after `target`, starting here.
    ///
    /// `Err` carries the newest point reached when no such point exists.
    pub(crate) fn find(&self, target: Timestamp) -> Result<Location<T>, Location<T>> {
        let mut node = Arc::clone(&self.node);
        let mut from = self.slot;
        loop {
            // Skip whole nodes whose successor starts at or before the target.
            while let Some(next) = node.next() {
                match next.first_timestamp() {
                    Some(first) if first <= target => {
                        let next = Arc::clone(next);
                        node = next;
                        from = 0;
                    }
                    _ => break,
                }
            }
            if let Some(slot) = node.search_from(from, target) {
                return Ok(Self::new(node, slot));
            }
            match node.next() {
                // Linked after the skip loop looked; re-examine from there.
                Some(next) => {
                    let next = Arc::clone(next);
                    node = next;
                    from = 0;
                }
                None => return Err(Self::last_of(node)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(value: u64, millis: u64) -> DataPoint<u64> {
        DataPoint::new(value, Timestamp::from_millis(millis))
    }

    fn chain(capacity: usize, millis: &[u64]) -> Arc<Node<u64>> {
        let head = Arc::new(Node::with_first(capacity, 0, point(0, millis[0])));
        let mut tail = Arc::clone(&head);
        for (i, &ms) in millis.iter().enumerate().skip(1) {
            match tail.try_push(point(i as u64, ms)) {
                Ok(_) => {}
                Err(PushError::Full(p)) => {
                    let node = Arc::new(Node::with_first(capacity, tail.sequence() + 1, p));
                    assert!(tail.link(Arc::clone(&node)).is_ok());
                    tail = node;
                }
                Err(PushError::Contended) => unreachable!(),
            }
        }
        head
    }

    #[test]
    fn test_push_until_full() {
        let node = Node::with_first(3, 0, point(1, 1));
        assert!(node.try_push(point(2, 2)).is_ok());
        assert!(node.try_push(point(3, 3)).is_ok());
        assert!(matches!(node.try_push(point(4, 4)), Err(PushError::Full(_))));
        assert_eq!(node.len(), 3);
        assert_eq!(node.last().map(|p| p.value), Some(3));
        assert_eq!(node.get(3).map(|p| p.value), None);
    }

    #[test]
    fn test_search_within_node() {
        let node = chain(8, &[10, 20, 30, 40]);
        assert_eq!(node.search_from(0, Timestamp::from_millis(5)), Some(0));
        assert_eq!(node.search_from(0, Timestamp::from_millis(20)), Some(1));
        assert_eq!(node.search_from(0, Timestamp::from_millis(21)), Some(2));
        assert_eq!(node.search_from(3, Timestamp::from_millis(10)), Some(3));
        assert_eq!(node.search_from(0, Timestamp::from_millis(41)), None);
    }

    #[test]
    fn test_find_crosses_nodes() {
        let head = chain(2, &[10, 20, 30, 40, 50]);
        let start = Location::new(head, 0);

        let found = start.find(Timestamp::from_millis(35)).ok().unwrap();
        assert_eq!(found.timestamp(), Some(Timestamp::from_millis(40)));
        assert_eq!(found.node.sequence(), 1);

        let exact = start.find(Timestamp::from_millis(50)).ok().unwrap();
        assert_eq!(exact.point().map(|p| p.value), Some(4));

        let beyond = start.find(Timestamp::from_millis(60)).err().unwrap();
        assert_eq!(beyond.timestamp(), Some(Timestamp::from_millis(50)));
    }

    #[test]
    fn test_successor_walks_every_point() {
        let head = chain(3, &[1, 2, 3, 4, 5, 6, 7]);
        let mut loc = Location::new(head, 0);
        let mut seen = vec![loc.point().unwrap().value];
        while let Some(next) = loc.successor() {
            seen.push(next.point().unwrap().value);
            loc = next;
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_long_chain_drops_without_recursion() {
        let millis: Vec<u64> = (0..200_000).collect();
        let head = chain(1, &millis);
        drop(head);
    }

    #[test]
    fn test_footprint_counts_heap_bytes() {
        let frame = bytes::Bytes::from(vec![0u8; 100]);
        let node = Node::with_first(4, 0, DataPoint::new(frame.clone(), Timestamp::ZERO));
        let fixed = Node::<bytes::Bytes>::fixed_footprint(4);
        assert_eq!(node.footprint(), fixed + 100);
        assert!(node
            .try_push(DataPoint::new(frame, Timestamp::from_nanos(1)))
            .is_ok());
        assert_eq!(node.footprint(), fixed + 200);
    }
}
