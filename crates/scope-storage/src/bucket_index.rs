//! Coarse time index of a series.
//!
//! The index is sparse: bucket `b` has an entry only if some point falls in
//! it, and the entry holds the first such point. Buckets skipped by an idle
//! gap cost nothing; a lookup takes the next indexed bucket at or after the
//! requested one, which is the first point at or after the bucket start. The
//! caller scans forward from there.

use crate::node::{Location, Node};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Answer of a bucket lookup.
pub(crate) enum Lookup<T> {
    /// Nothing indexed yet.
    Empty,
    /// The bucket precedes every indexed bucket.
    Before,
    /// Start scanning here.
    At(Location<T>),
    /// The bucket follows every indexed bucket.
    After,
}

pub(crate) struct BucketIndex<T> {
    entries: BTreeMap<u64, Location<T>>,
}

impl<T> BucketIndex<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Record `location` as the first point of `bucket`. Buckets at or
    /// before the newest indexed one are left alone.
    pub(crate) fn record(&mut self, bucket: u64, location: Location<T>) {
        match self.entries.last_key_value() {
            Some((&last, _)) if bucket <= last => {}
            _ => {
                self.entries.insert(bucket, location);
            }
        }
    }

    pub(crate) fn lookup(&self, bucket: u64) -> Lookup<T> {
        let Some((&first, _)) = self.entries.first_key_value() else {
            return Lookup::Empty;
        };
        if bucket < first {
            return Lookup::Before;
        }
        match self.entries.range(bucket..).next() {
            Some((_, location)) => Lookup::At(location.clone()),
            None => Lookup::After,
        }
    }

    /// Drop entries for buckets before the head's, and map the head's bucket
    /// to the head itself.
    pub(crate) fn evict_before(&mut self, head: &Arc<Node<T>>, head_bucket: u64) {
        self.entries = self.entries.split_off(&head_bucket);
        // Later buckets start after the head's first point, so only the head
        // bucket can still point into a released node.
        self.entries
            .insert(head_bucket, Location::new(Arc::clone(head), 0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scope_core::{DataPoint, Timestamp};

    fn node(sequence: u64, millis: u64) -> Arc<Node<u64>> {
        Arc::new(Node::with_first(
            4,
            sequence,
            DataPoint::new(sequence, Timestamp::from_millis(millis)),
        ))
    }

    fn at(lookup: Lookup<u64>) -> u64 {
        match lookup {
            Lookup::At(location) => location.node.sequence(),
            _ => panic!("expected an indexed location"),
        }
    }

    #[test]
    fn test_skipped_buckets_resolve_forward() {
        let mut index = BucketIndex::new();
        assert!(matches!(index.lookup(0), Lookup::Empty));

        index.record(2, Location::new(node(0, 2_000), 0));
        index.record(5, Location::new(node(1, 5_000), 0));
        assert_eq!(index.len(), 2);
        assert!(matches!(index.lookup(1), Lookup::Before));
        assert_eq!(at(index.lookup(2)), 0);
        // Buckets 3 and 4 saw no points; they resolve to the first point of bucket 5.
        assert_eq!(at(index.lookup(3)), 1);
        assert_eq!(at(index.lookup(4)), 1);
        assert_eq!(at(index.lookup(5)), 1);
        assert!(matches!(index.lookup(6), Lookup::After));
    }

    #[test]
    fn test_huge_gap_adds_one_entry() {
        let mut index = BucketIndex::new();
        index.record(0, Location::new(node(0, 0), 0));
        index.record(20_000_000, Location::new(node(1, 20_000_000), 0));
        assert_eq!(index.len(), 2);
        assert_eq!(at(index.lookup(1)), 1);
        assert_eq!(at(index.lookup(19_999_999)), 1);
        assert!(matches!(index.lookup(20_000_001), Lookup::After));
    }

    #[test]
    fn test_rerecording_a_bucket_is_ignored() {
        let mut index = BucketIndex::new();
        index.record(1, Location::new(node(0, 1_000), 0));
        index.record(1, Location::new(node(1, 1_500), 0));
        assert_eq!(index.len(), 1);
        assert_eq!(at(index.lookup(1)), 0);
    }

    #[test]
    fn test_eviction_remaps_head_bucket() {
        let mut index = BucketIndex::new();
        let nodes: Vec<_> = (0..4).map(|i| node(i, i * 1_000)).collect();
        for (i, n) in nodes.iter().enumerate() {
            index.record(i as u64, Location::new(Arc::clone(n), 0));
        }
        index.evict_before(&nodes[2], 2);
        assert!(matches!(index.lookup(1), Lookup::Before));
        assert_eq!(at(index.lookup(2)), 2);
        assert_eq!(at(index.lookup(3)), 3);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_eviction_prepends_head_bucket() {
        // The head node starts in bucket 1, but the first surviving entry is bucket 2
        // because bucket 1 pointed into an evicted node.
        let mut index = BucketIndex::new();
        let old = node(0, 0);
        let head = node(1, 1_900);
        index.record(0, Location::new(Arc::clone(&old), 0));
        index.record(1, Location::new(Arc::clone(&old), 0));
        index.record(2, Location::new(node(2, 2_000), 0));
        index.evict_before(&head, 1);
        assert_eq!(at(index.lookup(1)), 1);
        assert_eq!(at(index.lookup(2)), 2);
    }
}
