//! Fixed-capacity circular histories.
//!
//! - [`HistoryBuffer`]: single-owner FIFO of the last `capacity` entries, used
//!   by the statistics engine to compute rates over recent samples.
//! - [`RingBuffer`]: timestamps recorded by one thread and read by any
//!   number of others through atomics, used for ingest rate estimation.
//!
//! Both overwrite their oldest entry when full.
//!
//! ```text
//!   capacity = 4, after pushing 10, 20, 30, 40, 50
//!
//!   Index:     0     1     2     3
//!            ┌─────┬─────┬─────┬─────┐
//!   slots:   │ 50  │ 20  │ 30  │ 40  │
//!            └─────┴─────┴─────┴─────┘
//!                    ▲
//!                 cursor = 1 (oldest, next write)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Fixed-capacity FIFO of the most recent entries.
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T> {
    slots: Vec<T>,
    capacity: usize,
    /// Next write position once the buffer is full.
    cursor: usize,
}

impl<T: Copy> HistoryBuffer<T> {
    /// Empty history holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    /// Append `entry`, dropping the oldest one when full.
    pub fn push(&mut self, entry: T) {
        if self.slots.len() < self.capacity {
            self.slots.push(entry);
        } else {
            self.slots[self.cursor] = entry;
            self.cursor = (self.cursor + 1) % self.capacity;
        }
    }

    /// Oldest retained entry.
    pub fn oldest(&self) -> Option<T> {
        if self.slots.len() < self.capacity {
            self.slots.first().copied()
        } else {
            self.slots.get(self.cursor).copied()
        }
    }

    /// Most recent entry.
    pub fn newest(&self) -> Option<T> {
        if self.slots.is_empty() {
            return None;
        }
        if self.slots.len() < self.capacity {
            return self.slots.last().copied();
        }
        let idx = (self.cursor + self.capacity - 1) % self.capacity;
        self.slots.get(idx).copied()
    }

    /// Retained entries.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// `true` before the first push.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        let (newer, older) = self.slots.split_at(self.cursor);
        older.iter().chain(newer.iter()).copied()
    }

    /// Forget every entry.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.cursor = 0;
    }
}

/// Timestamp ring with a single writer and lock-free readers.
///
/// Readers may observe a window that is one record stale while the writer is
/// active; rate estimates tolerate that.
#[derive(Debug)]
pub struct RingBuffer {
    slots: Box<[AtomicU64]>,
    /// Total number of records ever written.
    written: AtomicU64,
}

impl RingBuffer {
    /// Ring retaining the last `capacity` timestamps (at least two).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            slots: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            written: AtomicU64::new(0),
        }
    }

    fn slot(&self, position: u64) -> &AtomicU64 {
        let len = self.slots.len() as u64;
        &self.slots[(position % len) as usize]
    }

    /// Record a timestamp in nanoseconds. Must only be called from one thread.
    pub fn record(&self, nanos: u64) {
        let n = self.written.load(Ordering::Relaxed);
        self.slot(n).store(nanos, Ordering::Relaxed);
        self.written.store(n + 1, Ordering::Release);
    }

    /// Number of records ever written.
    pub fn total(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    /// Records currently retained.
    pub fn len(&self) -> usize {
        self.total().min(self.slots.len() as u64) as usize
    }

    /// `true` before the first record.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Oldest and newest retained timestamps and the number of records between
    /// them (inclusive).
    ///
    /// When the ring is full the oldest slot is skipped, since it is the next
    /// one the writer overwrites.
    pub fn window(&self) -> Option<(u64, u64, u64)> {
        let n = self.total();
        if n == 0 {
            return None;
        }
        let capacity = self.slots.len() as u64;
        let first = if n > capacity { n - capacity + 1 } else { 0 };
        let oldest = self.slot(first).load(Ordering::Relaxed);
        let newest = self.slot(n - 1).load(Ordering::Relaxed);
        Some((oldest, newest, n - first))
    }

    /// Time covered by the retained records.
    pub fn span(&self) -> Duration {
        match self.window() {
            Some((oldest, newest, _)) => Duration::from_nanos(newest.saturating_sub(oldest)),
            None => Duration::ZERO,
        }
    }

    /// Records per second over the retained window; zero with fewer than two
    /// records or an empty span.
    pub fn rate_hz(&self) -> f64 {
        let Some((oldest, newest, count)) = self.window() else {
            return 0.0;
        };
        let span = newest.saturating_sub(oldest);
        if count < 2 || span == 0 {
            return 0.0;
        }
        (count - 1) as f64 / (span as f64 / 1e9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_overwrites_oldest() {
        let mut history = HistoryBuffer::new(4);
        assert!(history.is_empty());
        assert_eq!(history.oldest(), None);
        assert_eq!(history.newest(), None);

        for v in [10, 20, 30] {
            history.push(v);
        }
        assert_eq!(history.oldest(), Some(10));
        assert_eq!(history.newest(), Some(30));
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![10, 20, 30]);

        history.push(40);
        history.push(50);
        assert_eq!(history.len(), 4);
        assert_eq!(history.oldest(), Some(20));
        assert_eq!(history.newest(), Some(50));
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![20, 30, 40, 50]);
    }

    #[test]
    fn test_history_of_one_keeps_latest() {
        let mut history = HistoryBuffer::new(0);
        assert_eq!(history.capacity(), 1);
        history.push(1);
        history.push(2);
        assert_eq!(history.oldest(), Some(2));
        assert_eq!(history.newest(), Some(2));
        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn test_history_matches_reference_deque() {
        use rand::Rng;
        use std::collections::VecDeque;

        let mut rng = rand::thread_rng();
        let mut history = HistoryBuffer::new(7);
        let mut reference = VecDeque::new();
        for _ in 0..500 {
            let v: u32 = rng.gen();
            history.push(v);
            reference.push_back(v);
            if reference.len() > 7 {
                reference.pop_front();
            }
            assert_eq!(history.oldest(), reference.front().copied());
            assert_eq!(history.newest(), reference.back().copied());
        }
        assert_eq!(
            history.iter().collect::<Vec<_>>(),
            reference.into_iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_ring_rate_over_window() {
        let ring = RingBuffer::new(5);
        assert_eq!(ring.rate_hz(), 0.0);
        ring.record(0);
        assert_eq!(ring.rate_hz(), 0.0);
        // 1 kHz
        for i in 1..=3u64 {
            ring.record(i * 1_000_000);
        }
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.span(), Duration::from_millis(3));
        assert!((ring.rate_hz() - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_ring_window_skips_slot_under_overwrite() {
        let ring = RingBuffer::new(3);
        for i in 0..10u64 {
            ring.record(i * 10);
        }
        assert_eq!(ring.total(), 10);
        assert_eq!(ring.len(), 3);
        // Slots hold 70, 80, 90; 70 is next to be overwritten.
        assert_eq!(ring.window(), Some((80, 90, 2)));
        assert!((ring.rate_hz() - 1e8).abs() < 1.0);
    }
}
