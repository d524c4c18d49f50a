//! Wait-free single-producer / single-consumer handoff.
//!
//! Three pre-allocated buffers rotate between the producer, a shared "back"
//! slot and the consumer. The producer always owns one buffer it can fill
//! without synchronisation; publishing swaps it with the back slot. The
//! consumer takes the back slot only when it holds something newer than what
//! the consumer already has.
//!
//! ```text
//!   producer            back (atomic)           consumer
//!  ┌────────┐  publish  ┌──────────┐  update   ┌────────┐
//!  │ input  │ ────────► │ idx|FRESH│ ────────► │ output │
//!  └────────┘ ◄──────── └──────────┘ ◄──────── └────────┘
//!        old back index          old output index
//! ```
//!
//! Neither side ever waits. If the producer publishes twice before the
//! consumer updates, the first buffer is recycled and the consumer sees only
//! the most recent one.

#![allow(unsafe_code)]

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const INDEX_MASK: u8 = 0b011;
const FRESH: u8 = 0b100;

struct Shared<T> {
    buffers: [CachePadded<UnsafeCell<T>>; 3],
    /// Index of the back buffer, with `FRESH` set when the producer published
    /// it and the consumer has not taken it yet.
    back: CachePadded<AtomicU8>,
}

// SAFETY: Shared is Sync because:
// 1. The three buffer indices are always a permutation of {0, 1, 2}
// 2. Producer and Consumer each own exactly one index at a time
// 3. Ownership changes only through the atomic swap of `back`
// 4. T: Send allows a buffer written on one thread to be read on another
unsafe impl<T: Send> Sync for Shared<T> {}

/// Writing half of a triple buffer.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    input: u8,
    published: u64,
}

/// Reading half of a triple buffer.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    output: u8,
}

/// Create a triple buffer with each of the three buffers built by `factory`.
pub fn triple_buffer_with<T, F>(mut factory: F) -> (Producer<T>, Consumer<T>)
where
    F: FnMut() -> T,
{
    let shared = Arc::new(Shared {
        buffers: std::array::from_fn(|_| CachePadded::new(UnsafeCell::new(factory()))),
        back: CachePadded::new(AtomicU8::new(1)),
    });
    (
        Producer {
            shared: Arc::clone(&shared),
            input: 0,
            published: 0,
        },
        Consumer { shared, output: 2 },
    )
}

/// Create a triple buffer whose buffers start as clones of `initial`.
pub fn triple_buffer<T: Clone>(initial: T) -> (Producer<T>, Consumer<T>) {
    triple_buffer_with(|| initial.clone())
}

impl<T: Send> Producer<T> {
    /// The buffer the producer is currently filling.
    ///
    /// After [`publish`](Self::publish) this is a recycled buffer holding
    /// older contents; clear it before reuse.
    pub fn input_buffer(&mut self) -> &mut T {
        // SAFETY: `input` is owned by this producer; the consumer and the back
        // slot hold the other two indices, and &mut self prevents aliasing.
        unsafe { &mut *self.shared.buffers[usize::from(self.input)].get() }
    }

    /// Hand the input buffer to the consumer and take back a free one.
    pub fn publish(&mut self) {
        let previous = self
            .shared
            .back
            .swap(self.input | FRESH, Ordering::AcqRel);
        self.input = previous & INDEX_MASK;
        self.published += 1;
    }

    /// Number of buffers published so far.
    pub fn published(&self) -> u64 {
        self.published
    }
}

impl<T: Send> Consumer<T> {
    /// Whether the producer published since the last [`update`](Self::update).
    pub fn has_fresh(&self) -> bool {
        self.shared.back.load(Ordering::Acquire) & FRESH != 0
    }

    /// Take the most recently published buffer, if it is newer than the
    /// current output buffer. Returns whether the output changed.
    pub fn update(&mut self) -> bool {
        if !self.has_fresh() {
            return false;
        }
        let previous = self.shared.back.swap(self.output, Ordering::AcqRel);
        self.output = previous & INDEX_MASK;
        true
    }

    /// The buffer most recently taken by [`update`](Self::update).
    pub fn output_buffer(&self) -> &T {
        // SAFETY: `output` is owned by this consumer until the next update,
        // which requires &mut self.
        unsafe { &*self.shared.buffers[usize::from(self.output)].get() }
    }

    /// Mutable access to the output buffer, e.g. to drain it in place.
    pub fn output_buffer_mut(&mut self) -> &mut T {
        // SAFETY: as for `output_buffer`, and &mut self rules out other borrows.
        unsafe { &mut *self.shared.buffers[usize::from(self.output)].get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_consumer_sees_nothing_before_publish() {
        let (_producer, mut consumer) = triple_buffer(0u32);
        assert!(!consumer.has_fresh());
        assert!(!consumer.update());
        assert_eq!(*consumer.output_buffer(), 0);
    }

    #[test]
    fn test_single_publish_is_delivered_once() {
        let (mut producer, mut consumer) = triple_buffer(0u32);
        *producer.input_buffer() = 7;
        producer.publish();
        assert!(consumer.update());
        assert_eq!(*consumer.output_buffer(), 7);
        assert!(!consumer.update());
        assert_eq!(*consumer.output_buffer(), 7);
    }

    #[test]
    fn test_consumer_skips_to_latest_publication() {
        let (mut producer, mut consumer) = triple_buffer(String::new());
        *producer.input_buffer() = "A".to_string();
        producer.publish();
        *producer.input_buffer() = "B".to_string();
        producer.publish();
        assert_eq!(producer.published(), 2);

        assert!(consumer.update());
        assert_eq!(consumer.output_buffer(), "B");
        assert!(!consumer.update());
    }

    #[test]
    fn test_buffers_rotate_without_aliasing() {
        let (mut producer, mut consumer) = triple_buffer(0u64);
        for round in 1..=10u64 {
            *producer.input_buffer() = round;
            producer.publish();
            assert!(consumer.update());
            assert_eq!(*consumer.output_buffer(), round);
            // The consumer's buffer must not be the one the producer writes next.
            *producer.input_buffer() = u64::MAX;
            assert_eq!(*consumer.output_buffer(), round);
        }
    }

    #[test]
    fn test_concurrent_handoff_never_tears() {
        // Each published buffer holds N copies of the same value; a torn read
        // would mix two values.
        const N: usize = 64;
        let (mut producer, mut consumer) = triple_buffer(vec![0u64; N]);
        let writer = thread::spawn(move || {
            for value in 1..=20_000u64 {
                producer.input_buffer().fill(value);
                producer.publish();
            }
        });

        let mut last = 0;
        while last < 20_000 {
            if consumer.update() {
                let buffer = consumer.output_buffer();
                let first = buffer[0];
                assert!(buffer.iter().all(|&v| v == first), "torn buffer");
                assert!(first > last, "went backwards: {first} after {last}");
                last = first;
            } else {
                thread::yield_now();
            }
        }
        writer.join().unwrap();
    }
}
