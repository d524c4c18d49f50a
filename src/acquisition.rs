//! Handoff of raw samples from the real-time producer to the storage writer.
//!
//! The producer fills a [`SampleBatch`] per bus cycle and publishes it through
//! a triple buffer. Publishing never blocks; if the writer has not picked up
//! the previous batch, that batch is replaced and the writer notices the gap
//! through the batch sequence number.

use scope_core::{SeriesKey, Timestamp};
use scope_pool::{triple_buffer_with, Consumer, Producer};
use std::ops::Range;

/// One raw sample inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleEntry {
    /// Target series.
    pub key: SeriesKey,
    /// Sampling instant.
    pub timestamp: Timestamp,
    bytes: Range<usize>,
}

/// Ordered raw samples of one cycle, backed by a single byte arena.
///
/// Cleared batches keep their allocations, so a producer that reuses them
/// stops allocating once the arena has grown to a cycle's size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleBatch {
    sequence: u64,
    arena: Vec<u8>,
    entries: Vec<SampleEntry>,
}

impl SampleBatch {
    /// Empty batch with room for `arena_bytes` of raw data.
    pub fn with_capacity(arena_bytes: usize) -> Self {
        Self {
            sequence: 0,
            arena: Vec::with_capacity(arena_bytes),
            entries: Vec::new(),
        }
    }

    /// Append a raw sample.
    pub fn push(&mut self, key: SeriesKey, raw: &[u8], timestamp: Timestamp) {
        let start = self.arena.len();
        self.arena.extend_from_slice(raw);
        self.entries.push(SampleEntry {
            key,
            timestamp,
            bytes: start..self.arena.len(),
        });
    }

    /// Samples in push order with their raw bytes.
    pub fn iter(&self) -> impl Iterator<Item = (&SampleEntry, &[u8])> + '_ {
        self.entries
            .iter()
            .map(|entry| (entry, self.arena.get(entry.bytes.clone()).unwrap_or_default()))
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` without samples.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw bytes held.
    pub fn arena_len(&self) -> usize {
        self.arena.len()
    }

    /// Position of the batch in the producer's publish order, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Remove every sample, keeping the allocations.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.entries.clear();
        self.sequence = 0;
    }
}

/// Real-time side of the handoff.
pub struct AcquisitionProducer {
    buffers: Producer<SampleBatch>,
    next_sequence: u64,
}

impl AcquisitionProducer {
    /// Add a sample to the batch being filled.
    pub fn push(&mut self, key: SeriesKey, raw: &[u8], timestamp: Timestamp) {
        self.buffers.input_buffer().push(key, raw, timestamp);
    }

    /// Samples waiting in the batch being filled.
    pub fn pending(&mut self) -> usize {
        self.buffers.input_buffer().len()
    }

    /// Hand the current batch to the writer and start a new one.
    ///
    /// Returns the sequence number of the published batch. Wait-free.
    pub fn publish(&mut self) -> u64 {
        self.next_sequence += 1;
        let sequence = self.next_sequence;
        self.buffers.input_buffer().sequence = sequence;
        self.buffers.publish();
        // The new input buffer holds a batch the writer already consumed or
        // one it never saw; either way it is stale.
        self.buffers.input_buffer().clear();
        sequence
    }
}

impl std::fmt::Debug for AcquisitionProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionProducer")
            .field("published", &self.next_sequence)
            .finish()
    }
}

/// Writer side of the handoff.
pub type BatchConsumer = Consumer<SampleBatch>;

/// Connected producer and consumer whose batches start with `arena_bytes`
/// of capacity.
pub fn acquisition_channel(arena_bytes: usize) -> (AcquisitionProducer, BatchConsumer) {
    let (buffers, consumer) = triple_buffer_with(|| SampleBatch::with_capacity(arena_bytes));
    (
        AcquisitionProducer {
            buffers,
            next_sequence: 0,
        },
        consumer,
    )
}
