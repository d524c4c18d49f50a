//! Storage writer thread.
//!
//! Sole writer of the acquisition series: takes the newest published
//! [`SampleBatch`](crate::acquisition::SampleBatch), decodes every sample by
//! the declared kind of its series and appends it. Malformed samples are
//! dropped and counted; batches the producer replaced before the writer got
//! to them are counted as skipped. A reclamation check follows every drain.

use crate::acquisition::{BatchConsumer, SampleBatch};
use crate::store::TelemetryStore;
use scope_core::SeriesKey;
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name of the writer thread.
pub const WRITER_THREAD_NAME: &str = "storage-writer";

/// Counters of a running writer.
#[derive(Debug, Default)]
pub struct WriterStats {
    batches: AtomicU64,
    samples: AtomicU64,
    dropped: AtomicU64,
    skipped_batches: AtomicU64,
}

/// Point-in-time copy of [`WriterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterReport {
    /// Batches drained.
    pub batches: u64,
    /// Samples appended.
    pub samples: u64,
    /// Samples rejected (unknown series, wrong length, append failures).
    pub dropped: u64,
    /// Batches replaced by the producer before they were drained.
    pub skipped_batches: u64,
}

impl WriterStats {
    /// Current counters.
    pub fn report(&self) -> WriterReport {
        WriterReport {
            batches: self.batches.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            skipped_batches: self.skipped_batches.load(Ordering::Relaxed),
        }
    }
}

/// Drains batches into a [`TelemetryStore`].
///
/// Usable inline (tests, single-threaded tools) or on its own thread through
/// [`StorageWriter::spawn`].
pub struct BatchDrain {
    store: Arc<TelemetryStore>,
    consumer: BatchConsumer,
    stats: Arc<WriterStats>,
    last_sequence: u64,
}

impl BatchDrain {
    /// Drain into `store` from `consumer`.
    pub fn new(store: Arc<TelemetryStore>, consumer: BatchConsumer) -> Self {
        Self {
            store,
            consumer,
            stats: Arc::new(WriterStats::default()),
            last_sequence: 0,
        }
    }

    /// Shared counters.
    pub fn stats(&self) -> &Arc<WriterStats> {
        &self.stats
    }

    /// Drain the newest batch if one was published. Returns whether a batch
    /// was drained.
    pub fn poll(&mut self) -> bool {
        if !self.consumer.update() {
            return false;
        }
        let batch = self.consumer.output_buffer();
        let sequence = batch.sequence();
        let skipped = sequence.saturating_sub(self.last_sequence + 1);
        if skipped > 0 {
            warn!(skipped, sequence, "writer fell behind, batches replaced before draining");
            self.stats
                .skipped_batches
                .fetch_add(skipped, Ordering::Relaxed);
        }
        self.last_sequence = sequence;

        let (appended, dropped) = store_batch(&self.store, batch);
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        self.stats.samples.fetch_add(appended, Ordering::Relaxed);
        if dropped > 0 {
            warn!(dropped, sequence, "dropped malformed samples");
            self.stats.dropped.fetch_add(dropped, Ordering::Relaxed);
        }

        if let Some(report) = self.store.reclaim_now() {
            debug!(
                nodes = report.nodes_freed,
                bytes = report.bytes_freed,
                "reclaimed after drain"
            );
        }
        true
    }
}

fn store_batch(store: &TelemetryStore, batch: &SampleBatch) -> (u64, u64) {
    let mut appended = 0;
    let mut dropped = 0;
    let mut register_cycle = None;
    for (entry, raw) in batch.iter() {
        match &entry.key {
            SeriesKey::ProcessImage => store.record_process_image_cycle(entry.timestamp),
            SeriesKey::Register { .. } if register_cycle.is_none() => {
                register_cycle = Some(entry.timestamp);
            }
            _ => {}
        }
        match store.append_raw(&entry.key, raw, entry.timestamp) {
            Ok(()) => appended += 1,
            Err(error) => {
                debug!(key = %entry.key, %error, "dropping sample");
                dropped += 1;
            }
        }
    }
    if let Some(timestamp) = register_cycle {
        store.record_register_cycle(timestamp);
    }
    (appended, dropped)
}

/// Handle of the writer thread.
pub struct StorageWriter {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    stats: Arc<WriterStats>,
}

impl StorageWriter {
    /// Start the writer thread. It sleeps `idle` whenever no batch is pending.
    pub fn spawn(drain: BatchDrain, idle: Duration) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::clone(drain.stats());
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(WRITER_THREAD_NAME.to_string())
            .spawn(move || run(drain, idle, &thread_stop))?;
        info!(idle_us = idle.as_micros() as u64, "storage writer started");
        Ok(Self {
            handle: Some(handle),
            stop,
            stats,
        })
    }

    /// Current counters.
    pub fn report(&self) -> WriterReport {
        self.stats.report()
    }

    /// Stop the thread after a final drain and wait for it.
    pub fn shutdown(mut self) -> WriterReport {
        self.stop_and_join();
        self.stats.report()
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("storage writer panicked");
            }
        }
    }
}

impl Drop for StorageWriter {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn run(mut drain: BatchDrain, idle: Duration, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        if !drain.poll() {
            thread::sleep(idle);
        }
    }
    // Pick up whatever was published just before the stop request.
    drain.poll();
    let report = drain.stats().report();
    info!(
        batches = report.batches,
        samples = report.samples,
        dropped = report.dropped,
        skipped = report.skipped_batches,
        "storage writer stopped"
    );
}
