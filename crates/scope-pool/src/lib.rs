//! Buffers between the acquisition path and the storage engine.
//!
//! This crate provides the pieces that sit on or next to the real-time
//! producer, where waiting and per-sample allocation are not acceptable:
//!
//! - [`triple_buffer`]: wait-free handoff of whole acquisition batches from
//!   the producer to the storage writer
//! - [`RingBuffer`]: atomic timestamp ring for ingest rate estimation
//! - [`HistoryBuffer`]: fixed-capacity FIFO used for derived statistics
//!
//! # Example
//!
//! ```
//! use scope_pool::triple_buffer;
//!
//! let (mut producer, mut consumer) = triple_buffer(Vec::<u8>::new());
//!
//! // Producer side: fill and publish, never blocks.
//! producer.input_buffer().extend_from_slice(b"cycle 1");
//! producer.publish();
//!
//! // Consumer side: pick up the newest batch, if any.
//! if consumer.update() {
//!     assert_eq!(consumer.output_buffer().as_slice(), b"cycle 1");
//! }
//! ```

pub mod history;
pub mod triple_buffer;

pub use history::{HistoryBuffer, RingBuffer};
pub use triple_buffer::{triple_buffer, triple_buffer_with, Consumer, Producer};
