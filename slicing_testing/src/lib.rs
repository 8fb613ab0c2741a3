//! Utilities for exercising `message_slicing` in integration tests.
//!
//! [`Loopback`] wires a slicer and an assembler together over a recording
//! transport that only delivers when pumped:
//!
//! ```rust
//! use std::num::NonZeroUsize;
//!
//! use message_slicing::{AssemblerConfig, RawMessage, SlicerConfig};
//! use slicing_testing::{Loopback, payload, staged};
//!
//! let pair: Loopback<RawMessage> = Loopback::new(
//!     SlicerConfig::new(NonZeroUsize::new(16).expect("non-zero")),
//!     AssemblerConfig::default(),
//! );
//! assert!(pair.slice("doc", staged(&payload(100))));
//! pair.pump();
//! assert_eq!(pair.received.len(), 1);
//! ```

pub mod logging;
pub mod loopback;
pub mod metrics;
pub mod sinks;

use std::io::Write;

pub use logging::{CapturedEvent, LoggerHandle, logger};
pub use loopback::{Addr, Loopback, RECEIVER, SENDER, Traffic};
use message_slicing::{OverflowConfig, SlicePayload};
pub use message_slicing::test_helpers::RecordingTransport;
pub use metrics::{Counters, debugging_recorder_setup};
pub use sinks::{Collector, FailureLog};

/// Deterministic payload of `len` bytes with no short repeating period.
#[must_use]
pub fn payload(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from(i % 251).expect("remainder fits in u8"))
        .collect()
}

/// Stage `bytes` in an in-memory buffer for slicing as raw bytes.
///
/// # Panics
///
/// Panics if writing to the buffer fails.
#[must_use]
pub fn staged<M>(bytes: &[u8]) -> SlicePayload<M> { staged_with(bytes, &OverflowConfig::default()) }

/// Stage `bytes` in a buffer built from `config`.
///
/// # Panics
///
/// Panics if writing to the buffer fails.
#[must_use]
pub fn staged_with<M>(bytes: &[u8], config: &OverflowConfig) -> SlicePayload<M> {
    let mut buffer = config.new_buffer();
    buffer.write_all(bytes).expect("stage payload");
    SlicePayload::Bytes(buffer)
}
