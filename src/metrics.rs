//! Metric helpers for `message_slicing`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! the helpers compile to nothing.

/// Name of the counter tracking slices sent or accepted.
pub const SLICES_TOTAL: &str = "message_slicing_slices_total";
/// Name of the counter tracking finished transfers by outcome.
pub const TRANSFERS_TOTAL: &str = "message_slicing_transfers_total";
/// Name of the counter tracking restarts from the first slice.
pub const RETRIES_TOTAL: &str = "message_slicing_retries_total";

/// Direction of slice processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Slices accepted by an assembler.
    Inbound,
    /// Slices sent by a slicer.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// How a transfer ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Every slice was delivered and acknowledged.
    Completed,
    /// A local or remote error ended the transfer.
    Failed,
    /// The state was evicted for inactivity.
    Expired,
}

impl Outcome {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Failed => "failed",
            Outcome::Expired => "expired",
        }
    }
}

/// Record a slice for the given direction.
pub fn inc_slices(direction: Direction) {
    #[cfg(feature = "metrics")]
    metrics::counter!(SLICES_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a finished transfer.
pub fn inc_transfers(outcome: Outcome) {
    #[cfg(feature = "metrics")]
    metrics::counter!(TRANSFERS_TOTAL, "outcome" => outcome.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

/// Record a restart from the first slice.
pub fn inc_retries() {
    #[cfg(feature = "metrics")]
    metrics::counter!(RETRIES_TOTAL).increment(1);
}
