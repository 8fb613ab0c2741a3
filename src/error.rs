//! Error types surfaced by the slicing and assembly layers.
//!
//! Failures never cross the transport as panics or return values. The sender
//! hands them to the transfer's failure callback, and the receiver converts
//! them into [`SliceFailure`] replies so the peer can retry or give up.

use std::io;

use bincode::error::{DecodeError, EncodeError};
use thiserror::Error;

use crate::{hash::SliceHash, identifier::SliceIdentifier, wire::SliceFailure};

/// Ordering and integrity violations detected while appending a slice.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    /// The slice index is not the successor of the last one appended.
    #[error("slice index mismatch: expected {expected}, found {found}")]
    UnexpectedIndex {
        /// Index the receiver expected next.
        expected: u32,
        /// Index carried by the slice.
        found: u32,
    },
    /// The slice claims a position beyond the transfer's slice count.
    #[error("slice index {index} exceeds total slice count {total}")]
    IndexOutOfRange {
        /// Index carried by the slice.
        index: u32,
        /// Slice count learned from the first slice.
        total: u32,
    },
    /// The slice's view of the previous payload does not match what the
    /// receiver appended.
    #[error("previous slice hash mismatch: expected {expected}, found {found}")]
    HashMismatch {
        /// Hash of the last payload the receiver appended.
        expected: SliceHash,
        /// Hash the sender recorded for its previous slice.
        found: SliceHash,
    },
}

/// Operations attempted on state that no longer accepts them.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// The final slice was already appended.
    #[error("transfer already sealed")]
    Sealed,
    /// The state was cleaned up.
    #[error("transfer state already closed")]
    Closed,
    /// The overflow buffer was written after its contents were exposed for
    /// reading.
    #[error("overflow buffer written after it was closed")]
    WriteAfterClose,
}

/// Errors produced by [`MessageSlicer`](crate::slicer::MessageSlicer) and
/// [`MessageAssembler`](crate::assembler::MessageAssembler).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SlicingError {
    /// A slice arrived out of order or broke the hash chain.
    #[error("sequencing error for {identifier}: {source}")]
    Sequencing {
        /// Transfer the slice belonged to.
        identifier: SliceIdentifier,
        /// Which ordering or integrity check failed.
        #[source]
        source: SequenceError,
    },
    /// A slice was applied to sealed or closed state.
    #[error("illegal state for {identifier}: {source}")]
    IllegalState {
        /// Transfer whose state rejected the operation.
        identifier: SliceIdentifier,
        /// Why the state no longer accepts it.
        #[source]
        source: StateError,
    },
    /// A non-first slice arrived for a transfer the receiver does not know.
    #[error("no assembly state for {identifier} and slice index {slice_index}")]
    UnknownTransfer {
        /// Transfer named by the slice.
        identifier: SliceIdentifier,
        /// Index carried by the slice.
        slice_index: u32,
    },
    /// Reading the staged payload returned fewer bytes than the slice needs.
    #[error("short read for {identifier}: expected {expected} bytes, read {read}")]
    ShortRead {
        /// Transfer being sliced.
        identifier: SliceIdentifier,
        /// Bytes the slice should contain.
        expected: usize,
        /// Bytes actually read before end of input.
        read: usize,
    },
    /// Local file or memory buffer I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[from] EncodeError),
    /// The re-assembled bytes could not be deserialized.
    #[error("failed to decode message: {0}")]
    Decode(#[from] DecodeError),
    /// Every permitted attempt failed.
    #[error("maximum slicing tries ({tries}) reached for {identifier}")]
    RetriesExhausted {
        /// Transfer that gave up.
        identifier: SliceIdentifier,
        /// Attempts made, including the first.
        tries: u32,
    },
    /// The receiver reported a failure that cannot be retried.
    #[error("receiver failed {identifier}: {failure}")]
    Remote {
        /// Transfer the receiver rejected.
        identifier: SliceIdentifier,
        /// Failure as reported by the receiver.
        failure: SliceFailure,
    },
    /// No reply arrived within the inactivity timeout.
    #[error("slicing state for {identifier} expired due to inactivity of the assembling peer")]
    Expired {
        /// Transfer that went quiet.
        identifier: SliceIdentifier,
    },
    /// [`SliceOptions`](crate::slicer::SliceOptions) failed validation.
    #[error("invalid slice options: {0}")]
    InvalidOptions(&'static str),
}

impl SlicingError {
    /// Whether the sender should restart the transfer from the first slice.
    ///
    /// Sequencing errors and unknown transfers discard the receiver's state,
    /// so a full resend can still succeed. Every other failure is final.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Sequencing { .. } | Self::UnknownTransfer { .. }
        )
    }

    /// Build the wire representation sent back to the slicing peer.
    #[must_use]
    pub fn to_failure(&self) -> SliceFailure { SliceFailure::new(self.to_string(), self.is_retriable()) }
}
