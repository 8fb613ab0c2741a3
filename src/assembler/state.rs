//! Inbound state for one message being re-assembled.

use std::{io::Write, sync::Arc};

use tracing::{debug, warn};

use crate::{
    cache::{CachedState, Deferred, RemovalCause},
    error::{SequenceError, SlicingError, StateError},
    hash::SliceHash,
    identifier::SliceIdentifier,
    metrics::{self, Outcome},
    overflow::{ByteSource, OverflowBuffer},
};

/// Accumulates slices of one transfer in order.
///
/// The slice count is fixed by the first slice. Every later slice must carry
/// the next index and the hash of the payload appended before it; anything
/// else is rejected without touching the buffer.
pub(crate) struct AssembledMessageState {
    identifier: SliceIdentifier,
    buffer: OverflowBuffer,
    total_slices: u32,
    last_slice_index_received: u32,
    last_slice_hash_received: SliceHash,
    sealed: bool,
    closed: bool,
    log_context: Arc<str>,
}

impl AssembledMessageState {
    pub(crate) fn new(
        identifier: SliceIdentifier,
        total_slices: u32,
        buffer: OverflowBuffer,
        log_context: Arc<str>,
    ) -> Self {
        Self {
            identifier,
            buffer,
            total_slices,
            last_slice_index_received: 0,
            last_slice_hash_received: SliceHash::INITIAL,
            sealed: false,
            closed: false,
            log_context,
        }
    }

    #[cfg(test)]
    pub(crate) const fn is_sealed(&self) -> bool { self.sealed }

    #[cfg(test)]
    pub(crate) const fn is_closed(&self) -> bool { self.closed }

    /// Append one slice, returning whether it completed the message.
    ///
    /// # Errors
    ///
    /// Returns [`SlicingError::IllegalState`] once sealed or closed,
    /// [`SlicingError::Sequencing`] for an out-of-order slice or a broken
    /// hash chain, and [`SlicingError::Io`] if the buffer write fails.
    pub(crate) fn add_slice(
        &mut self,
        slice_index: u32,
        data: &[u8],
        last_slice_hash: SliceHash,
    ) -> Result<bool, SlicingError> {
        if self.sealed {
            return Err(self.illegal(StateError::Sealed));
        }
        if self.closed {
            return Err(self.illegal(StateError::Closed));
        }
        if slice_index > self.total_slices {
            return Err(self.sequencing(SequenceError::IndexOutOfRange {
                index: slice_index,
                total: self.total_slices,
            }));
        }
        let expected = self.last_slice_index_received + 1;
        if slice_index != expected {
            return Err(self.sequencing(SequenceError::UnexpectedIndex {
                expected,
                found: slice_index,
            }));
        }
        if last_slice_hash != self.last_slice_hash_received {
            return Err(self.sequencing(SequenceError::HashMismatch {
                expected: self.last_slice_hash_received,
                found: last_slice_hash,
            }));
        }

        self.buffer.write_all(data)?;
        self.last_slice_index_received = slice_index;
        self.last_slice_hash_received = SliceHash::of(data);
        self.sealed = slice_index == self.total_slices;

        debug!(
            log_context = %self.log_context,
            identifier = %self.identifier,
            slice_index,
            total_slices = self.total_slices,
            len = data.len(),
            sealed = self.sealed,
            "appended slice"
        );
        Ok(self.sealed)
    }

    /// Readable view of the re-assembled bytes. Only meaningful once sealed.
    ///
    /// # Errors
    ///
    /// Returns [`SlicingError::IllegalState`] if the state was closed, or an
    /// I/O error if the buffer cannot be flushed.
    pub(crate) fn assembled_source(&mut self) -> Result<ByteSource, SlicingError> {
        if self.closed {
            return Err(self.illegal(StateError::Closed));
        }
        Ok(self.buffer.to_stream_source()?)
    }

    /// Release the buffer. Idempotent.
    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.buffer.cleanup();
    }

    fn illegal(&self, source: StateError) -> SlicingError {
        SlicingError::IllegalState {
            identifier: self.identifier.clone(),
            source,
        }
    }

    fn sequencing(&self, source: SequenceError) -> SlicingError {
        SlicingError::Sequencing {
            identifier: self.identifier.clone(),
            source,
        }
    }
}

impl CachedState for AssembledMessageState {
    fn on_removal(&mut self, cause: RemovalCause) -> Option<Deferred> {
        if self.closed {
            return None;
        }
        self.close();

        if cause == RemovalCause::Expired {
            warn!(
                log_context = %self.log_context,
                identifier = %self.identifier,
                received = self.last_slice_index_received,
                total_slices = self.total_slices,
                "assembly state expired from the cache"
            );
            metrics::inc_transfers(Outcome::Expired);
        } else {
            debug!(
                log_context = %self.log_context,
                identifier = %self.identifier,
                ?cause,
                "assembly state removed"
            );
        }
        None
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
