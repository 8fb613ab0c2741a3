//! Outbound state for one sliced message.
//!
//! `SlicedMessageState` owns the staged payload and a cursor into it. It
//! produces slices strictly one after another and can rewind to the first
//! slice for a retry, re-opening the [`ByteSource`] instead of holding the
//! payload in memory.

use std::{
    io::{self, Read},
    sync::Arc,
};

use tracing::{debug, warn};

use super::options::FailureCallback;
use crate::{
    cache::{CachedState, Deferred, RemovalCause},
    error::{SlicingError, StateError},
    hash::SliceHash,
    identifier::SliceIdentifier,
    metrics::{self, Outcome},
    overflow::{ByteSource, OverflowBuffer, SourceReader},
    wire::MessageSlice,
};

/// Number of slices needed for `len` bytes, never less than one.
///
/// Returns `None` when the count does not fit in `u32`.
pub(crate) fn total_slices(len: u64, slice_size: usize) -> Option<u32> {
    let slices = len.div_ceil(slice_size as u64).max(1);
    u32::try_from(slices).ok()
}

pub(crate) struct SlicedMessageState<A> {
    identifier: SliceIdentifier,
    buffer: OverflowBuffer,
    source: ByteSource,
    reader: Option<SourceReader>,
    slice_size: usize,
    total_slices: u32,
    current_slice_index: u32,
    last_slice_hash: SliceHash,
    current_slice_hash: SliceHash,
    try_count: u32,
    max_tries: u32,
    reply_to: A,
    on_failure: Option<FailureCallback>,
    closed: bool,
    log_context: Arc<str>,
}

/// Construction inputs, grouped to keep the constructor readable.
pub(crate) struct SlicedMessageInit<A> {
    pub(crate) identifier: SliceIdentifier,
    pub(crate) buffer: OverflowBuffer,
    pub(crate) source: ByteSource,
    pub(crate) slice_size: usize,
    pub(crate) total_slices: u32,
    pub(crate) max_tries: u32,
    pub(crate) reply_to: A,
    pub(crate) on_failure: FailureCallback,
    pub(crate) log_context: Arc<str>,
}

impl<A: Clone> SlicedMessageState<A> {
    pub(crate) fn new(init: SlicedMessageInit<A>) -> Self {
        Self {
            identifier: init.identifier,
            buffer: init.buffer,
            source: init.source,
            reader: None,
            slice_size: init.slice_size,
            total_slices: init.total_slices,
            current_slice_index: 0,
            last_slice_hash: SliceHash::INITIAL,
            current_slice_hash: SliceHash::INITIAL,
            try_count: 1,
            max_tries: init.max_tries,
            reply_to: init.reply_to,
            on_failure: Some(init.on_failure),
            closed: false,
            log_context: init.log_context,
        }
    }

    pub(crate) fn identifier(&self) -> &SliceIdentifier { &self.identifier }

    pub(crate) const fn total_slices(&self) -> u32 { self.total_slices }

    pub(crate) const fn current_slice_index(&self) -> u32 { self.current_slice_index }

    pub(crate) const fn try_count(&self) -> u32 { self.try_count }

    pub(crate) const fn is_closed(&self) -> bool { self.closed }

    pub(crate) const fn is_last_slice(&self, index: u32) -> bool { index == self.total_slices }

    /// Whether another attempt is permitted. `try_count` counts attempts
    /// made so far, including the current one.
    pub(crate) const fn can_retry(&self) -> bool { self.try_count < self.max_tries }

    /// Read and return the next slice.
    ///
    /// # Errors
    ///
    /// Fails if the state is closed, every slice was already produced, the
    /// source cannot be read, or it yields fewer bytes than expected.
    pub(crate) fn next_slice(&mut self) -> Result<MessageSlice<A>, SlicingError> {
        if self.closed {
            return Err(self.illegal(StateError::Closed));
        }
        if self.current_slice_index >= self.total_slices {
            return Err(self.illegal(StateError::Sealed));
        }

        let index = self.current_slice_index + 1;
        let offset = u64::from(index - 1) * self.slice_size as u64;
        let remaining = self.source.len().saturating_sub(offset);
        let size = usize::try_from(remaining.min(self.slice_size as u64))
            .map_err(|_| io::Error::other("slice size exceeds addressable memory"))?;

        let mut reader = match self.reader.take() {
            Some(reader) => reader,
            None => self.source.open()?,
        };
        let mut data = vec![0_u8; size];
        let read = read_fully(&mut reader, &mut data)?;
        if read != size {
            return Err(SlicingError::ShortRead {
                identifier: self.identifier.clone(),
                expected: size,
                read,
            });
        }
        self.reader = Some(reader);
        self.current_slice_index = index;

        debug!(
            log_context = %self.log_context,
            identifier = %self.identifier,
            slice_index = index,
            total_slices = self.total_slices,
            offset,
            size,
            "prepared slice"
        );

        self.last_slice_hash = self.current_slice_hash;
        self.current_slice_hash = SliceHash::of(&data);

        Ok(MessageSlice::new(
            self.identifier.clone(),
            data,
            index,
            self.total_slices,
            self.last_slice_hash,
            self.reply_to.clone(),
        ))
    }

    /// Rewind to before the first slice and count a new attempt.
    pub(crate) fn reset(&mut self) {
        self.reader = None;
        self.try_count += 1;
        self.current_slice_index = 0;
        self.last_slice_hash = SliceHash::INITIAL;
        self.current_slice_hash = SliceHash::INITIAL;
    }

    pub(crate) fn take_failure_callback(&mut self) -> Option<FailureCallback> { self.on_failure.take() }

    /// Release the staged payload. Idempotent.
    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.reader = None;
        self.buffer.cleanup();
    }

    fn illegal(&self, source: StateError) -> SlicingError {
        SlicingError::IllegalState {
            identifier: self.identifier.clone(),
            source,
        }
    }
}

impl<A: Clone + Send> CachedState for SlicedMessageState<A> {
    fn on_removal(&mut self, cause: RemovalCause) -> Option<Deferred> {
        if self.closed {
            return None;
        }
        self.close();

        if cause != RemovalCause::Expired {
            debug!(
                log_context = %self.log_context,
                identifier = %self.identifier,
                ?cause,
                "slicing state removed"
            );
            return None;
        }

        warn!(
            log_context = %self.log_context,
            identifier = %self.identifier,
            "slicing state expired from the cache"
        );
        metrics::inc_transfers(Outcome::Expired);
        let callback = self.on_failure.take()?;
        let identifier = self.identifier.clone();
        Some(Box::new(move || callback(SlicingError::Expired { identifier })))
    }
}

fn read_fully(reader: &mut SourceReader, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
    Ok(filled)
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
