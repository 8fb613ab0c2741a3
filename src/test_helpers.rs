#![cfg(any(test, feature = "test-helpers"))]
//! Test-only helpers shared by unit tests and the `slicing_testing` crate.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    transport::{Address, Transport},
    wire::{MessageSlice, MessageSliceReply, WireMessage},
};

/// Transport that records every send instead of delivering it.
///
/// Clones share the same log, so a test can hand one clone to a slicer or
/// assembler and inspect traffic through another.
pub struct RecordingTransport<M, A> {
    sent: Arc<Mutex<VecDeque<(A, WireMessage<M, A>)>>>,
}

impl<M, A> RecordingTransport<M, A> {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    fn log(&self) -> MutexGuard<'_, VecDeque<(A, WireMessage<M, A>)>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of recorded sends not yet taken.
    #[must_use]
    pub fn len(&self) -> usize { self.log().len() }

    /// Whether nothing is waiting to be taken.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.log().is_empty() }

    /// Remove and return the oldest recorded send.
    #[must_use]
    pub fn pop(&self) -> Option<(A, WireMessage<M, A>)> { self.log().pop_front() }

    /// Remove and return every recorded send, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<(A, WireMessage<M, A>)> { self.log().drain(..).collect() }

    /// Remove the oldest send, expecting it to be a slice.
    ///
    /// # Panics
    ///
    /// Panics if nothing was sent or the oldest send is not a slice.
    #[must_use]
    pub fn expect_slice(&self) -> (A, MessageSlice<A>)
    where
        M: std::fmt::Debug,
        A: std::fmt::Debug,
    {
        match self.pop() {
            Some((to, WireMessage::Slice(slice))) => (to, slice),
            other => panic!("expected a slice, got {other:?}"),
        }
    }

    /// Remove the oldest send, expecting it to be a slice reply.
    ///
    /// # Panics
    ///
    /// Panics if nothing was sent or the oldest send is not a reply.
    #[must_use]
    pub fn expect_reply(&self) -> (A, MessageSliceReply<A>)
    where
        M: std::fmt::Debug,
        A: std::fmt::Debug,
    {
        match self.pop() {
            Some((to, WireMessage::SliceReply(reply))) => (to, reply),
            other => panic!("expected a slice reply, got {other:?}"),
        }
    }
}

impl<M, A> Default for RecordingTransport<M, A> {
    fn default() -> Self { Self::new() }
}

impl<M, A> Clone for RecordingTransport<M, A> {
    fn clone(&self) -> Self {
        Self {
            sent: Arc::clone(&self.sent),
        }
    }
}

impl<M: Send, A: Address> Transport<M, A> for RecordingTransport<M, A> {
    fn send(&self, to: &A, message: WireMessage<M, A>) {
        self.log().push_back((to.clone(), message));
    }
}
