//! Callback sinks that record what a slicer or assembler reported.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use message_slicing::SlicingError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> { mutex.lock().unwrap_or_else(PoisonError::into_inner) }

/// Records errors passed to slicing failure callbacks.
#[derive(Clone, Default)]
pub struct FailureLog {
    errors: Arc<Mutex<Vec<SlicingError>>>,
}

impl FailureLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// A failure callback feeding this log.
    pub fn callback(&self) -> impl FnOnce(SlicingError) + Send + 'static {
        let errors = Arc::clone(&self.errors);
        move |error| lock(&errors).push(error)
    }

    /// Number of failures recorded.
    #[must_use]
    pub fn count(&self) -> usize { lock(&self.errors).len() }

    /// Remove and return every recorded failure.
    #[must_use]
    pub fn take(&self) -> Vec<SlicingError> { std::mem::take(&mut *lock(&self.errors)) }
}

/// Records messages handed to an assembler's completion callback.
pub struct Collector<M, A> {
    assembled: Arc<Mutex<Vec<(M, A)>>>,
}

impl<M, A> Collector<M, A> {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            assembled: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of messages recorded.
    #[must_use]
    pub fn len(&self) -> usize { lock(&self.assembled).len() }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool { lock(&self.assembled).is_empty() }

    /// Remove and return every recorded message with its sender address.
    #[must_use]
    pub fn take(&self) -> Vec<(M, A)> { std::mem::take(&mut *lock(&self.assembled)) }
}

impl<M: Send + 'static, A: Send + 'static> Collector<M, A> {
    /// A completion callback feeding this collector.
    pub fn sink(&self) -> impl Fn(M, A) + Send + Sync + 'static {
        let assembled = Arc::clone(&self.assembled);
        move |message, from| lock(&assembled).push((message, from))
    }
}

impl<M, A> Default for Collector<M, A> {
    fn default() -> Self { Self::new() }
}

impl<M, A> Clone for Collector<M, A> {
    fn clone(&self) -> Self {
        Self {
            assembled: Arc::clone(&self.assembled),
        }
    }
}
