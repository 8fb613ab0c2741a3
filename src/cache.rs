//! Per-transfer state cache with inactivity expiry.
//!
//! Both the slicer and the assembler keep one state value per
//! [`SliceIdentifier`](crate::identifier::SliceIdentifier). The map itself is
//! a [`DashMap`], so lookups for unrelated transfers never contend on a
//! single lock, and every state sits behind its own mutex so slow I/O on one
//! transfer does not stall the others.
//!
//! Expiry is swept explicitly: the owner calls [`StateCache::sweep_expired_at`]
//! on its own cadence. Every removal path hands the state its
//! [`RemovalCause`] exactly once, which is where buffers get cleaned up.

use std::{
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};

/// Current time on tokio's clock, which honours paused time in tests and falls
/// back to the system clock outside a runtime.
pub(crate) fn now() -> Instant { tokio::time::Instant::now().into_std() }

/// Why a state left its cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalCause {
    /// The owner removed it: completion, failure, abort or cancellation.
    Explicit,
    /// No activity within the configured inactivity window.
    Expired,
    /// The owner is shutting down.
    Shutdown,
}

/// Work to run once the state's lock has been released.
pub(crate) type Deferred = Box<dyn FnOnce() + Send>;

/// Hook invoked when a state leaves the cache.
pub(crate) trait CachedState: Send {
    /// Release resources. Must tolerate being called on already closed
    /// state. Any returned action runs after the state lock is dropped.
    fn on_removal(&mut self, cause: RemovalCause) -> Option<Deferred>;
}

/// A cached state plus its last-access timestamp.
#[derive(Debug)]
pub(crate) struct CacheEntry<S> {
    state: Mutex<S>,
    last_access: Mutex<Instant>,
}

impl<S> CacheEntry<S> {
    fn new(state: S, now: Instant) -> Self {
        Self {
            state: Mutex::new(state),
            last_access: Mutex::new(now),
        }
    }

    /// Lock the state. A poisoned lock is recovered; states track their own
    /// closed flag, so a panic mid-update cannot resurrect them.
    pub(crate) fn lock(&self) -> MutexGuard<'_, S> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self, now: Instant) {
        let mut last = self.last_access.lock().unwrap_or_else(PoisonError::into_inner);
        if now > *last {
            *last = now;
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let last = self.last_access.lock().unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(*last)
    }
}

/// Concurrent map from transfer identifier to shared state.
#[derive(Debug)]
pub(crate) struct StateCache<K: Eq + Hash, S> {
    entries: DashMap<K, Arc<CacheEntry<S>>>,
    expire_after: Option<Duration>,
}

impl<K, S> StateCache<K, S>
where
    K: Eq + Hash + Clone,
    S: CachedState,
{
    pub(crate) fn new(expire_after: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            expire_after,
        }
    }

    pub(crate) fn len(&self) -> usize { self.entries.len() }

    /// Look up `key`, refreshing its last-access time.
    pub(crate) fn get(&self, key: &K, now: Instant) -> Option<Arc<CacheEntry<S>>> {
        let entry = self.entries.get(key).map(|found| Arc::clone(found.value()))?;
        entry.touch(now);
        Some(entry)
    }

    /// Look up `key`, creating its state with `create` when absent.
    pub(crate) fn get_or_try_insert_with<E>(
        &self,
        key: K,
        now: Instant,
        create: impl FnOnce() -> Result<S, E>,
    ) -> Result<Arc<CacheEntry<S>>, E> {
        match self.entries.entry(key) {
            Entry::Occupied(occupied) => {
                let entry = Arc::clone(occupied.get());
                drop(occupied);
                entry.touch(now);
                Ok(entry)
            }
            Entry::Vacant(vacant) => {
                let entry = Arc::new(CacheEntry::new(create()?, now));
                vacant.insert(Arc::clone(&entry));
                Ok(entry)
            }
        }
    }

    /// Insert `state`, replacing and releasing any previous entry.
    pub(crate) fn insert(&self, key: K, state: S, now: Instant) -> Arc<CacheEntry<S>> {
        let entry = Arc::new(CacheEntry::new(state, now));
        if let Some(previous) = self.entries.insert(key, Arc::clone(&entry)) {
            Self::release(&previous, RemovalCause::Explicit);
        }
        entry
    }

    /// Remove `key` explicitly. Returns whether an entry was present.
    pub(crate) fn invalidate(&self, key: &K) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                Self::release(&entry, RemovalCause::Explicit);
                true
            }
            None => false,
        }
    }

    /// Remove `key` only if it still maps to `expected`.
    ///
    /// Guards against discarding a newer transfer state that replaced the
    /// one the caller was working on.
    pub(crate) fn invalidate_entry(&self, key: &K, expected: &Arc<CacheEntry<S>>) -> bool {
        match self
            .entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, expected))
        {
            Some((_, entry)) => {
                Self::release(&entry, RemovalCause::Explicit);
                true
            }
            None => false,
        }
    }

    /// Remove every entry whose key satisfies `predicate`.
    pub(crate) fn invalidate_matching(
        &self,
        predicate: impl Fn(&K) -> bool,
        cause: RemovalCause,
    ) -> Vec<K> {
        let keys: Vec<K> = self
            .entries
            .iter()
            .filter(|item| predicate(item.key()))
            .map(|item| item.key().clone())
            .collect();

        keys.into_iter()
            .filter(|key| match self.entries.remove(key) {
                Some((_, entry)) => {
                    Self::release(&entry, cause);
                    true
                }
                None => false,
            })
            .collect()
    }

    /// Remove every entry.
    pub(crate) fn invalidate_all(&self, cause: RemovalCause) -> usize {
        self.invalidate_matching(|_| true, cause).len()
    }

    /// Remove entries idle for at least the inactivity window as of `now`.
    ///
    /// Returns the keys that were evicted. Caches without an inactivity
    /// window never expire anything.
    pub(crate) fn sweep_expired_at(&self, now: Instant) -> Vec<K> {
        let Some(window) = self.expire_after else {
            return Vec::new();
        };

        let candidates: Vec<K> = self
            .entries
            .iter()
            .filter(|item| item.value().idle_for(now) >= window)
            .map(|item| item.key().clone())
            .collect();

        candidates
            .into_iter()
            .filter(|key| {
                match self
                    .entries
                    .remove_if(key, |_, entry| entry.idle_for(now) >= window)
                {
                    Some((_, entry)) => {
                        Self::release(&entry, RemovalCause::Expired);
                        true
                    }
                    None => false,
                }
            })
            .collect()
    }

    fn release(entry: &CacheEntry<S>, cause: RemovalCause) {
        let deferred = entry.lock().on_removal(cause);
        if let Some(action) = deferred {
            action();
        }
    }
}
