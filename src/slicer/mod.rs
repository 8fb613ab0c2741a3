//! Sender side of the slicing protocol.
//!
//! [`MessageSlicer`] serializes an outbound message into an
//! [`OverflowBuffer`](crate::overflow::OverflowBuffer), splits it into
//! fixed-size [`MessageSlice`]s and sends them one at a time, advancing only
//! when the receiver acknowledges the previous slice. Retriable failures
//! restart the transfer from the first slice, up to
//! [`SlicerConfig::max_tries`] attempts.
//!
//! Replies are processed under the owning transfer's own lock. Messages
//! produced while handling a reply are sent only after that lock is
//! released, so a transport that delivers synchronously cannot deadlock the
//! slicer.

mod config;
mod options;
mod state;

use std::{
    io,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use tracing::{debug, error, info, warn};

pub use self::{
    config::{DEFAULT_MAX_TRIES, SlicerConfig},
    options::{FailureCallback, SliceOptions, SlicePayload},
};
use self::state::{SlicedMessageInit, SlicedMessageState, total_slices};
use crate::{
    cache::{self, RemovalCause, StateCache},
    error::SlicingError,
    identifier::{ClientIdentifier, SliceIdentifier, SlicerId},
    message::Message,
    metrics::{self, Direction, Outcome},
    sweeper::Sweep,
    transport::{Address, Transport},
    wire::{AbortSlicing, MessageSlice, MessageSliceReply, WireMessage},
};

/// How a reply ended a transfer, if it did.
enum End {
    Completed,
    Failed(Option<FailureCallback>, SlicingError),
}

/// Work decided under a transfer's lock and carried out after releasing it.
struct Actions<M, A> {
    outgoing: Vec<(A, WireMessage<M, A>)>,
    end: Option<End>,
}

impl<M, A> Actions<M, A> {
    const fn none() -> Self {
        Self {
            outgoing: Vec::new(),
            end: None,
        }
    }

    fn send(to: A, message: impl Into<WireMessage<M, A>>) -> Self {
        Self {
            outgoing: vec![(to, message.into())],
            end: None,
        }
    }

    fn end(end: End) -> Self {
        Self {
            outgoing: Vec::new(),
            end: Some(end),
        }
    }

    fn then(mut self, next: Self) -> Self {
        self.outgoing.extend(next.outgoing);
        self.end = next.end.or(self.end);
        self
    }
}

/// Splits outbound messages into slices and drives their delivery.
///
/// One slicer can carry many concurrent transfers. Each is keyed by a
/// [`SliceIdentifier`] embedding this instance's [`SlicerId`], which lets
/// [`handle_message`](Self::handle_message) ignore replies meant for other
/// instances.
///
/// # Examples
///
/// ```
/// use std::num::NonZeroUsize;
///
/// use message_slicing::{
///     slicer::{MessageSlicer, SliceOptions, SlicePayload, SlicerConfig},
///     transport::ChannelTransport,
///     wire::WireMessage,
/// };
///
/// let transport = ChannelTransport::<String, &'static str>::new();
/// let mut receiver = transport.register("receiver");
/// let slicer = MessageSlicer::new(
///     SlicerConfig::new(NonZeroUsize::new(4).expect("non-zero")),
///     transport.clone(),
/// );
///
/// let options = SliceOptions::new(
///     "greeting",
///     SlicePayload::Message("hello, world".to_owned()),
///     "receiver",
///     "sender",
///     |error| eprintln!("transfer failed: {error}"),
/// )
/// .expect("valid options");
///
/// assert!(slicer.slice(options));
/// assert_eq!(slicer.in_flight(), 1);
/// assert!(matches!(receiver.try_recv(), Ok(WireMessage::Slice(_))));
/// ```
pub struct MessageSlicer<M, A: Address, T> {
    id: SlicerId,
    config: SlicerConfig,
    log_context: Arc<str>,
    transport: T,
    next_message_id: AtomicU64,
    states: StateCache<SliceIdentifier, SlicedMessageState<A>>,
    _message: PhantomData<fn() -> M>,
}

impl<M, A, T> MessageSlicer<M, A, T>
where
    M: Message + Send + 'static,
    A: Address,
    T: Transport<M, A>,
{
    /// Create a slicer with a freshly allocated [`SlicerId`].
    #[must_use]
    pub fn new(config: SlicerConfig, transport: T) -> Self {
        Self::with_id(SlicerId::next(), config, transport)
    }

    /// Create a slicer with an explicit identity.
    ///
    /// Two live slicers sharing an id would both claim each other's replies.
    #[must_use]
    pub fn with_id(id: SlicerId, config: SlicerConfig, transport: T) -> Self {
        Self {
            id,
            log_context: Arc::from(config.log_context.as_str()),
            states: StateCache::new(config.expire_after_inactivity),
            config,
            transport,
            next_message_id: AtomicU64::new(1),
            _message: PhantomData,
        }
    }

    /// Identity embedded in every transfer this slicer starts.
    #[must_use]
    pub const fn id(&self) -> SlicerId { self.id }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SlicerConfig { &self.config }

    /// Number of transfers awaiting replies.
    #[must_use]
    pub fn in_flight(&self) -> usize { self.states.len() }

    /// Start a transfer.
    ///
    /// Returns `true` if the payload was sliced and the first slice sent.
    /// Returns `false` if a [`SlicePayload::Message`] fit in one slice and was
    /// sent whole, or if the transfer failed before the first slice went out;
    /// in the latter case the failure callback has already been invoked.
    pub fn slice(&self, options: SliceOptions<M, A>) -> bool {
        let SliceOptions {
            identifier: client,
            payload,
            destination,
            reply_to,
            on_failure,
        } = options;
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let identifier = SliceIdentifier::new(client, self.id, message_id);

        let (message, mut buffer) = match payload {
            SlicePayload::Message(message) => {
                let mut buffer = self.config.overflow.buffer_for(&self.log_context);
                if let Err(error) = message.write_to(&mut buffer) {
                    buffer.cleanup();
                    self.fail_before_start(&identifier, on_failure, error);
                    return false;
                }
                (Some(message), buffer)
            }
            SlicePayload::Bytes(mut buffer) => {
                buffer.set_log_context(Arc::clone(&self.log_context));
                (None, buffer)
            }
        };

        let slice_size = self.config.slice_size.get();
        let staged = buffer.to_stream_source().map_err(SlicingError::from).and_then(|source| {
            total_slices(source.len(), slice_size)
                .map(|total| (source, total))
                .ok_or_else(|| {
                    SlicingError::from(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "slice count exceeds u32::MAX",
                    ))
                })
        });
        let (source, total) = match staged {
            Ok(staged) => staged,
            Err(error) => {
                buffer.cleanup();
                self.fail_before_start(&identifier, on_failure, error);
                return false;
            }
        };

        if let (Some(message), 1) = (message, total) {
            debug!(
                log_context = %self.log_context,
                identifier = %identifier,
                len = source.len(),
                "message fits in one slice; sending unsliced"
            );
            buffer.cleanup();
            self.transport.send(&destination, WireMessage::Whole(message));
            return false;
        }

        debug!(
            log_context = %self.log_context,
            identifier = %identifier,
            len = source.len(),
            total_slices = total,
            spilled = buffer.is_spilled(),
            "slicing message"
        );

        let state = SlicedMessageState::new(SlicedMessageInit {
            identifier: identifier.clone(),
            buffer,
            source,
            slice_size,
            total_slices: total,
            max_tries: self.config.max_tries.get(),
            reply_to,
            on_failure,
            log_context: Arc::clone(&self.log_context),
        });
        let entry = self.states.insert(identifier.clone(), state, cache::now());

        let first = {
            let mut state = entry.lock();
            state.next_slice().map_err(|error| {
                state.close();
                (error, state.take_failure_callback())
            })
        };
        let (error, callback) = match first {
            Ok(slice) => {
                self.send_slice(&destination, slice);
                return true;
            }
            Err(failed) => failed,
        };

        self.states.invalidate_entry(&identifier, &entry);
        error!(
            log_context = %self.log_context,
            identifier = %identifier,
            %error,
            "failed to read the first slice"
        );
        metrics::inc_transfers(Outcome::Failed);
        if let Some(callback) = callback {
            callback(error);
        }
        false
    }

    /// Process a reply from an assembler.
    ///
    /// Returns `true` if `message` is a [`MessageSliceReply`] for a transfer
    /// started by this slicer, whether or not the transfer is still known.
    /// Replies for unknown transfers make the slicer send an
    /// [`AbortSlicing`] so the receiver drops any stale state.
    pub fn handle_message(&self, message: &WireMessage<M, A>) -> bool {
        let WireMessage::SliceReply(reply) = message else {
            return false;
        };
        let identifier = reply.identifier();
        if identifier.slicer_id() != self.id {
            return false;
        }

        let Some(entry) = self.states.get(identifier, cache::now()) else {
            warn!(
                log_context = %self.log_context,
                identifier = %identifier,
                slice_index = reply.slice_index(),
                "reply for unknown transfer; aborting on the receiver"
            );
            self.transport
                .send(reply.send_to(), AbortSlicing::new(identifier.clone()).into());
            return true;
        };

        let actions = {
            let mut state = entry.lock();
            self.on_reply(&mut state, reply)
        };

        for (to, outgoing) in actions.outgoing {
            if let WireMessage::Slice(slice) = outgoing {
                self.send_slice(&to, slice);
            } else {
                self.transport.send(&to, outgoing);
            }
        }

        match actions.end {
            None => {}
            Some(End::Completed) => {
                self.states.invalidate_entry(identifier, &entry);
                metrics::inc_transfers(Outcome::Completed);
            }
            Some(End::Failed(callback, error)) => {
                self.states.invalidate_entry(identifier, &entry);
                metrics::inc_transfers(Outcome::Failed);
                if let Some(callback) = callback {
                    callback(error);
                }
            }
        }
        true
    }

    /// Drop every transfer whose client identifier satisfies `filter`.
    ///
    /// Cancelled transfers release their buffers without invoking their
    /// failure callbacks. Returns how many were cancelled.
    pub fn cancel_slicing(&self, filter: impl Fn(&ClientIdentifier) -> bool) -> usize {
        let cancelled = self
            .states
            .invalidate_matching(|key| filter(key.client()), RemovalCause::Explicit);
        if !cancelled.is_empty() {
            debug!(
                log_context = %self.log_context,
                count = cancelled.len(),
                "cancelled slicing transfers"
            );
        }
        cancelled.len()
    }

    /// Evict transfers idle past the configured window as of `now`.
    ///
    /// Each evicted transfer reports [`SlicingError::Expired`] to its failure
    /// callback. Returns how many were evicted.
    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let expired = self.states.sweep_expired_at(now);
        if !expired.is_empty() {
            debug!(
                log_context = %self.log_context,
                count = expired.len(),
                "swept expired slicing transfers"
            );
        }
        expired.len()
    }

    /// Drop every transfer and release its buffer. Failure callbacks are not
    /// invoked.
    pub fn close(&self) {
        let closed = self.states.invalidate_all(RemovalCause::Shutdown);
        debug!(
            log_context = %self.log_context,
            count = closed,
            "closed message slicer"
        );
    }

    fn send_slice(&self, to: &A, slice: MessageSlice<A>) {
        debug!(
            log_context = %self.log_context,
            identifier = %slice.identifier(),
            slice_index = slice.slice_index(),
            total_slices = slice.total_slices(),
            ?to,
            "sending slice"
        );
        metrics::inc_slices(Direction::Outbound);
        self.transport.send(to, slice.into());
    }

    fn fail_before_start(
        &self,
        identifier: &SliceIdentifier,
        on_failure: FailureCallback,
        error: SlicingError,
    ) {
        error!(
            log_context = %self.log_context,
            identifier = %identifier,
            %error,
            "failed to stage message for slicing"
        );
        metrics::inc_transfers(Outcome::Failed);
        on_failure(error);
    }

    fn on_reply(
        &self,
        state: &mut SlicedMessageState<A>,
        reply: &MessageSliceReply<A>,
    ) -> Actions<M, A> {
        if state.is_closed() {
            return Actions::none();
        }

        if let Some(failure) = reply.failure() {
            warn!(
                log_context = %self.log_context,
                identifier = %state.identifier(),
                %failure,
                "receiver reported a failure"
            );
            if failure.is_retriable() {
                return self.possibly_retry(state, reply.send_to());
            }
            let error = SlicingError::Remote {
                identifier: state.identifier().clone(),
                failure: failure.clone(),
            };
            return self.failed(state, error);
        }

        if reply.slice_index() != state.current_slice_index() {
            warn!(
                log_context = %self.log_context,
                identifier = %state.identifier(),
                expected = state.current_slice_index(),
                found = reply.slice_index(),
                "slice reply index mismatch; aborting and retrying"
            );
            let abort = Actions::send(
                reply.send_to().clone(),
                AbortSlicing::new(state.identifier().clone()),
            );
            return abort.then(self.possibly_retry(state, reply.send_to()));
        }

        if state.is_last_slice(reply.slice_index()) {
            debug!(
                log_context = %self.log_context,
                identifier = %state.identifier(),
                total_slices = state.total_slices(),
                tries = state.try_count(),
                "all slices acknowledged"
            );
            state.close();
            return Actions::end(End::Completed);
        }

        match state.next_slice() {
            Ok(slice) => Actions::send(reply.send_to().clone(), slice),
            Err(error) => self.failed(state, error),
        }
    }

    fn possibly_retry(&self, state: &mut SlicedMessageState<A>, to: &A) -> Actions<M, A> {
        if !state.can_retry() {
            let error = SlicingError::RetriesExhausted {
                identifier: state.identifier().clone(),
                tries: state.try_count(),
            };
            return self.failed(state, error);
        }

        state.reset();
        metrics::inc_retries();
        info!(
            log_context = %self.log_context,
            identifier = %state.identifier(),
            try_count = state.try_count(),
            "retrying slicing from the first slice"
        );
        match state.next_slice() {
            Ok(slice) => Actions::send(to.clone(), slice),
            Err(error) => self.failed(state, error),
        }
    }

    fn failed(&self, state: &mut SlicedMessageState<A>, error: SlicingError) -> Actions<M, A> {
        warn!(
            log_context = %self.log_context,
            identifier = %state.identifier(),
            %error,
            "slicing failed"
        );
        state.close();
        Actions::end(End::Failed(state.take_failure_callback(), error))
    }
}

impl<M, A, T> Sweep for MessageSlicer<M, A, T>
where
    M: Message + Send + 'static,
    A: Address,
    T: Transport<M, A> + 'static,
{
    fn sweep_expired(&self) -> usize { self.sweep_expired_at(cache::now()) }
}
