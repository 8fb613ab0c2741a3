//! Receiver side of the slicing protocol.
//!
//! [`MessageAssembler`] accepts [`MessageSlice`]s, appends them to a
//! per-transfer [`OverflowBuffer`](crate::overflow::OverflowBuffer) and
//! acknowledges each one to the slicer. When the last slice arrives the
//! buffer is decoded back into the original message and handed to the
//! application callback together with the slicer's reply address.
//!
//! Validation failures discard the transfer's state and are reported to the
//! slicer as failure replies, never as errors returned to the caller.

mod config;
mod state;

use std::{marker::PhantomData, sync::Arc, time::Instant};

use tracing::{debug, info, warn};

pub use self::config::{AssemblerConfig, DEFAULT_EXPIRE_AFTER_INACTIVITY};
use self::state::AssembledMessageState;
use crate::{
    cache::{self, RemovalCause, StateCache},
    error::SlicingError,
    identifier::SliceIdentifier,
    message::Message,
    metrics::{self, Direction, Outcome},
    sweeper::Sweep,
    transport::{Address, Transport},
    wire::{FIRST_SLICE_INDEX, MessageSlice, MessageSliceReply, WireMessage},
};

/// Callback receiving each re-assembled message and the slicer's address.
pub type AssembledCallback<M, A> = Box<dyn Fn(M, A) + Send + Sync>;

/// Result of applying one slice under the transfer's lock.
enum Progress<M> {
    Partial,
    Assembled(Result<M, SlicingError>),
    Rejected(SlicingError),
}

/// Re-assembles sliced messages and acknowledges each slice.
///
/// # Examples
///
/// ```
/// use message_slicing::{
///     assembler::{AssemblerConfig, MessageAssembler},
///     transport::ChannelTransport,
///     wire::WireMessage,
/// };
///
/// let transport = ChannelTransport::<String, &'static str>::new();
/// let assembler = MessageAssembler::new(
///     AssemblerConfig::default(),
///     transport,
///     |message: String, sender| println!("{sender}: {message}"),
/// );
///
/// // Unsliced messages are not the assembler's concern.
/// assert!(!assembler.handle_message(&WireMessage::Whole("hi".to_owned()), &"receiver"));
/// assert_eq!(assembler.in_flight(), 0);
/// ```
pub struct MessageAssembler<M, A: Address, T> {
    config: AssemblerConfig,
    log_context: Arc<str>,
    transport: T,
    on_assembled: AssembledCallback<M, A>,
    states: StateCache<SliceIdentifier, AssembledMessageState>,
    _message: PhantomData<fn() -> M>,
}

impl<M, A, T> MessageAssembler<M, A, T>
where
    M: Message + Send + 'static,
    A: Address,
    T: Transport<M, A>,
{
    /// Create an assembler delivering completed messages to `on_assembled`.
    #[must_use]
    pub fn new(
        config: AssemblerConfig,
        transport: T,
        on_assembled: impl Fn(M, A) + Send + Sync + 'static,
    ) -> Self {
        Self {
            log_context: Arc::from(config.log_context.as_str()),
            states: StateCache::new(Some(config.expire_after_inactivity)),
            config,
            transport,
            on_assembled: Box::new(on_assembled),
            _message: PhantomData,
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &AssemblerConfig { &self.config }

    /// Number of partially assembled messages.
    #[must_use]
    pub fn in_flight(&self) -> usize { self.states.len() }

    /// Process an inbound protocol message.
    ///
    /// `self_address` is this assembler's own address. It is returned to the
    /// slicer in every reply so later slices reach the same assembler.
    ///
    /// Returns `true` for [`WireMessage::Slice`] and [`WireMessage::Abort`],
    /// `false` for anything else.
    pub fn handle_message(&self, message: &WireMessage<M, A>, self_address: &A) -> bool {
        match message {
            WireMessage::Slice(slice) => {
                self.on_slice(slice, self_address);
                true
            }
            WireMessage::Abort(abort) => {
                if self.states.invalidate(abort.identifier()) {
                    debug!(
                        log_context = %self.log_context,
                        identifier = %abort.identifier(),
                        "assembly aborted by the slicer"
                    );
                }
                true
            }
            WireMessage::Whole(_) | WireMessage::SliceReply(_) => false,
        }
    }

    /// Discard partial assemblies idle past the inactivity window as of
    /// `now`. Returns how many were discarded.
    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let expired = self.states.sweep_expired_at(now);
        if !expired.is_empty() {
            debug!(
                log_context = %self.log_context,
                count = expired.len(),
                "swept expired assembly states"
            );
        }
        expired.len()
    }

    /// Discard every partial assembly.
    pub fn close(&self) {
        let closed = self.states.invalidate_all(RemovalCause::Shutdown);
        debug!(
            log_context = %self.log_context,
            count = closed,
            "closed message assembler"
        );
    }

    fn on_slice(&self, slice: &MessageSlice<A>, self_address: &A) {
        let identifier = slice.identifier();
        let created = self
            .states
            .get_or_try_insert_with(identifier.clone(), cache::now(), || {
                if slice.slice_index() != FIRST_SLICE_INDEX {
                    return Err(SlicingError::UnknownTransfer {
                        identifier: identifier.clone(),
                        slice_index: slice.slice_index(),
                    });
                }
                debug!(
                    log_context = %self.log_context,
                    identifier = %identifier,
                    total_slices = slice.total_slices(),
                    "starting assembly"
                );
                Ok(AssembledMessageState::new(
                    identifier.clone(),
                    slice.total_slices(),
                    self.config.overflow.buffer_for(&self.log_context),
                    Arc::clone(&self.log_context),
                ))
            });
        let entry = match created {
            Ok(entry) => entry,
            Err(error) => {
                warn!(
                    log_context = %self.log_context,
                    identifier = %identifier,
                    %error,
                    "rejecting slice"
                );
                self.reply_failed(slice, &error, self_address);
                return;
            }
        };

        let progress = {
            let mut state = entry.lock();
            Self::apply(&mut state, slice)
        };

        match progress {
            Progress::Partial => {
                metrics::inc_slices(Direction::Inbound);
                self.reply_success(slice, self_address);
            }
            Progress::Assembled(Ok(message)) => {
                metrics::inc_slices(Direction::Inbound);
                self.reply_success(slice, self_address);
                self.states.invalidate_entry(identifier, &entry);
                metrics::inc_transfers(Outcome::Completed);
                info!(
                    log_context = %self.log_context,
                    identifier = %identifier,
                    total_slices = slice.total_slices(),
                    "message assembled"
                );
                (self.on_assembled)(message, slice.reply_to().clone());
            }
            Progress::Assembled(Err(error)) | Progress::Rejected(error) => {
                warn!(
                    log_context = %self.log_context,
                    identifier = %identifier,
                    slice_index = slice.slice_index(),
                    %error,
                    "assembly failed"
                );
                self.reply_failed(slice, &error, self_address);
                self.states.invalidate_entry(identifier, &entry);
                metrics::inc_transfers(Outcome::Failed);
            }
        }
    }

    fn apply(state: &mut AssembledMessageState, slice: &MessageSlice<A>) -> Progress<M> {
        let sealed = state.add_slice(slice.slice_index(), slice.data(), slice.last_slice_hash());
        match sealed {
            Ok(false) => Progress::Partial,
            Ok(true) => {
                let decoded = state.assembled_source().and_then(|source| {
                    let mut reader = source.open()?;
                    M::read_from(&mut reader)
                });
                if decoded.is_err() {
                    state.close();
                }
                Progress::Assembled(decoded)
            }
            Err(error) => {
                state.close();
                Progress::Rejected(error)
            }
        }
    }

    fn reply_success(&self, slice: &MessageSlice<A>, self_address: &A) {
        let reply = MessageSliceReply::success(
            slice.identifier().clone(),
            slice.slice_index(),
            self_address.clone(),
        );
        self.transport.send(slice.reply_to(), reply.into());
    }

    fn reply_failed(&self, slice: &MessageSlice<A>, error: &SlicingError, self_address: &A) {
        let reply = MessageSliceReply::failed(
            slice.identifier().clone(),
            error.to_failure(),
            self_address.clone(),
        );
        self.transport.send(slice.reply_to(), reply.into());
    }
}

impl<M, A, T> Sweep for MessageAssembler<M, A, T>
where
    M: Message + Send + 'static,
    A: Address,
    T: Transport<M, A> + 'static,
{
    fn sweep_expired(&self) -> usize { self.sweep_expired_at(cache::now()) }
}
