//! Per-call inputs for [`MessageSlicer::slice`](super::MessageSlicer::slice).

use std::fmt;

use crate::{
    error::SlicingError,
    identifier::ClientIdentifier,
    overflow::OverflowBuffer,
    transport::Address,
};

/// Callback receiving the error that ended a transfer.
pub type FailureCallback = Box<dyn FnOnce(SlicingError) + Send>;

/// What to slice: a value to serialize, or bytes the caller already staged.
pub enum SlicePayload<M> {
    /// Serialize this value. If it fits in a single slice it is sent as is.
    Message(M),
    /// Slice these bytes. Always sent as slices, even when small.
    Bytes(OverflowBuffer),
}

impl<M> fmt::Debug for SlicePayload<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(_) => f.write_str("SlicePayload::Message(..)"),
            Self::Bytes(buffer) => write!(f, "SlicePayload::Bytes({} bytes)", buffer.len()),
        }
    }
}

/// Validated inputs for one transfer.
///
/// # Examples
///
/// ```
/// use message_slicing::slicer::{SliceOptions, SlicePayload};
///
/// let options = SliceOptions::new(
///     "request-1",
///     SlicePayload::Message("hello".to_owned()),
///     "receiver",
///     "sender",
///     |error| eprintln!("transfer failed: {error}"),
/// )
/// .expect("addresses differ");
/// assert_eq!(options.destination(), &"receiver");
///
/// let rejected = SliceOptions::new(
///     "request-2",
///     SlicePayload::Message("hello".to_owned()),
///     "peer",
///     "peer",
///     |_| {},
/// );
/// assert!(rejected.is_err());
/// ```
pub struct SliceOptions<M, A> {
    pub(super) identifier: ClientIdentifier,
    pub(super) payload: SlicePayload<M>,
    pub(super) destination: A,
    pub(super) reply_to: A,
    pub(super) on_failure: FailureCallback,
}

impl<M, A: Address> SliceOptions<M, A> {
    /// Bundle the inputs for a transfer.
    ///
    /// `reply_to` is where the receiver sends its replies; it must be the
    /// slicer's own address and therefore differ from `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`SlicingError::InvalidOptions`] if `reply_to` equals
    /// `destination`.
    pub fn new(
        identifier: impl Into<ClientIdentifier>,
        payload: SlicePayload<M>,
        destination: A,
        reply_to: A,
        on_failure: impl FnOnce(SlicingError) + Send + 'static,
    ) -> Result<Self, SlicingError> {
        if destination == reply_to {
            return Err(SlicingError::InvalidOptions(
                "reply address must differ from the destination",
            ));
        }
        Ok(Self {
            identifier: identifier.into(),
            payload,
            destination,
            reply_to,
            on_failure: Box::new(on_failure),
        })
    }

    /// Correlation key supplied by the caller.
    #[must_use]
    pub fn identifier(&self) -> &ClientIdentifier { &self.identifier }

    /// Where slices are sent.
    #[must_use]
    pub fn destination(&self) -> &A { &self.destination }

    /// Where replies are expected.
    #[must_use]
    pub fn reply_to(&self) -> &A { &self.reply_to }
}

impl<M, A: fmt::Debug> fmt::Debug for SliceOptions<M, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceOptions")
            .field("identifier", &self.identifier)
            .field("payload", &self.payload)
            .field("destination", &self.destination)
            .field("reply_to", &self.reply_to)
            .finish_non_exhaustive()
    }
}
