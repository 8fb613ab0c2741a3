//! Protocol messages exchanged between a slicer and an assembler.
//!
//! The types are transport-agnostic: they derive bincode's [`Encode`] and
//! [`Decode`] so byte-oriented transports can carry them via
//! [`WireMessage::to_bytes`], while in-process transports pass them by value.

use std::fmt;

use bincode::{
    Decode,
    Encode,
    config,
    decode_from_slice,
    encode_to_vec,
    error::{DecodeError, EncodeError},
};

use crate::{hash::SliceHash, identifier::SliceIdentifier};

/// Index of the first slice of every transfer.
pub const FIRST_SLICE_INDEX: u32 = 1;

/// Slice index carried by failed replies.
///
/// Slice indices are unsigned on the wire, so the failure marker is zero
/// rather than a negative value. Real indices start at
/// [`FIRST_SLICE_INDEX`], which keeps the marker from ever matching the
/// slice a sender is waiting on.
pub const FAILED_SLICE_INDEX: u32 = 0;

/// One bounded chunk of a serialized message.
#[derive(Clone, PartialEq, Eq, Encode, Decode)]
pub struct MessageSlice<A> {
    identifier: SliceIdentifier,
    data: Vec<u8>,
    slice_index: u32,
    total_slices: u32,
    last_slice_hash: SliceHash,
    reply_to: A,
}

impl<A> MessageSlice<A> {
    /// Create a new slice.
    #[must_use]
    pub fn new(
        identifier: SliceIdentifier,
        data: Vec<u8>,
        slice_index: u32,
        total_slices: u32,
        last_slice_hash: SliceHash,
        reply_to: A,
    ) -> Self {
        Self {
            identifier,
            data,
            slice_index,
            total_slices,
            last_slice_hash,
            reply_to,
        }
    }

    /// Transfer this slice belongs to.
    #[must_use]
    pub fn identifier(&self) -> &SliceIdentifier { &self.identifier }

    /// Payload bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] { &self.data }

    /// One-based position of this slice.
    #[must_use]
    pub const fn slice_index(&self) -> u32 { self.slice_index }

    /// Number of slices in the transfer.
    #[must_use]
    pub const fn total_slices(&self) -> u32 { self.total_slices }

    /// Hash of the previous slice's payload, or [`SliceHash::INITIAL`].
    #[must_use]
    pub const fn last_slice_hash(&self) -> SliceHash { self.last_slice_hash }

    /// Where replies and the final message's sender address point.
    #[must_use]
    pub fn reply_to(&self) -> &A { &self.reply_to }
}

impl<A: fmt::Debug> fmt::Debug for MessageSlice<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSlice")
            .field("identifier", &self.identifier)
            .field("data_len", &self.data.len())
            .field("slice_index", &self.slice_index)
            .field("total_slices", &self.total_slices)
            .field("last_slice_hash", &self.last_slice_hash)
            .field("reply_to", &self.reply_to)
            .finish()
    }
}

/// Failure description carried by a [`MessageSliceReply`].
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct SliceFailure {
    message: String,
    retriable: bool,
}

impl SliceFailure {
    /// Create a failure description.
    #[must_use]
    pub fn new(message: impl Into<String>, retriable: bool) -> Self {
        Self {
            message: message.into(),
            retriable,
        }
    }

    /// Human readable cause reported by the receiver.
    #[must_use]
    pub fn message(&self) -> &str { &self.message }

    /// Whether the sender may restart the transfer from the first slice.
    #[must_use]
    pub const fn is_retriable(&self) -> bool { self.retriable }
}

impl fmt::Display for SliceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.retriable {
            write!(f, "{} (retriable)", self.message)
        } else {
            f.write_str(&self.message)
        }
    }
}

/// Receiver's answer to one [`MessageSlice`].
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct MessageSliceReply<A> {
    identifier: SliceIdentifier,
    slice_index: u32,
    failure: Option<SliceFailure>,
    send_to: A,
}

impl<A> MessageSliceReply<A> {
    /// Acknowledge slice `slice_index`. `send_to` is the receiver's address.
    #[must_use]
    pub fn success(identifier: SliceIdentifier, slice_index: u32, send_to: A) -> Self {
        Self {
            identifier,
            slice_index,
            failure: None,
            send_to,
        }
    }

    /// Report a failure for the transfer.
    #[must_use]
    pub fn failed(identifier: SliceIdentifier, failure: SliceFailure, send_to: A) -> Self {
        Self {
            identifier,
            slice_index: FAILED_SLICE_INDEX,
            failure: Some(failure),
            send_to,
        }
    }

    /// Transfer the reply refers to.
    #[must_use]
    pub fn identifier(&self) -> &SliceIdentifier { &self.identifier }

    /// Acknowledged slice index, or [`FAILED_SLICE_INDEX`].
    #[must_use]
    pub const fn slice_index(&self) -> u32 { self.slice_index }

    /// Failure reported by the receiver, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&SliceFailure> { self.failure.as_ref() }

    /// Whether the slice was accepted.
    #[must_use]
    pub const fn is_success(&self) -> bool { self.failure.is_none() }

    /// Address of the receiver; further slices go here.
    #[must_use]
    pub fn send_to(&self) -> &A { &self.send_to }
}

/// Tells the receiver to discard any state for a transfer.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct AbortSlicing {
    identifier: SliceIdentifier,
}

impl AbortSlicing {
    /// Create an abort for `identifier`.
    #[must_use]
    pub const fn new(identifier: SliceIdentifier) -> Self { Self { identifier } }

    /// Transfer to abort.
    #[must_use]
    pub fn identifier(&self) -> &SliceIdentifier { &self.identifier }
}

/// Everything a slicer or assembler sends through a
/// [`Transport`](crate::transport::Transport).
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub enum WireMessage<M, A> {
    /// A message small enough to travel unsliced.
    Whole(M),
    /// One slice of a larger message.
    Slice(MessageSlice<A>),
    /// Acknowledgement or failure for a slice.
    SliceReply(MessageSliceReply<A>),
    /// Instruction to drop receiver-side state.
    Abort(AbortSlicing),
}

impl<M: Encode, A: Encode> WireMessage<M, A> {
    /// Serialize the message using bincode's standard configuration.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> { encode_to_vec(self, config::standard()) }
}

impl<M: Decode<()>, A: Decode<()>> WireMessage<M, A> {
    /// Deserialize a message, returning it with the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the bytes do not form a valid message.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), DecodeError> {
        decode_from_slice(bytes, config::standard())
    }
}

impl<M, A> From<MessageSlice<A>> for WireMessage<M, A> {
    fn from(value: MessageSlice<A>) -> Self { Self::Slice(value) }
}

impl<M, A> From<MessageSliceReply<A>> for WireMessage<M, A> {
    fn from(value: MessageSliceReply<A>) -> Self { Self::SliceReply(value) }
}

impl<M, A> From<AbortSlicing> for WireMessage<M, A> {
    fn from(value: AbortSlicing) -> Self { Self::Abort(value) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{ClientIdentifier, SlicerId};

    fn identifier() -> SliceIdentifier {
        SliceIdentifier::new(ClientIdentifier::from("wire"), SlicerId::new(3), 11)
    }

    #[test]
    fn slice_survives_bincode_transport() {
        let slice = MessageSlice::new(
            identifier(),
            vec![1, 2, 3],
            2,
            5,
            SliceHash::of(&[0, 0]),
            7_u64,
        );
        let message: WireMessage<String, u64> = slice.clone().into();
        let bytes = message.to_bytes().expect("encode");
        let (decoded, consumed) = WireMessage::<String, u64>::from_bytes(&bytes).expect("decode");
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, WireMessage::Slice(slice));
    }

    #[test]
    fn failed_reply_uses_sentinel_index() {
        let reply = MessageSliceReply::failed(identifier(), SliceFailure::new("boom", true), 1_u64);
        assert!(!reply.is_success());
        assert_eq!(reply.slice_index(), FAILED_SLICE_INDEX);
        assert_eq!(
            reply.failure().map(ToString::to_string).as_deref(),
            Some("boom (retriable)")
        );
    }

    #[test]
    fn failure_marker_never_matches_a_real_slice() {
        assert!(FAILED_SLICE_INDEX < FIRST_SLICE_INDEX);
        let reply = MessageSliceReply::failed(identifier(), SliceFailure::new("gone", false), 1_u64);
        let (decoded, _) = WireMessage::<String, u64>::from_bytes(
            &WireMessage::<String, u64>::SliceReply(reply).to_bytes().expect("encode"),
        )
        .expect("decode");
        match decoded {
            WireMessage::SliceReply(reply) => {
                assert_eq!(reply.slice_index(), FAILED_SLICE_INDEX);
                assert!(!reply.is_success());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn slice_debug_omits_payload_bytes() {
        let slice = MessageSlice::new(identifier(), vec![9; 64], 1, 1, SliceHash::INITIAL, 0_u64);
        let rendered = format!("{slice:?}");
        assert!(rendered.contains("data_len: 64"));
    }
}
