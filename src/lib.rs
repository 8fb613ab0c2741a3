#![doc(html_root_url = "https://docs.rs/message-slicing/latest")]
//! Public API for the `message_slicing` library.
//!
//! This crate moves arbitrarily large messages over a transport that only
//! carries bounded-size messages. A [`MessageSlicer`] serializes a message,
//! splits it into [`MessageSlice`]s and sends them one at a time; a
//! [`MessageAssembler`] validates each slice against a hash chain, appends it
//! to a buffer that spills to disk past a threshold, and hands the decoded
//! message to the application once the last slice arrives.
//!
//! The transport is supplied by the host through the [`Transport`] trait.

pub mod assembler;
mod cache;
pub mod error;
pub mod hash;
pub mod identifier;
pub mod message;
pub mod metrics;
pub mod overflow;
pub mod slicer;
pub mod sweeper;
pub mod test_helpers;
pub mod transport;
pub mod wire;

pub use assembler::{AssemblerConfig, MessageAssembler};
pub use cache::RemovalCause;
pub use error::{SequenceError, SlicingError, StateError};
pub use hash::SliceHash;
pub use identifier::{ClientIdentifier, SliceIdentifier, SlicerId};
pub use message::{Message, RawMessage};
pub use overflow::{ByteSource, OverflowBuffer, OverflowConfig};
pub use slicer::{MessageSlicer, SliceOptions, SlicePayload, SlicerConfig};
pub use sweeper::{Sweep, spawn_sweeper};
pub use transport::{Address, ChannelTransport, Transport};
pub use wire::{AbortSlicing, MessageSlice, MessageSliceReply, SliceFailure, WireMessage};
