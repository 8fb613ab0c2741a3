//! Identifiers naming a single slicing transfer.
//!
//! A [`SliceIdentifier`] combines the caller's own correlation key with the
//! identity of the [`MessageSlicer`](crate::slicer::MessageSlicer) instance
//! that produced it and a per-instance counter. Replies carry the identifier
//! back, which lets a slicer recognise (and ignore) replies addressed to a
//! different instance, for example one that existed before a restart.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use bincode::{Decode, Encode};
use derive_more::{Display, From, Into};

/// Opaque correlation key supplied by the application.
///
/// # Examples
///
/// ```
/// use message_slicing::identifier::ClientIdentifier;
/// let id = ClientIdentifier::from("txn-7");
/// assert_eq!(id.as_bytes(), b"txn-7");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Encode, Decode, From, Into)]
pub struct ClientIdentifier(Vec<u8>);

impl ClientIdentifier {
    /// Create an identifier from raw bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self { Self(bytes.into()) }

    /// Borrow the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.0 }
}

impl From<&str> for ClientIdentifier {
    fn from(value: &str) -> Self { Self(value.as_bytes().to_vec()) }
}

impl From<u64> for ClientIdentifier {
    fn from(value: u64) -> Self { Self(value.to_be_bytes().to_vec()) }
}

impl fmt::Debug for ClientIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientIdentifier({self})")
    }
}

impl fmt::Display for ClientIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(text) => f.write_str(text),
            Err(_) => {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Identity of one [`MessageSlicer`](crate::slicer::MessageSlicer) instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode, Display, From, Into)]
#[display("{_0}")]
pub struct SlicerId(u64);

static NEXT_SLICER_ID: AtomicU64 = AtomicU64::new(1);

impl SlicerId {
    /// Create an identifier with an explicit value.
    #[must_use]
    pub const fn new(value: u64) -> Self { Self(value) }

    /// Allocate a process-unique identifier for a new slicer instance.
    #[must_use]
    pub fn next() -> Self { Self(NEXT_SLICER_ID.fetch_add(1, Ordering::Relaxed)) }

    /// Return the inner numeric identifier.
    #[must_use]
    pub const fn get(self) -> u64 { self.0 }
}

/// Composite key naming one in-flight transfer.
///
/// # Examples
///
/// ```
/// use message_slicing::identifier::{ClientIdentifier, SliceIdentifier, SlicerId};
/// let a = SliceIdentifier::new(ClientIdentifier::from("x"), SlicerId::new(1), 5);
/// let b = SliceIdentifier::new(ClientIdentifier::from("x"), SlicerId::new(1), 5);
/// assert_eq!(a, b);
/// assert_eq!(a.message_id(), 5);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct SliceIdentifier {
    client: ClientIdentifier,
    slicer_id: SlicerId,
    message_id: u64,
}

impl SliceIdentifier {
    /// Create a new identifier.
    #[must_use]
    pub const fn new(client: ClientIdentifier, slicer_id: SlicerId, message_id: u64) -> Self {
        Self {
            client,
            slicer_id,
            message_id,
        }
    }

    /// The application's correlation key.
    #[must_use]
    pub fn client(&self) -> &ClientIdentifier { &self.client }

    /// The slicer instance that started the transfer.
    #[must_use]
    pub const fn slicer_id(&self) -> SlicerId { self.slicer_id }

    /// Per-slicer counter value.
    #[must_use]
    pub const fn message_id(&self) -> u64 { self.message_id }
}

impl fmt::Display for SliceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/slicer-{}/{}",
            self.client, self.slicer_id, self.message_id
        )
    }
}
