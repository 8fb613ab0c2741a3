//! Content hash chaining consecutive slices.
//!
//! Every slice carries the hash of the slice sent before it. The receiver
//! computes the same value from the payload it appended last, so a lost,
//! duplicated or corrupted slice shows up as a mismatch on the following
//! slice. Both ends only compare values, so any deterministic 32-bit hash
//! works; CRC-32C is used because it is fast and hardware accelerated.

use bincode::{Decode, Encode};
use derive_more::{Display, From, Into};

/// 32-bit hash of one slice payload.
///
/// # Examples
///
/// ```
/// use message_slicing::hash::SliceHash;
/// let a = SliceHash::of(b"abc");
/// assert_eq!(a, SliceHash::of(b"abc"));
/// assert_ne!(a, SliceHash::of(b"abd"));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode, Display, From, Into)]
#[display("{_0:#010x}")]
pub struct SliceHash(u32);

impl SliceHash {
    /// Sentinel carried by the first slice, before any payload was hashed.
    pub const INITIAL: Self = Self(u32::MAX);

    /// Hash `data`.
    #[must_use]
    pub fn of(data: &[u8]) -> Self { Self(crc32c::crc32c(data)) }

    /// Return the raw hash value.
    #[must_use]
    pub const fn get(self) -> u32 { self.0 }
}

impl Default for SliceHash {
    fn default() -> Self { Self::INITIAL }
}
