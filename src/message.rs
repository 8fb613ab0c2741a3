//! Serialization of application values carried through a transfer.
//!
//! Values are written straight into an
//! [`OverflowBuffer`](crate::overflow::OverflowBuffer) and read back from a
//! [`ByteSource`](crate::overflow::ByteSource), so large messages never need
//! to exist as one contiguous allocation on either side.

use std::io::{Read, Write};

use bincode::{Decode, Encode, config, decode_from_std_read, encode_into_std_write};
use derive_more::{From, Into};

use crate::error::SlicingError;

/// Values that can be sliced and re-assembled.
///
/// Any type deriving bincode's [`Encode`] and [`Decode`] implements this
/// trait via a blanket implementation using bincode's standard
/// configuration. [`RawMessage`] carries pre-serialized bytes verbatim.
pub trait Message {
    /// Serialize the message into `writer`, returning the bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`SlicingError::Encode`] or [`SlicingError::Io`] if
    /// serialization or the underlying write fails.
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize, SlicingError>;

    /// Deserialize a message from `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`SlicingError::Decode`] or [`SlicingError::Io`] if the bytes
    /// cannot be read or do not form a valid message.
    fn read_from<R: Read>(reader: &mut R) -> Result<Self, SlicingError>
    where
        Self: Sized;
}

impl<T> Message for T
where
    T: Encode + Decode<()>,
{
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize, SlicingError> {
        Ok(encode_into_std_write(self, writer, config::standard())?)
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self, SlicingError> {
        Ok(decode_from_std_read(reader, config::standard())?)
    }
}

/// Opaque bytes passed through without any framing.
///
/// Reading consumes the whole source, so the re-assembled value is exactly
/// the byte stream that was sliced.
///
/// # Examples
///
/// ```
/// use message_slicing::message::{Message, RawMessage};
///
/// let raw = RawMessage::from(vec![1_u8, 2, 3]);
/// let mut bytes = Vec::new();
/// raw.write_to(&mut bytes).expect("write");
/// assert_eq!(bytes, [1, 2, 3]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, From, Into)]
pub struct RawMessage(Vec<u8>);

impl RawMessage {
    /// Borrow the bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.0 }
}

impl Message for RawMessage {
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize, SlicingError> {
        writer.write_all(&self.0)?;
        Ok(self.0.len())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self, SlicingError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(Self(bytes))
    }
}
