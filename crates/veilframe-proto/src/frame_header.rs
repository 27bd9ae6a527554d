//! Frame header with zero-copy parsing.
//!
//! The header is the only plaintext the frame cipher needs before it can
//! read a frame body: it announces how many payload and padding bytes follow.
//! It is never sent in the clear; the frame cipher seals it under its own MAC.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    MAC_SIZE, MAX_FRAME_PAYLOAD,
    errors::{ProtocolError, Result},
};

/// Bit 15 of the first field marks the final frame of a stream.
const FINAL_FLAG: u16 = 0x8000;

/// Mask for the 15-bit length fields.
const LENGTH_MASK: u16 = 0x7FFF;

/// Fixed 4-byte frame header (Big Endian network byte order)
///
/// ```text
/// bytes 0-1: final flag (bit 15) | payload length (bits 0-14)
/// bytes 2-3: reserved zero bit (bit 15) | padding length (bits 0-14)
/// ```
///
/// # Invariants
///
/// - `payload_length + padding_length <= MAX_FRAME_PAYLOAD`
/// - The reserved bit is zero
///
/// Both are enforced by [`FrameHeader::new`] and checked again by
/// [`FrameHeader::from_bytes`].
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    payload_length: [u8; 2],
    padding_length: [u8; 2],
}

impl FrameHeader {
    /// Size of the serialized header (4 bytes)
    pub const SIZE: usize = 4;

    /// Build a header, rejecting lengths that do not fit one frame.
    pub fn new(payload_length: usize, padding_length: usize, is_final: bool) -> Result<Self> {
        let total = payload_length.saturating_add(padding_length);
        if total > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge { size: total, max: MAX_FRAME_PAYLOAD });
        }

        // INVARIANT: MAX_FRAME_PAYLOAD < 2^15, so both lengths fit the 15-bit fields
        debug_assert!(MAX_FRAME_PAYLOAD <= LENGTH_MASK as usize);

        let mut first = payload_length as u16;
        if is_final {
            first |= FINAL_FLAG;
        }

        Ok(Self {
            payload_length: first.to_be_bytes(),
            padding_length: (padding_length as u16).to_be_bytes(),
        })
    }

    /// Parse header from bytes (zero-copy, safe)
    ///
    /// # Errors
    ///
    /// - `ProtocolError::TooShort` if fewer than 4 bytes are given
    /// - `ProtocolError::InvalidFrameHeader` if the reserved bit is set or
    ///   the lengths exceed one frame
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::TooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        if u16::from_be_bytes(header.padding_length) & FINAL_FLAG != 0 {
            return Err(ProtocolError::InvalidFrameHeader { reason: "reserved bit set" });
        }

        if header.body_length() > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::InvalidFrameHeader { reason: "lengths exceed frame" });
        }

        Ok(header)
    }

    /// Serialize header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Number of payload bytes in the frame.
    #[must_use]
    pub fn payload_length(&self) -> usize {
        (u16::from_be_bytes(self.payload_length) & LENGTH_MASK) as usize
    }

    /// Number of zero padding bytes after the payload.
    #[must_use]
    pub fn padding_length(&self) -> usize {
        (u16::from_be_bytes(self.padding_length) & LENGTH_MASK) as usize
    }

    /// Whether this is the last frame of the stream.
    #[must_use]
    pub fn is_final(&self) -> bool {
        u16::from_be_bytes(self.payload_length) & FINAL_FLAG != 0
    }

    /// Payload plus padding length.
    #[must_use]
    pub fn body_length(&self) -> usize {
        self.payload_length() + self.padding_length()
    }

    /// Length of the sealed body on the wire (body plus MAC).
    #[must_use]
    pub fn sealed_body_length(&self) -> usize {
        self.body_length() + MAC_SIZE
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("payload_length", &self.payload_length())
            .field("padding_length", &self.padding_length())
            .field("is_final", &self.is_final())
            .finish()
    }
}

impl PartialEq for FrameHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for FrameHeader {}
