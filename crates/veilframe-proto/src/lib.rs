//! Veilframe wire formats.
//!
//! Plaintext layouts shared by both ends of a connection. Nothing in this
//! crate touches key material: records are the unit the synchronization layer
//! reads and writes, frame headers are the 4-byte plaintext that the frame
//! cipher seals in front of every frame body.
//!
//! ```text
//! connection := tag || frame*
//! frame      := seal(header) || seal(payload || padding)
//! record     := version:u8 || type:u8 || length:u16be || payload
//! ```
//!
//! Records are carried inside frame payloads and may span frame boundaries.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod frame_header;
pub mod record;

pub use errors::{ProtocolError, Result};
pub use frame_header::FrameHeader;
pub use record::{Record, read_record, write_record};

/// Transport protocol version carried in tags and records.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size of an encoded connection tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Size of the authentication tag appended by the AEAD cipher.
pub const MAC_SIZE: usize = 16;

/// Maximum size of one sealed frame on the wire, header MAC included.
pub const MAX_FRAME_SIZE: usize = 1024;

/// Size of a sealed frame header (plaintext header plus its MAC).
pub const SEALED_HEADER_SIZE: usize = FrameHeader::SIZE + MAC_SIZE;

/// Maximum payload plus padding bytes carried by one frame.
pub const MAX_FRAME_PAYLOAD: usize = MAX_FRAME_SIZE - SEALED_HEADER_SIZE - MAC_SIZE;
