//! Error types for wire format parsing.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors from encoding or decoding wire structures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload exceeds the limit for its container
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Offending size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Record header announces more payload than a record may carry
    #[error("invalid record length: {length} exceeds maximum {max}")]
    InvalidRecordLength {
        /// Announced length
        length: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Buffer is shorter than a fixed-size structure
    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Frame header fields are inconsistent
    #[error("invalid frame header: {reason}")]
    InvalidFrameHeader {
        /// What was wrong with the header
        reason: &'static str,
    },

    /// The stream ended before a complete record was read
    #[error("end of stream before a complete record")]
    EndOfStream,

    /// Underlying reader or writer failed
    #[error("i/o error: {0}")]
    Io(String),
}

impl ProtocolError {
    /// Returns true if the error means the peer sent bytes that can never
    /// become valid, as opposed to a local construction mistake.
    pub fn is_wire_error(&self) -> bool {
        match self {
            Self::TooShort { .. }
            | Self::InvalidFrameHeader { .. }
            | Self::InvalidRecordLength { .. }
            | Self::EndOfStream
            | Self::Io(_) => true,
            Self::PayloadTooLarge { .. } => false,
        }
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::EndOfStream
        } else {
            Self::Io(err.to_string())
        }
    }
}
