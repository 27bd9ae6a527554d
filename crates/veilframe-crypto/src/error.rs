//! Error types for cryptographic operations

use thiserror::Error;
use veilframe_proto::ProtocolError;

/// Errors from key handling and frame encryption
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Frame failed authentication: bad MAC, bad length fields, non-zero
    /// padding, or a frame presented out of order
    #[error("authentication failed: {reason}")]
    AuthFailure {
        /// Internal cause, for local diagnostics only
        reason: &'static str,
    },

    /// Frame counter is exhausted; the key must not seal any more frames
    #[error("rotation required: frame counter exhausted at {counter}")]
    RotationRequired {
        /// Counter value when exhaustion was detected
        counter: u64,
    },

    /// The sealer or opener was already finished or failed
    #[error("stream closed")]
    StreamClosed,

    /// Invalid key material length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length
        expected: usize,
        /// Actual key length
        actual: usize,
    },

    /// Frame could not be constructed (e.g. payload plus padding too large)
    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] ProtocolError),
}

impl CryptoError {
    /// Returns true if this error is fatal to the connection.
    ///
    /// Only counter exhaustion is recoverable, by moving to a fresh
    /// connection number or period.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::AuthFailure { .. }
            | Self::StreamClosed
            | Self::InvalidKeyLength { .. }
            | Self::InvalidFrame(_) => true,
            Self::RotationRequired { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failure_is_fatal() {
        assert!(CryptoError::AuthFailure { reason: "tag mismatch" }.is_fatal());
    }

    #[test]
    fn rotation_required_is_not_fatal() {
        assert!(!CryptoError::RotationRequired { counter: 7 }.is_fatal());
    }

    #[test]
    fn error_display() {
        let err = CryptoError::InvalidKeyLength { expected: 32, actual: 16 };
        assert_eq!(err.to_string(), "invalid key length: expected 32, got 16");
    }
}
