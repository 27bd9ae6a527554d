//! Error types for key management and authenticated streams.
//!
//! Everything that can go wrong on an established connection (bad MAC,
//! truncation, malformed header, timeout, I/O) collapses into
//! [`TransportError::ConnectionFailed`]. The cause is logged locally at
//! `debug` level and never surfaced, so a remote attacker cannot tell the
//! failure modes apart.

use thiserror::Error;
use veilframe_crypto::Direction;

use crate::{
    ids::{ContactId, TransportId},
    store::StoreError,
};

/// Errors from the transport key manager and stream layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection failed and its keys were erased
    #[error("connection failed")]
    ConnectionFailed,

    /// No key set is registered for the pair
    #[error("no keys for {contact} on {transport}")]
    UnknownContact {
        /// Contact that was looked up
        contact: ContactId,
        /// Transport that was looked up
        transport: TransportId,
    },

    /// A key set is already registered for the pair
    #[error("keys for {contact} on {transport} already exist")]
    DuplicateContact {
        /// Contact being registered
        contact: ContactId,
        /// Transport being registered
        transport: TransportId,
    },

    /// Outgoing keys have not been activated yet
    #[error("outgoing keys for {contact} on {transport} are not active")]
    Inactive {
        /// Contact whose keys are inactive
        contact: ContactId,
        /// Transport whose keys are inactive
        transport: TransportId,
    },

    /// Every connection number of the current period has been used
    #[error("connection numbers exhausted for {contact} on {transport} in period {period}")]
    ConnectionsExhausted {
        /// Contact whose counter is exhausted
        contact: ContactId,
        /// Transport whose counter is exhausted
        transport: TransportId,
        /// Period whose numbers are used up
        period: u64,
    },

    /// A connection context was used for the wrong direction of stream
    #[error("expected a context for an {expected:?} stream")]
    WrongDirection {
        /// Direction the stream needs
        expected: Direction,
    },

    /// The stream was already closed
    #[error("stream closed")]
    StreamClosed,

    /// The outgoing stream sealed as many frames as one frame key allows.
    /// Its key was erased; the rest of the data needs a new connection.
    #[error("frame limit reached, open a new connection")]
    RotationRequired,

    /// Persisting or loading key state failed
    #[error("key store error: {0}")]
    Store(#[from] StoreError),
}

impl TransportError {
    /// Returns true if this error is transient and may succeed later.
    ///
    /// Exhausted connection numbers are replenished when the next rotation
    /// period starts, and a stream that hit its frame limit can continue on a
    /// fresh connection. Every other error needs action from the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionsExhausted { .. } | Self::RotationRequired)
    }
}
