//! Erasable key material.
//!
//! Every secret is a fixed 32-byte buffer that is zeroized when dropped. None
//! of the key types implement `Clone` or `Copy`, so a key can only be
//! duplicated by deriving it again. `Debug` never prints key bytes.

use std::fmt;

use zeroize::Zeroize;

use crate::error::CryptoError;

/// Length of every symmetric key in bytes.
pub const KEY_SIZE: usize = 32;

/// A 32-byte secret, zeroized on drop.
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Copy key bytes out of a slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: bytes.len() })?;
        Ok(Self { bytes })
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Erase the key now. Equivalent to dropping it.
    pub fn erase(self) {}
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// Long-term secret shared with one contact, established at pairing.
#[derive(Debug)]
pub struct SharedSecret(SecretKey);

impl SharedSecret {
    /// Wrap the 32 bytes agreed at pairing.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(SecretKey::from_bytes(bytes))
    }

    /// Copy the shared secret out of a slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        SecretKey::from_slice(bytes).map(Self)
    }

    /// Underlying key.
    pub fn key(&self) -> &SecretKey {
        &self.0
    }
}

/// Secret for one rotation period of one (contact, transport) pair.
#[derive(Debug)]
pub struct PeriodSecret {
    period: u64,
    key: SecretKey,
}

impl PeriodSecret {
    /// Restore a period secret, e.g. from persisted state.
    pub fn from_bytes(period: u64, bytes: [u8; KEY_SIZE]) -> Self {
        Self { period, key: SecretKey::from_bytes(bytes) }
    }

    pub(crate) fn new(period: u64, key: SecretKey) -> Self {
        Self { period, key }
    }

    /// Period index this secret belongs to.
    pub fn period(&self) -> u64 {
        self.period
    }

    /// Underlying key.
    pub fn key(&self) -> &SecretKey {
        &self.key
    }

    /// Walk the chain forward to `target`.
    ///
    /// Intermediate secrets are erased as soon as their successor exists.
    ///
    /// # Panics
    ///
    /// Panics if `target` is before this secret's period: the chain is one-way.
    pub fn advance_to(&self, target: u64) -> Self {
        assert!(target >= self.period, "cannot derive period {target} from {}", self.period);

        if target == self.period {
            return Self::new(self.period, SecretKey::from_bytes(*self.key.as_bytes()));
        }

        let mut current = crate::derivation::derive_period_secret(self, self.period + 1);
        while current.period < target {
            current = crate::derivation::derive_period_secret(&current, current.period + 1);
        }
        current
    }
}

/// Key for encoding and decoding connection tags.
#[derive(Debug)]
pub struct TagKey(SecretKey);

impl TagKey {
    pub(crate) fn new(key: SecretKey) -> Self {
        Self(key)
    }

    /// Underlying key.
    pub fn key(&self) -> &SecretKey {
        &self.0
    }
}

/// Key for sealing and opening the frames of one connection.
#[derive(Debug)]
pub struct FrameKey(SecretKey);

impl FrameKey {
    pub(crate) fn new(key: SecretKey) -> Self {
        Self(key)
    }

    /// Underlying key.
    pub fn key(&self) -> &SecretKey {
        &self.0
    }
}

/// Symmetry-breaking role assigned to each side at pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// "Alice"
    Initiator,
    /// "Bob"
    Responder,
}

impl Role {
    /// The role held by the other side.
    #[must_use]
    pub fn peer(self) -> Self {
        match self {
            Self::Initiator => Self::Responder,
            Self::Responder => Self::Initiator,
        }
    }
}

/// Direction of a stream relative to the local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// We send, the peer receives
    Outgoing,
    /// The peer sends, we receive
    Incoming,
}

impl Direction {
    /// Role of the side that sends on a stream in this direction.
    ///
    /// Keys are labelled by the sender's role, so the initiator's outgoing
    /// key is the responder's incoming key.
    #[must_use]
    pub fn sender(self, local: Role) -> Role {
        match self {
            Self::Outgoing => local,
            Self::Incoming => local.peer(),
        }
    }
}
