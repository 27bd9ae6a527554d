//! Identifiers for contacts and transports.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Local identifier of a contact. Never sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContactId(pub u64);

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contact-{}", self.0)
    }
}

/// Name of a transport plugin (e.g. `"tcp"`, `"bt"`).
///
/// Both peers use the same name, so it is mixed into key derivation to keep
/// the key chains of different transports independent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransportId(String);

impl TransportId {
    /// Create a transport identifier.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Transport name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bytes mixed into key derivation.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransportId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
