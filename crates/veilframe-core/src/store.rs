//! Persistence of transport key state.
//!
//! The key manager writes a [`TransportKeyRecord`] whenever a key set changes
//! in a way that must survive a restart: rotation, a recognized incoming
//! connection, or a handed-out outgoing connection number. The trait is
//! synchronous to keep the key manager free of async locking.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use veilframe_crypto::{KEY_SIZE, Role};
use zeroize::{Zeroize, Zeroizing};

use crate::{
    ids::{ContactId, TransportId},
    replay::ReorderingWindow,
    window::TransportParams,
};

/// Errors from a key store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A record decoded but violates its invariants
    #[error("corrupt key record for {contact} on {transport}: {reason}")]
    Corrupt {
        /// Contact the record belongs to
        contact: ContactId,
        /// Transport the record belongs to
        transport: TransportId,
        /// Which invariant failed
        reason: &'static str,
    },

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),
}

/// Incoming state of one period: its index and replay window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRecord {
    /// Period index
    pub period: u64,
    /// Connection numbers used so far
    pub window: ReorderingWindow,
}

/// Persisted form of one (contact, transport) key set.
///
/// Only the secret of the earliest held period is stored; later periods are
/// derived from it on load. The secret is zeroized on drop and redacted from
/// `Debug` output.
#[derive(PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportKeyRecord {
    /// Contact the keys belong to
    pub contact: ContactId,
    /// Transport the keys belong to
    pub transport: TransportId,
    /// Whether the local side is the initiator
    pub initiator: bool,
    /// Whether outgoing keys may be used
    pub active: bool,
    /// Epoch, period length, latency and clock-difference estimate
    pub params: TransportParams,
    /// Period of `base_secret`
    pub base_period: u64,
    /// Secret of the earliest held period
    pub base_secret: [u8; KEY_SIZE],
    /// Held incoming periods, ascending, starting at `base_period`
    pub periods: Vec<PeriodRecord>,
    /// Period outgoing connection numbers are drawn from
    pub outgoing_period: u64,
    /// Next outgoing connection number in `outgoing_period`
    pub next_connection_number: u64,
}

impl TransportKeyRecord {
    /// Local role stored in the record.
    pub fn role(&self) -> Role {
        if self.initiator { Role::Initiator } else { Role::Responder }
    }

    /// Encode as CBOR.
    pub fn to_cbor(&self) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        let mut encoded = Zeroizing::new(Vec::new());
        ciborium::ser::into_writer(self, &mut *encoded)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(encoded)
    }

    /// Decode from CBOR.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, StoreError> {
        ciborium::de::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

impl Drop for TransportKeyRecord {
    fn drop(&mut self) {
        self.base_secret.zeroize();
    }
}

impl fmt::Debug for TransportKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportKeyRecord")
            .field("contact", &self.contact)
            .field("transport", &self.transport)
            .field("initiator", &self.initiator)
            .field("active", &self.active)
            .field("params", &self.params)
            .field("base_period", &self.base_period)
            .field("base_secret", &"[REDACTED]")
            .field("periods", &self.periods)
            .field("outgoing_period", &self.outgoing_period)
            .field("next_connection_number", &self.next_connection_number)
            .finish()
    }
}

/// Storage for transport key records.
///
/// Must be Clone (shared with the key manager), Send + Sync (thread-safe),
/// and synchronous. Implementations typically share internal state via Arc,
/// so clones access the same underlying storage.
pub trait KeyStore: Clone + Send + Sync + 'static {
    /// Load every stored record. Order is not guaranteed.
    fn load_all(&self) -> Result<Vec<TransportKeyRecord>, StoreError>;

    /// Store a record, replacing any record for the same pair.
    ///
    /// # Invariants
    ///
    /// - Post: a subsequent `load_all` returns this record
    fn save(&self, record: &TransportKeyRecord) -> Result<(), StoreError>;

    /// Remove every record of `contact`, across all transports.
    fn remove_contact(&self, contact: ContactId) -> Result<(), StoreError>;
}

type RecordMap = BTreeMap<(ContactId, TransportId), Zeroizing<Vec<u8>>>;

/// In-memory key store for testing and simulation.
///
/// Records are held CBOR-encoded, exactly as a byte store would hold them.
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    records: Arc<Mutex<RecordMap>>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyStore for MemoryKeyStore {
    fn load_all(&self) -> Result<Vec<TransportKeyRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.values().map(|bytes| TransportKeyRecord::from_cbor(bytes.as_slice())).collect()
    }

    fn save(&self, record: &TransportKeyRecord) -> Result<(), StoreError> {
        let encoded = record.to_cbor()?;
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((record.contact, record.transport.clone()), encoded);
        Ok(())
    }

    fn remove_contact(&self, contact: ContactId) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(stored, _), _| *stored != contact);
        Ok(())
    }
}
