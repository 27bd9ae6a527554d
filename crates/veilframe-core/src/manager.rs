//! Transport key manager.
//!
//! Owns the key sets of every (contact, transport) pair and is the only way
//! in or out of them. Each key set sits behind its own mutex; the pair map
//! is behind a read-write lock that is only written when contacts come and
//! go. Tag recognition runs trial decryption over a snapshot of candidate
//! keys without holding any key-set lock, then re-validates and consumes
//! the match under the owning pair's lock. Two concurrent recognitions of
//! the same tag therefore yield at most one context.
//!
//! Every change that must survive a restart is written to the [`KeyStore`]
//! before the resulting context is handed out.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use veilframe_crypto::{SharedSecret, Tag, TagKey};

use crate::{
    context::ConnectionContext,
    error::TransportError,
    event::KeyEvent,
    ids::{ContactId, TransportId},
    schedule::{ContactRegistration, PreparedOutgoing, TransportKeySet},
    store::{KeyStore, TransportKeyRecord},
    window::RotationConfig,
};

type PairKey = (ContactId, TransportId);
type SharedKeySet = Arc<Mutex<TransportKeySet>>;

/// One incoming tag key offered for recognition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Contact the key belongs to
    pub contact: ContactId,
    /// Transport the key belongs to
    pub transport: TransportId,
    /// Period the key belongs to
    pub period: u64,
}

/// Result of recognizing an incoming tag.
#[derive(Debug)]
pub struct Recognized {
    /// Keys for the recognized connection
    pub context: ConnectionContext,
    /// Timing events raised by the observation
    pub events: Vec<KeyEvent>,
}

/// An acceptable incoming connection, identified without consuming it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeekedConnection {
    /// Contact the tag belongs to
    pub contact: ContactId,
    /// Period the tag was encoded in
    pub period: u64,
    /// Connection number carried by the tag
    pub connection_number: u64,
}

/// Owns every pair's key set and mediates all access to them.
pub struct TransportKeyManager<S: KeyStore> {
    config: RotationConfig,
    store: S,
    sets: RwLock<BTreeMap<PairKey, SharedKeySet>>,
}

impl<S: KeyStore> fmt::Debug for TransportKeyManager<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportKeyManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn lock(set: &Mutex<TransportKeySet>) -> MutexGuard<'_, TransportKeySet> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: KeyStore> TransportKeyManager<S> {
    /// Create a manager with no key sets.
    ///
    /// Records already in `store` are ignored; use [`Self::load`] to resume.
    pub fn new(store: S, config: RotationConfig) -> Self {
        Self { config, store, sets: RwLock::new(BTreeMap::new()) }
    }

    /// Restore every key set from `store` and rotate it to `now`.
    ///
    /// # Errors
    ///
    /// - `Store` if a record cannot be read or is corrupt, or a rotated
    ///   record cannot be written back
    pub fn load(store: S, config: RotationConfig, now: u64) -> Result<Self, TransportError> {
        let mut sets = BTreeMap::new();

        for record in store.load_all()? {
            let mut set = TransportKeySet::from_record(&record)?;
            if set.rotate(&config, now) {
                store.save(&set.to_record())?;
            }
            sets.insert((record.contact, record.transport.clone()), Arc::new(Mutex::new(set)));
        }

        tracing::info!(key_sets = sets.len(), "Loaded transport keys");
        Ok(Self { config, store, sets: RwLock::new(sets) })
    }

    /// Rotation configuration in use.
    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Number of registered (contact, transport) pairs.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no pairs are registered.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Register a contact on one transport, deriving its keys from `shared`.
    ///
    /// The shared secret is only borrowed; the caller erases it once every
    /// transport has been registered.
    ///
    /// # Errors
    ///
    /// - `DuplicateContact` if the pair is already registered
    /// - `Store` if the new key set cannot be persisted
    pub fn add_contact(
        &self,
        registration: &ContactRegistration,
        shared: &SharedSecret,
        now: u64,
    ) -> Result<(), TransportError> {
        let key = (registration.contact, registration.transport.clone());
        let duplicate = || TransportError::DuplicateContact {
            contact: registration.contact,
            transport: registration.transport.clone(),
        };

        if self.read().contains_key(&key) {
            return Err(duplicate());
        }

        // Derive outside the map lock; walking the chain can take a while
        let set = TransportKeySet::new(registration, shared, &self.config, now);

        let mut sets = self.write();
        if sets.contains_key(&key) {
            return Err(duplicate());
        }
        self.store.save(&set.to_record())?;
        sets.insert(key, Arc::new(Mutex::new(set)));

        tracing::info!(
            contact = %registration.contact,
            transport = %registration.transport,
            active = registration.active,
            "Added contact keys"
        );
        Ok(())
    }

    /// Erase every key set of `contact`, across all transports.
    ///
    /// The persisted records go first; the in-memory key sets are only
    /// dropped once the store has forgotten them.
    ///
    /// # Errors
    ///
    /// - `Store` if the persisted records cannot be removed. The contact's
    ///   key sets stay usable.
    pub fn remove_contact(&self, contact: ContactId) -> Result<(), TransportError> {
        let removed = {
            let mut sets = self.write();
            self.store.remove_contact(contact)?;

            let before = sets.len();
            sets.retain(|(owner, _), _| *owner != contact);
            before - sets.len()
        };

        tracing::info!(contact = %contact, key_sets = removed, "Removed contact keys");
        Ok(())
    }

    /// Make the outgoing keys of a pair usable.
    ///
    /// Called once the peer has proven it holds the shared secret.
    pub fn activate(
        &self,
        contact: ContactId,
        transport: &TransportId,
        now: u64,
    ) -> Result<(), TransportError> {
        let pair = self.pair(contact, transport)?;
        let mut set = lock(&pair);

        let rotated = set.rotate(&self.config, now);
        let activated = set.activate();
        if rotated || activated {
            self.store.save(&set.to_record())?;
        }
        if activated {
            tracing::info!(contact = %contact, transport = %transport, "Activated outgoing keys");
        }
        Ok(())
    }

    /// Whether an outgoing connection to `contact` can be opened on
    /// `transport`. Unknown pairs cannot send.
    pub fn can_send(&self, contact: ContactId, transport: &TransportId) -> bool {
        self.pair(contact, transport).is_ok_and(|pair| lock(&pair).can_send())
    }

    /// Incoming tag keys of one pair for the window at `now`.
    pub fn candidate_tag_keys(
        &self,
        contact: ContactId,
        transport: &TransportId,
        now: u64,
    ) -> Result<Vec<(u64, Arc<TagKey>)>, TransportError> {
        let pair = self.pair(contact, transport)?;
        let mut set = lock(&pair);
        self.refresh(&mut set, now);
        Ok(set.candidate_tag_keys(&set.window(&self.config, now)))
    }

    /// Incoming tag keys of every pair on `transport`, in a stable order:
    /// by contact, then by ascending period.
    pub fn candidates(&self, transport: &TransportId, now: u64) -> Vec<(Candidate, Arc<TagKey>)> {
        let mut candidates = Vec::new();

        for pair in self.pairs_on(transport) {
            let mut set = lock(&pair);
            self.refresh(&mut set, now);

            let window = set.window(&self.config, now);
            for (period, key) in set.candidate_tag_keys(&window) {
                let candidate =
                    Candidate { contact: set.contact(), transport: transport.clone(), period };
                candidates.push((candidate, key));
            }
        }
        candidates
    }

    /// Identify the contact and connection an incoming `tag` belongs to,
    /// without consuming it.
    pub fn peek(&self, transport: &TransportId, tag: &Tag, now: u64) -> Option<PeekedConnection> {
        let (candidate, connection_number) = self.match_tag(transport, tag, now)?;
        let pair = self.pair(candidate.contact, transport).ok()?;

        lock(&pair)
            .is_acceptable(&self.config, now, candidate.period, connection_number)
            .then_some(PeekedConnection {
                contact: candidate.contact,
                period: candidate.period,
                connection_number,
            })
    }

    /// Recognize an incoming `tag` and consume its connection number.
    ///
    /// Returns `Ok(None)` for tags that match no candidate, replays, and
    /// periods that left the window. A recognized tag proves the peer holds
    /// the shared secret, so inactive outgoing keys of the pair are
    /// activated. The used number and the activation are persisted before
    /// the context is returned.
    ///
    /// # Errors
    ///
    /// - `Store` if the updated key set cannot be persisted. The number
    ///   stays consumed and no context is returned.
    pub fn recognize(
        &self,
        transport: &TransportId,
        tag: &Tag,
        now: u64,
    ) -> Result<Option<Recognized>, TransportError> {
        let Some((candidate, connection_number)) = self.match_tag(transport, tag, now) else {
            tracing::debug!(transport = %transport, "Unrecognized tag");
            return Ok(None);
        };

        // The pair may have been removed since the snapshot was taken
        let Ok(pair) = self.pair(candidate.contact, transport) else {
            return Ok(None);
        };
        let mut set = lock(&pair);

        let Some((context, events)) =
            set.accept_incoming(&self.config, now, candidate.period, connection_number)
        else {
            tracing::debug!(
                contact = %candidate.contact,
                transport = %transport,
                period = candidate.period,
                connection_number,
                "Rejected replayed or expired tag"
            );
            return Ok(None);
        };
        let activated = set.activate();

        if let Err(error) = self.store.save(&set.to_record()) {
            tracing::warn!(
                contact = %candidate.contact,
                transport = %transport,
                error = %error,
                "Failed to persist incoming connection"
            );
            return Err(error.into());
        }

        tracing::debug!(
            contact = %candidate.contact,
            transport = %transport,
            period = candidate.period,
            connection_number,
            "Recognized incoming connection"
        );
        if activated {
            tracing::info!(
                contact = %candidate.contact,
                transport = %transport,
                "Activated outgoing keys on first incoming connection"
            );
        }
        Ok(Some(Recognized { context, events }))
    }

    /// Reserve the next outgoing connection of a pair and derive its keys.
    ///
    /// The advanced counter is persisted before returning; if that fails the
    /// keys are abandoned.
    ///
    /// # Errors
    ///
    /// - `UnknownContact`, `Inactive` or `ConnectionsExhausted`
    /// - `Store` if the counter cannot be persisted
    pub fn prepare_outgoing(
        &self,
        contact: ContactId,
        transport: &TransportId,
        now: u64,
    ) -> Result<PreparedOutgoing, TransportError> {
        let pair = self.pair(contact, transport)?;
        let mut set = lock(&pair);
        self.prepare_locked(&mut set, now)
    }

    /// Keys for a new outgoing connection to `contact` on `transport`.
    ///
    /// Uses keys left by [`Self::prepare_outgoing`] if present, otherwise
    /// prepares them first.
    ///
    /// # Errors
    ///
    /// Same as [`Self::prepare_outgoing`].
    pub fn outgoing_context(
        &self,
        contact: ContactId,
        transport: &TransportId,
        now: u64,
    ) -> Result<ConnectionContext, TransportError> {
        let pair = self.pair(contact, transport)?;
        let mut set = lock(&pair);

        let prepared = self.prepare_locked(&mut set, now)?;
        let Some(context) = set.take_outgoing() else {
            return Err(TransportError::Inactive { contact, transport: transport.clone() });
        };

        tracing::debug!(
            contact = %contact,
            transport = %transport,
            period = prepared.period,
            connection_number = prepared.connection_number,
            "Opened outgoing connection"
        );
        Ok(context)
    }

    /// Erase prepared outgoing keys of a pair without using them.
    ///
    /// Returns true if keys were erased. The reserved number is not reused.
    pub fn abandon_outgoing(
        &self,
        contact: ContactId,
        transport: &TransportId,
    ) -> Result<bool, TransportError> {
        let pair = self.pair(contact, transport)?;
        let abandoned = lock(&pair).abandon_outgoing();
        if abandoned {
            tracing::debug!(contact = %contact, transport = %transport, "Abandoned outgoing keys");
        }
        Ok(abandoned)
    }

    /// Rotate every key set to the window at `now`.
    ///
    /// Returns the number of key sets that changed. Persistence failures are
    /// logged; the in-memory rotation stands and is retried on the next call.
    pub fn rotate(&self, now: u64) -> usize {
        let pairs: Vec<SharedKeySet> = self.read().values().map(Arc::clone).collect();

        let rotated = pairs.iter().filter(|pair| self.refresh(&mut lock(pair), now)).count();
        if rotated > 0 {
            tracing::info!(key_sets = rotated, "Rotated transport keys");
        }
        rotated
    }

    /// Persisted form of a pair's key set.
    pub fn record(&self, contact: ContactId, transport: &TransportId) -> Option<TransportKeyRecord> {
        let pair = self.pair(contact, transport).ok()?;
        Some(lock(&pair).to_record())
    }

    fn prepare_locked(
        &self,
        set: &mut TransportKeySet,
        now: u64,
    ) -> Result<PreparedOutgoing, TransportError> {
        set.rotate(&self.config, now);
        let prepared = set.prepare_outgoing()?;

        if let Err(error) = self.store.save(&set.to_record()) {
            set.abandon_outgoing();
            tracing::warn!(
                contact = %set.contact(),
                transport = %set.transport(),
                error = %error,
                "Failed to persist outgoing counter"
            );
            return Err(error.into());
        }
        Ok(prepared)
    }

    /// Trial-decrypt `tag` against every candidate on `transport`. First
    /// match wins.
    fn match_tag(
        &self,
        transport: &TransportId,
        tag: &Tag,
        now: u64,
    ) -> Option<(Candidate, u64)> {
        let candidates = self.candidates(transport, now);
        veilframe_crypto::recognize(
            candidates.iter().map(|(candidate, key)| (candidate, key.as_ref())),
            tag,
        )
        .map(|(candidate, connection_number)| (candidate.clone(), connection_number))
    }

    /// Rotate a locked key set and persist it if anything changed.
    fn refresh(&self, set: &mut TransportKeySet, now: u64) -> bool {
        if !set.rotate(&self.config, now) {
            return false;
        }
        if let Err(error) = self.store.save(&set.to_record()) {
            tracing::warn!(
                contact = %set.contact(),
                transport = %set.transport(),
                error = %error,
                "Failed to persist rotated keys"
            );
        }
        true
    }

    fn pair(
        &self,
        contact: ContactId,
        transport: &TransportId,
    ) -> Result<SharedKeySet, TransportError> {
        self.read()
            .get(&(contact, transport.clone()))
            .cloned()
            .ok_or_else(|| TransportError::UnknownContact { contact, transport: transport.clone() })
    }

    fn pairs_on(&self, transport: &TransportId) -> Vec<SharedKeySet> {
        self.read()
            .iter()
            .filter(|((_, on), _)| on == transport)
            .map(|(_, pair)| Arc::clone(pair))
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<PairKey, SharedKeySet>> {
        self.sets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<PairKey, SharedKeySet>> {
        self.sets.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use veilframe_crypto::{KEY_SIZE, Role};

    use super::*;
    use crate::{
        schedule::OutgoingPhase,
        store::{MemoryKeyStore, StoreError},
    };

    const HOUR: u64 = 3_600_000;
    const NOW: u64 = 5 * HOUR + HOUR / 2;

    fn config() -> RotationConfig {
        RotationConfig {
            period_length: Some(Duration::from_millis(HOUR)),
            max_clock_skew: Duration::from_millis(HOUR),
            ..RotationConfig::default()
        }
    }

    fn tcp() -> TransportId {
        TransportId::new("tcp")
    }

    fn registration(contact: u64, role: Role) -> ContactRegistration {
        ContactRegistration {
            contact: ContactId(contact),
            transport: tcp(),
            role,
            epoch_ms: 0,
            latency: Duration::from_secs(60),
            active: true,
        }
    }

    fn secret(byte: u8) -> SharedSecret {
        SharedSecret::from_bytes([byte; KEY_SIZE])
    }

    fn manager() -> TransportKeyManager<MemoryKeyStore> {
        TransportKeyManager::new(MemoryKeyStore::new(), config())
    }

    #[derive(Clone)]
    struct FailingStore;

    impl KeyStore for FailingStore {
        fn load_all(&self) -> Result<Vec<TransportKeyRecord>, StoreError> {
            Ok(Vec::new())
        }

        fn save(&self, _record: &TransportKeyRecord) -> Result<(), StoreError> {
            Err(StoreError::Io("disk full".into()))
        }

        fn remove_contact(&self, _contact: ContactId) -> Result<(), StoreError> {
            Err(StoreError::Io("disk full".into()))
        }
    }

    /// Saves succeed, removals do not.
    #[derive(Clone)]
    struct ReadOnlyRemovalStore(MemoryKeyStore);

    impl KeyStore for ReadOnlyRemovalStore {
        fn load_all(&self) -> Result<Vec<TransportKeyRecord>, StoreError> {
            self.0.load_all()
        }

        fn save(&self, record: &TransportKeyRecord) -> Result<(), StoreError> {
            self.0.save(record)
        }

        fn remove_contact(&self, _contact: ContactId) -> Result<(), StoreError> {
            Err(StoreError::Io("volume mounted read-only".into()))
        }
    }

    #[test]
    fn duplicate_contact_is_rejected() {
        let manager = manager();
        manager.add_contact(&registration(1, Role::Initiator), &secret(1), NOW).unwrap();

        let err =
            manager.add_contact(&registration(1, Role::Initiator), &secret(1), NOW).unwrap_err();
        assert!(matches!(err, TransportError::DuplicateContact { .. }));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn unknown_contact_cannot_send() {
        let manager = manager();
        assert!(!manager.can_send(ContactId(7), &tcp()));
        assert!(matches!(
            manager.outgoing_context(ContactId(7), &tcp(), NOW),
            Err(TransportError::UnknownContact { .. })
        ));
    }

    #[test]
    fn inactive_keys_need_activation() {
        let manager = manager();
        let mut registration = registration(1, Role::Initiator);
        registration.active = false;
        manager.add_contact(&registration, &secret(1), NOW).unwrap();

        assert!(!manager.can_send(ContactId(1), &tcp()));
        manager.activate(ContactId(1), &tcp(), NOW).unwrap();
        assert!(manager.can_send(ContactId(1), &tcp()));
        assert!(manager.record(ContactId(1), &tcp()).unwrap().active);
    }

    #[test]
    fn recognized_tag_activates_outgoing_keys() {
        let store = MemoryKeyStore::new();
        let alice = manager();
        let bob = TransportKeyManager::new(store.clone(), config());
        alice.add_contact(&registration(2, Role::Initiator), &secret(3), NOW).unwrap();
        let mut inactive = registration(1, Role::Responder);
        inactive.active = false;
        bob.add_contact(&inactive, &secret(3), NOW).unwrap();
        assert!(!bob.can_send(ContactId(1), &tcp()));

        let tag = *alice.outgoing_context(ContactId(2), &tcp(), NOW).unwrap().tag().unwrap();
        bob.recognize(&tcp(), &tag, NOW).unwrap().unwrap();

        assert!(bob.can_send(ContactId(1), &tcp()));
        let persisted = store.load_all().unwrap();
        assert!(persisted[0].active);

        let reply = bob.outgoing_context(ContactId(1), &tcp(), NOW).unwrap();
        let recognized = alice.recognize(&tcp(), reply.tag().unwrap(), NOW).unwrap().unwrap();
        assert_eq!(recognized.context.contact(), ContactId(2));
    }

    #[test]
    fn tag_is_recognized_once() {
        let alice = manager();
        let bob = manager();
        alice.add_contact(&registration(2, Role::Initiator), &secret(3), NOW).unwrap();
        bob.add_contact(&registration(1, Role::Responder), &secret(3), NOW).unwrap();

        let outgoing = alice.outgoing_context(ContactId(2), &tcp(), NOW).unwrap();
        let tag = *outgoing.tag().unwrap();

        let peeked = bob.peek(&tcp(), &tag, NOW).unwrap();
        assert_eq!(peeked.contact, ContactId(1));
        assert_eq!(peeked.connection_number, 0);

        let recognized = bob.recognize(&tcp(), &tag, NOW).unwrap().unwrap();
        assert_eq!(recognized.context.contact(), ContactId(1));
        assert_eq!(recognized.context.period(), 5);

        assert!(bob.recognize(&tcp(), &tag, NOW).unwrap().is_none());
        assert!(bob.peek(&tcp(), &tag, NOW).is_none());
    }

    #[test]
    fn tag_on_other_transport_is_not_recognized() {
        let alice = manager();
        let bob = manager();
        alice.add_contact(&registration(2, Role::Initiator), &secret(3), NOW).unwrap();
        bob.add_contact(&registration(1, Role::Responder), &secret(3), NOW).unwrap();

        let tag = *alice.outgoing_context(ContactId(2), &tcp(), NOW).unwrap().tag().unwrap();
        assert!(bob.recognize(&TransportId::new("bluetooth"), &tag, NOW).unwrap().is_none());
    }

    #[test]
    fn candidates_are_ordered_by_contact_then_period() {
        let manager = manager();
        for contact in [3, 1, 2] {
            manager
                .add_contact(&registration(contact, Role::Responder), &secret(contact as u8), NOW)
                .unwrap();
        }

        let order: Vec<(u64, u64)> = manager
            .candidates(&tcp(), NOW)
            .into_iter()
            .map(|(candidate, _)| (candidate.contact.0, candidate.period))
            .collect();
        assert_eq!(order, vec![(1, 4), (1, 5), (1, 6), (2, 4), (2, 5), (2, 6), (3, 4), (3, 5), (3, 6)]);
    }

    #[test]
    fn remove_contact_erases_keys() {
        let store = MemoryKeyStore::new();
        let manager = TransportKeyManager::new(store.clone(), config());
        manager.add_contact(&registration(1, Role::Initiator), &secret(1), NOW).unwrap();
        let mut other = registration(1, Role::Initiator);
        other.transport = TransportId::new("bluetooth");
        manager.add_contact(&other, &secret(1), NOW).unwrap();
        assert_eq!(store.len(), 2);

        manager.remove_contact(ContactId(1)).unwrap();
        assert!(manager.is_empty());
        assert!(store.is_empty());
        assert!(manager.candidates(&tcp(), NOW).is_empty());
    }

    #[test]
    fn failed_removal_keeps_contact() {
        let store = ReadOnlyRemovalStore(MemoryKeyStore::new());
        let manager = TransportKeyManager::new(store.clone(), config());
        manager.add_contact(&registration(1, Role::Initiator), &secret(1), NOW).unwrap();

        let err = manager.remove_contact(ContactId(1)).unwrap_err();
        assert!(matches!(err, TransportError::Store(StoreError::Io(_))));

        assert_eq!(manager.len(), 1);
        assert!(manager.can_send(ContactId(1), &tcp()));
        assert_eq!(store.0.len(), 1);
        let context = manager.outgoing_context(ContactId(1), &tcp(), NOW).unwrap();
        assert_eq!(context.connection_number(), 0);
    }

    #[test]
    fn failed_save_hands_out_no_context() {
        let manager = TransportKeyManager::new(FailingStore, config());
        let err =
            manager.add_contact(&registration(1, Role::Initiator), &secret(1), NOW).unwrap_err();
        assert!(matches!(err, TransportError::Store(StoreError::Io(_))));
        assert!(manager.is_empty());
    }

    #[test]
    fn prepared_keys_are_used_by_next_context() {
        let manager = manager();
        manager.add_contact(&registration(1, Role::Initiator), &secret(1), NOW).unwrap();

        let prepared = manager.prepare_outgoing(ContactId(1), &tcp(), NOW).unwrap();
        let context = manager.outgoing_context(ContactId(1), &tcp(), NOW).unwrap();
        assert_eq!(context.connection_number(), prepared.connection_number);

        manager.prepare_outgoing(ContactId(1), &tcp(), NOW).unwrap();
        assert!(manager.abandon_outgoing(ContactId(1), &tcp()).unwrap());
        let context = manager.outgoing_context(ContactId(1), &tcp(), NOW).unwrap();
        assert_eq!(context.connection_number(), 2);
    }

    #[test]
    fn rotate_advances_every_pair() {
        let manager = manager();
        manager.add_contact(&registration(1, Role::Initiator), &secret(1), NOW).unwrap();
        manager.add_contact(&registration(2, Role::Initiator), &secret(2), NOW).unwrap();

        assert_eq!(manager.rotate(NOW), 0);
        assert_eq!(manager.rotate(NOW + HOUR), 2);

        let record = manager.record(ContactId(1), &tcp()).unwrap();
        assert_eq!(record.base_period, 5);
        assert_eq!(record.outgoing_period, 6);
    }

    #[test]
    fn load_resumes_counters() {
        let store = MemoryKeyStore::new();
        let manager = TransportKeyManager::new(store.clone(), config());
        manager.add_contact(&registration(1, Role::Initiator), &secret(1), NOW).unwrap();
        manager.outgoing_context(ContactId(1), &tcp(), NOW).unwrap();
        drop(manager);

        let reloaded = TransportKeyManager::load(store, config(), NOW).unwrap();
        let context = reloaded.outgoing_context(ContactId(1), &tcp(), NOW).unwrap();
        assert_eq!(context.connection_number(), 1);

        let pair = reloaded.pair(ContactId(1), &tcp()).unwrap();
        assert_eq!(lock(&pair).phase(), OutgoingPhase::Consumed { period: 5, connection_number: 1 });
    }
}
