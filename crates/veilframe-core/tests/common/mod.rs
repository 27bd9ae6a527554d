//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use veilframe_core::{
    ConnectionContext, ContactId, ContactRegistration, Environment, MemoryKeyStore,
    RotationConfig, TransportId, TransportKeyManager,
};
use veilframe_crypto::{KEY_SIZE, Role, SharedSecret};

pub const HOUR: u64 = 3_600_000;

/// How Bob knows Alice.
pub const ALICE: ContactId = ContactId(1);

/// How Alice knows Bob.
pub const BOB: ContactId = ContactId(2);

/// Deterministic environment: manual wall clock, seeded RNG.
#[derive(Clone)]
pub struct TestEnv {
    clock: Arc<AtomicU64>,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl TestEnv {
    pub fn new(seed: u64, start_ms: u64) -> Self {
        Self {
            clock: Arc::new(AtomicU64::new(start_ms)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.clock.fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Environment for TestEnv {
    fn wall_clock_millis(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap().fill_bytes(buffer);
    }
}

/// Middle of period `p` with one-hour periods starting at time 0.
pub fn mid_period(p: u64) -> u64 {
    p * HOUR + HOUR / 2
}

/// One-hour periods, up to an hour of skew, one period either side.
pub fn rotation_config() -> RotationConfig {
    RotationConfig {
        period_length: Some(Duration::from_millis(HOUR)),
        max_clock_skew: Duration::from_millis(HOUR),
        ..RotationConfig::default()
    }
}

pub fn tcp() -> TransportId {
    TransportId::new("tcp")
}

pub fn registration(contact: ContactId, role: Role) -> ContactRegistration {
    ContactRegistration {
        contact,
        transport: tcp(),
        role,
        epoch_ms: 0,
        latency: Duration::from_secs(60),
        active: true,
    }
}

pub fn shared_secret(byte: u8) -> SharedSecret {
    SharedSecret::from_bytes([byte; KEY_SIZE])
}

/// Two peers that paired over `tcp` at time `now`.
pub struct Peers {
    pub alice: TransportKeyManager<MemoryKeyStore>,
    pub alice_store: MemoryKeyStore,
    pub bob: TransportKeyManager<MemoryKeyStore>,
    pub bob_store: MemoryKeyStore,
}

pub fn paired(now: u64) -> Peers {
    let secret = shared_secret(0x42);

    let alice_store = MemoryKeyStore::new();
    let alice = TransportKeyManager::new(alice_store.clone(), rotation_config());
    alice.add_contact(&registration(BOB, Role::Initiator), &secret, now).unwrap();

    let bob_store = MemoryKeyStore::new();
    let bob = TransportKeyManager::new(bob_store.clone(), rotation_config());
    bob.add_contact(&registration(ALICE, Role::Responder), &secret, now).unwrap();

    Peers { alice, alice_store, bob, bob_store }
}

/// Matching outgoing (Alice) and incoming (Bob) contexts for one connection.
pub fn connection(now: u64) -> (ConnectionContext, ConnectionContext) {
    let peers = paired(now);
    let outgoing = peers.alice.outgoing_context(BOB, &tcp(), now).unwrap();
    let tag = *outgoing.tag().unwrap();
    let incoming = peers.bob.recognize(&tcp(), &tag, now).unwrap().unwrap().context;
    (outgoing, incoming)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
