//! End-to-end connection tests between two simulated peers.
//!
//! Alice opens connections, Bob recognizes them from the tag alone and reads
//! the frames back:
//!
//! 1. **Recovery**: the records Bob reads are exactly the records Alice wrote
//! 2. **Replay**: a tag is accepted at most once, and a lost connection does
//!    not block later ones
//! 3. **Skew**: tags from a neighbouring period are accepted and move Bob's
//!    clock-difference estimate
//! 4. **Isolation**: tags are only matched to the contact that owns them

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::{
    ALICE, BOB, HOUR, TestEnv, init_tracing, mid_period, paired, registration, rotation_config,
    shared_secret, tcp,
};
use veilframe_core::{
    ContactId, DEFAULT_READ_TIMEOUT, Environment, KeyEvent, MemoryKeyStore, PaddingPolicy,
    StreamConfig, StreamReader, StreamWriter, TransportKeyManager, read_tag,
};
use veilframe_crypto::Role;
use veilframe_proto::{PROTOCOL_VERSION, Record};

fn records() -> Vec<Record> {
    vec![
        Record::new(PROTOCOL_VERSION, 0, Bytes::from_static(b"hello bob")).unwrap(),
        Record::new(PROTOCOL_VERSION, 1, vec![0xAB; 5000]).unwrap(),
        Record::new(PROTOCOL_VERSION, 2, Bytes::new()).unwrap(),
        Record::new(PROTOCOL_VERSION, 3, vec![0x5C; Record::MAX_PAYLOAD_SIZE]).unwrap(),
    ]
}

#[tokio::test]
async fn tagged_frames_recover_plaintext() {
    init_tracing();
    let env = TestEnv::new(7, mid_period(5));
    let now = env.wall_clock_millis();
    let peers = paired(now);

    // Connection 0 was used earlier in the period
    drop(peers.alice.outgoing_context(BOB, &tcp(), now).unwrap());
    let context = peers.alice.outgoing_context(BOB, &tcp(), now).unwrap();
    assert_eq!(context.period(), 5);
    assert_eq!(context.connection_number(), 1);

    let periods: Vec<u64> =
        peers.bob.candidates(&tcp(), now).iter().map(|(candidate, _)| candidate.period).collect();
    assert_eq!(periods, vec![4, 5, 6]);

    let (client, mut server) = tokio::io::duplex(1 << 20);
    let config = StreamConfig { padding: PaddingPolicy::Random { max: 64 }, ..StreamConfig::default() };
    let mut writer = StreamWriter::new(client, context, env.clone(), &config).unwrap();
    for record in &records() {
        writer.write_record(record).await.unwrap();
    }
    writer.close().await.unwrap();

    let tag = read_tag(&mut server, DEFAULT_READ_TIMEOUT).await.unwrap();
    let recognized = peers.bob.recognize(&tcp(), &tag, now).unwrap().unwrap();
    assert_eq!(recognized.context.contact(), ALICE);
    assert_eq!(recognized.context.period(), 5);
    assert_eq!(recognized.context.connection_number(), 1);
    assert!(recognized.events.is_empty());

    let mut reader = StreamReader::new(server, recognized.context, &StreamConfig::default()).unwrap();
    let mut received = Vec::new();
    while let Some(record) = reader.read_record().await.unwrap() {
        received.push(record);
    }
    assert_eq!(received, records());
    assert!(reader.read_record().await.unwrap().is_none());
}

#[tokio::test]
async fn bob_can_answer_alice() {
    let now = mid_period(5);
    let env = TestEnv::new(8, now);
    let peers = paired(now);

    let context = peers.bob.outgoing_context(ALICE, &tcp(), now).unwrap();
    let mut wire = Vec::new();
    let mut writer = StreamWriter::new(&mut wire, context, env, &StreamConfig::default()).unwrap();
    writer.write_record(&records()[0]).await.unwrap();
    writer.close().await.unwrap();

    let mut incoming = wire.as_slice();
    let tag = read_tag(&mut incoming, DEFAULT_READ_TIMEOUT).await.unwrap();
    let recognized = peers.alice.recognize(&tcp(), &tag, now).unwrap().unwrap();
    assert_eq!(recognized.context.contact(), BOB);

    let mut reader =
        StreamReader::new(incoming, recognized.context, &StreamConfig::default()).unwrap();
    assert_eq!(reader.read_record().await.unwrap(), Some(records()[0].clone()));
    assert_eq!(reader.read_record().await.unwrap(), None);
}

#[test]
fn replayed_tag_is_rejected() {
    let now = mid_period(5);
    let peers = paired(now);

    let tag = *peers.alice.outgoing_context(BOB, &tcp(), now).unwrap().tag().unwrap();
    assert!(peers.bob.recognize(&tcp(), &tag, now).unwrap().is_some());
    assert!(peers.bob.recognize(&tcp(), &tag, now).unwrap().is_none());
    assert!(peers.bob.recognize(&tcp(), &tag, now + 60_000).unwrap().is_none());
}

#[test]
fn lost_connection_does_not_stall_period() {
    let now = mid_period(5);
    let peers = paired(now);

    // Number 0 is handed out but never reaches Bob
    drop(peers.alice.outgoing_context(BOB, &tcp(), now).unwrap());

    for expected in 1..=100 {
        let tag = *peers.alice.outgoing_context(BOB, &tcp(), now).unwrap().tag().unwrap();
        let recognized = peers.bob.recognize(&tcp(), &tag, now).unwrap();
        assert_eq!(recognized.map(|r| r.context.connection_number()), Some(expected));
    }
}

#[test]
fn own_tag_is_not_recognized() {
    let now = mid_period(5);
    let peers = paired(now);

    let tag = *peers.alice.outgoing_context(BOB, &tcp(), now).unwrap().tag().unwrap();
    assert!(peers.alice.recognize(&tcp(), &tag, now).unwrap().is_none());
}

#[test]
fn tag_from_expired_period_is_rejected() {
    let now = mid_period(5);
    let peers = paired(now);

    let tag = *peers.alice.outgoing_context(BOB, &tcp(), now).unwrap().tag().unwrap();
    // Two periods later, period 5 has left Bob's window
    assert!(peers.bob.recognize(&tcp(), &tag, now + 2 * HOUR).unwrap().is_none());
}

#[test]
fn skewed_peer_is_recognized_and_estimate_moves() {
    let alice_now = mid_period(5);
    let bob_now = alice_now + 50 * 60_000;
    let peers = paired(alice_now);

    let mut divergence = None;
    for expected in 0..3 {
        let tag = *peers.alice.outgoing_context(BOB, &tcp(), alice_now).unwrap().tag().unwrap();
        let recognized = peers.bob.recognize(&tcp(), &tag, bob_now).unwrap().unwrap();
        assert_eq!(recognized.context.period(), 5);
        assert_eq!(recognized.context.connection_number(), expected);

        for event in recognized.events {
            match event {
                KeyEvent::ClockDiffAdjusted { old_ms, new_ms, .. } => {
                    assert!(new_ms < old_ms, "Alice is behind, so the estimate must fall");
                },
                KeyEvent::ClockSkewDivergence { consecutive_edge_matches, .. } => {
                    divergence = Some(consecutive_edge_matches);
                },
            }
        }
    }
    assert_eq!(divergence, Some(rotation_config().skew_alert_threshold));

    let record = peers.bob.record(ALICE, &tcp()).unwrap();
    assert!(record.params.clock_diff_ms() < 0);
}

#[test]
fn tags_are_matched_to_their_owner() {
    let now = mid_period(5);
    let bob = TransportKeyManager::new(MemoryKeyStore::new(), rotation_config());
    for contact in 1..=20u8 {
        bob.add_contact(
            &registration(ContactId(u64::from(contact)), Role::Responder),
            &shared_secret(contact),
            now,
        )
        .unwrap();
    }

    for contact in [3u8, 17, 1, 20] {
        let sender = TransportKeyManager::new(MemoryKeyStore::new(), rotation_config());
        sender.add_contact(&registration(BOB, Role::Initiator), &shared_secret(contact), now).unwrap();

        let tag = *sender.outgoing_context(BOB, &tcp(), now).unwrap().tag().unwrap();
        let recognized = bob.recognize(&tcp(), &tag, now).unwrap().unwrap();
        assert_eq!(recognized.context.contact(), ContactId(u64::from(contact)));
    }

    let stranger = TransportKeyManager::new(MemoryKeyStore::new(), rotation_config());
    stranger.add_contact(&registration(BOB, Role::Initiator), &shared_secret(99), now).unwrap();
    let tag = *stranger.outgoing_context(BOB, &tcp(), now).unwrap().tag().unwrap();
    assert!(bob.recognize(&tcp(), &tag, now).unwrap().is_none());
}

#[test]
fn rotation_keeps_peers_in_step() {
    let env = TestEnv::new(9, mid_period(5));
    let peers = paired(env.wall_clock_millis());

    for _ in 0..5 {
        env.advance(Duration::from_millis(HOUR));
        let now = env.wall_clock_millis();
        peers.alice.rotate(now);
        peers.bob.rotate(now);

        let context = peers.alice.outgoing_context(BOB, &tcp(), now).unwrap();
        assert_eq!(context.connection_number(), 0, "counter restarts each period");
        let tag = *context.tag().unwrap();

        let recognized = peers.bob.recognize(&tcp(), &tag, now).unwrap().unwrap();
        assert_eq!(recognized.context.period(), context.period());
    }
}
