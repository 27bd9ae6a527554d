//! Fuzz target for frame authentication
//!
//! Seals a stream of frames, lets the fuzzer corrupt it, and opens the
//! result with the matching key.
//!
//! # Strategy
//!
//! - Bit flips at arbitrary positions
//! - Truncation and extension of single frames
//! - Reordering and dropping of frames
//! - Frames replaced by arbitrary bytes
//!
//! # Invariants
//!
//! - Never panics
//! - Untouched frames open to the sealed payload
//! - The first corrupted frame fails, and nothing opens after a failure

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use veilframe_crypto::{
    Direction, FrameOpener, FrameSealer, PeriodSecret, Role, derive_frame_key,
};
use veilframe_proto::MAX_FRAME_PAYLOAD;

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    secret: [u8; 32],
    connection_number: u64,
    frames: Vec<FrameInput>,
    mutation: Mutation,
}

#[derive(Debug, Clone, Arbitrary)]
struct FrameInput {
    payload: Vec<u8>,
    padding: u16,
}

#[derive(Debug, Clone, Arbitrary)]
enum Mutation {
    None,
    FlipBit { frame: u8, position: u16, bit: u8 },
    Truncate { frame: u8, keep: u16 },
    Extend { frame: u8, extra: Vec<u8> },
    Swap { first: u8, second: u8 },
    Drop { frame: u8 },
    Replace { frame: u8, bytes: Vec<u8> },
}

fuzz_target!(|scenario: Scenario| {
    let period = PeriodSecret::from_bytes(3, scenario.secret);
    let mut sealer = FrameSealer::new(derive_frame_key(
        &period,
        Role::Initiator,
        Direction::Outgoing,
        scenario.connection_number,
    ));
    let mut opener = FrameOpener::new(derive_frame_key(
        &period,
        Role::Responder,
        Direction::Incoming,
        scenario.connection_number,
    ));

    let mut payloads = Vec::new();
    let mut sealed = Vec::new();
    let count = scenario.frames.len().min(16);
    for (index, input) in scenario.frames.iter().take(count).enumerate() {
        let payload = &input.payload[..input.payload.len().min(MAX_FRAME_PAYLOAD)];
        let padding = usize::from(input.padding) % (MAX_FRAME_PAYLOAD - payload.len() + 1);
        let is_final = index + 1 == count;
        let Ok(frame) = sealer.seal(payload, padding, is_final) else {
            panic!("sealing a fitting frame must succeed");
        };
        payloads.push((payload.to_vec(), is_final));
        sealed.push(frame);
    }
    if sealed.is_empty() {
        return;
    }

    let original = sealed.clone();
    let at = |index: u8| usize::from(index) % original.len();
    match scenario.mutation {
        Mutation::None => {},
        Mutation::FlipBit { frame, position, bit } => {
            let frame = &mut sealed[at(frame)];
            let position = usize::from(position) % frame.len();
            frame[position] ^= 1 << (bit % 8);
        },
        Mutation::Truncate { frame, keep } => {
            let frame = &mut sealed[at(frame)];
            let keep = usize::from(keep) % frame.len();
            frame.truncate(keep);
        },
        Mutation::Extend { frame, extra } => {
            if !extra.is_empty() {
                sealed[at(frame)].extend_from_slice(&extra);
            }
        },
        Mutation::Swap { first, second } => sealed.swap(at(first), at(second)),
        Mutation::Drop { frame } => {
            sealed.remove(at(frame));
        },
        Mutation::Replace { frame, bytes } => sealed[at(frame)] = bytes,
    }

    let mut failed = false;
    for (index, frame) in sealed.iter().enumerate() {
        let result = opener.open_frame(frame);
        if failed {
            assert!(result.is_err(), "nothing opens after a failure");
            continue;
        }

        let intact = original.get(index) == Some(frame);
        match result {
            Ok(opened) => {
                assert!(intact, "a corrupted frame opened");
                let (payload, is_final) = &payloads[index];
                assert_eq!(&opened.payload, payload);
                assert_eq!(opened.is_final, *is_final);
            },
            Err(_) => {
                assert!(!intact, "an intact frame failed to open");
                failed = true;
            },
        }
    }
});
