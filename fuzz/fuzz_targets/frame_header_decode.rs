//! Fuzz target for FrameHeader::from_bytes
//!
//! Frame headers only reach the parser after authentication, but the parser
//! must still hold up on its own.
//!
//! # Invariants
//!
//! - Never panics; malformed input returns an error
//! - An accepted header fits one frame: payload + padding <= MAX_FRAME_PAYLOAD
//! - An accepted header re-encodes to the bytes it was parsed from

#![no_main]

use libfuzzer_sys::fuzz_target;
use veilframe_proto::{FrameHeader, MAX_FRAME_PAYLOAD};

fuzz_target!(|data: &[u8]| {
    let Ok(header) = FrameHeader::from_bytes(data) else {
        return;
    };

    assert!(header.body_length() <= MAX_FRAME_PAYLOAD);
    assert_eq!(header.body_length(), header.payload_length() + header.padding_length());
    assert_eq!(&header.to_bytes()[..], &data[..FrameHeader::SIZE]);
});
