//! Fuzz target for tag recognition
//!
//! Incoming tags are the first bytes a stranger can send. Recognition must
//! cope with any 16 bytes and never misattribute a tag.
//!
//! # Invariants
//!
//! - Never panics
//! - A match is consistent: re-encoding the decoded number under the
//!   matching key reproduces the tag
//! - Tags encoded under a candidate key are always matched to that key

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use veilframe_crypto::{
    Direction, PeriodSecret, Role, Tag, TagKey, decode_tag, derive_tag_key, encode_tag, recognize,
};

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    secrets: Vec<[u8; 32]>,
    tag: [u8; 16],
    connection_number: u64,
    owner: u8,
}

fuzz_target!(|scenario: Scenario| {
    let keys: Vec<TagKey> = scenario
        .secrets
        .iter()
        .take(8)
        .enumerate()
        .map(|(index, secret)| {
            let period = PeriodSecret::from_bytes(index as u64, *secret);
            derive_tag_key(&period, Role::Responder, Direction::Incoming)
        })
        .collect();

    let tag = Tag::from_bytes(scenario.tag);
    if let Some((index, number)) = recognize(keys.iter().enumerate(), &tag) {
        assert_eq!(encode_tag(&keys[index], number), tag);
        assert_eq!(decode_tag(&keys[index], &tag), Some(number));
    }

    if keys.is_empty() {
        return;
    }
    let owner = usize::from(scenario.owner) % keys.len();
    let encoded = encode_tag(&keys[owner], scenario.connection_number);
    let Some((index, number)) = recognize(keys.iter().enumerate(), &encoded) else {
        panic!("an encoded tag must be recognized");
    };
    // First fit: an earlier key wins a chance collision
    assert!(index <= owner);
    assert_eq!(number, scenario.connection_number);
});
