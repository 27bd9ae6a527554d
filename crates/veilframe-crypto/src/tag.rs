//! Connection tags.
//!
//! A tag is a single AES-256 block: the encryption of a version marker and
//! the connection number under the tag key. Without the key it is a uniformly
//! random 16-byte string; with the key it decodes to a connection number and
//! a marker that can be checked. No contact identifier is ever sent.
//!
//! ```text
//! plaintext:  [b"VFTG"][version: u16 BE][0x00 0x00][connection number: u64 BE]
//! tag:        AES-256(tag key, plaintext)
//! ```

use std::borrow::Borrow;

use aes::{
    Aes256, Block,
    cipher::{BlockDecrypt, BlockEncrypt, KeyInit},
};
use veilframe_proto::{PROTOCOL_VERSION, TAG_SIZE};

use crate::keys::TagKey;

/// Magic prefix of every decoded tag.
const TAG_MAGIC: [u8; 4] = *b"VFTG";

/// Length of the marker that precedes the connection number.
const MARKER_SIZE: usize = 8;

fn marker() -> [u8; MARKER_SIZE] {
    let mut marker = [0u8; MARKER_SIZE];
    marker[..4].copy_from_slice(&TAG_MAGIC);
    marker[4..6].copy_from_slice(&u16::from(PROTOCOL_VERSION).to_be_bytes());
    marker
}

fn cipher(key: &TagKey) -> Aes256 {
    Aes256::new(key.key().as_bytes().into())
}

/// Opaque bytes sent at the start of every new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag([u8; TAG_SIZE]);

impl Tag {
    /// Size of a tag on the wire.
    pub const SIZE: usize = TAG_SIZE;

    /// Wrap tag bytes read from the wire.
    pub fn from_bytes(bytes: [u8; TAG_SIZE]) -> Self {
        Self(bytes)
    }

    /// Tag bytes as sent on the wire.
    pub fn as_bytes(&self) -> &[u8; TAG_SIZE] {
        &self.0
    }
}

/// Encode the tag for `connection_number` under `key`.
///
/// Injective for a fixed key: AES is a permutation and the connection number
/// occupies its own bytes of the plaintext.
pub fn encode_tag(key: &TagKey, connection_number: u64) -> Tag {
    let mut plaintext = [0u8; TAG_SIZE];
    plaintext[..MARKER_SIZE].copy_from_slice(&marker());
    plaintext[MARKER_SIZE..].copy_from_slice(&connection_number.to_be_bytes());

    let mut block = Block::from(plaintext);
    cipher(key).encrypt_block(&mut block);

    let mut bytes = [0u8; TAG_SIZE];
    bytes.copy_from_slice(&block);
    Tag(bytes)
}

/// Try to decode `tag` under `key`.
///
/// Returns the connection number if the decrypted marker is valid, `None`
/// if the tag was not produced under this key.
pub fn decode_tag(key: &TagKey, tag: &Tag) -> Option<u64> {
    let mut block = Block::from(tag.0);
    cipher(key).decrypt_block(&mut block);

    let (prefix, number) = block.split_at(MARKER_SIZE);
    if prefix != marker() {
        return None;
    }

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(number);
    Some(u64::from_be_bytes(bytes))
}

/// Recognize `tag` against candidate keys.
///
/// Candidates are tried in iteration order and the first structurally valid
/// decode wins, so callers must supply a stable order. Recognition is only a
/// lookup: the caller consumes the connection number.
pub fn recognize<I, K>(
    candidates: impl IntoIterator<Item = (I, K)>,
    tag: &Tag,
) -> Option<(I, u64)>
where
    K: Borrow<TagKey>,
{
    candidates
        .into_iter()
        .find_map(|(identity, key)| decode_tag(key.borrow(), tag).map(|n| (identity, n)))
}
