//! Key derivation hierarchy using HKDF and an HMAC period chain.
//!
//! Every derivation takes its domain-separation label as an explicit
//! [`KeyLabel`] argument, so each function is a pure function of its inputs.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::keys::{Direction, FrameKey, KEY_SIZE, PeriodSecret, Role, SecretKey, SharedSecret, TagKey};

type HmacSha256 = Hmac<Sha256>;

/// Domain-separation label for one kind of derived key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyLabel(&'static [u8]);

impl KeyLabel {
    /// Create a label from a static byte string.
    pub const fn new(label: &'static [u8]) -> Self {
        Self(label)
    }

    /// Label bytes.
    pub fn as_bytes(&self) -> &'static [u8] {
        self.0
    }
}

/// Period 0 secret for a (contact, transport) pair.
pub const TRANSPORT_ROOT_LABEL: KeyLabel = KeyLabel::new(b"veilframe.transport.root.v1");

/// One step of the period chain.
pub const ROTATE_LABEL: KeyLabel = KeyLabel::new(b"veilframe.transport.rotate.v1");

/// Tag key for streams sent by the initiator.
pub const INITIATOR_TAG_LABEL: KeyLabel = KeyLabel::new(b"veilframe.tag.initiator.v1");

/// Tag key for streams sent by the responder.
pub const RESPONDER_TAG_LABEL: KeyLabel = KeyLabel::new(b"veilframe.tag.responder.v1");

/// Frame key for streams sent by the initiator.
pub const INITIATOR_FRAME_LABEL: KeyLabel = KeyLabel::new(b"veilframe.frame.initiator.v1");

/// Frame key for streams sent by the responder.
pub const RESPONDER_FRAME_LABEL: KeyLabel = KeyLabel::new(b"veilframe.frame.responder.v1");

/// Derive a 32-byte key from `secret` under `label`.
///
/// The HKDF info is `label || len(input_0) || input_0 || ...` with 32-bit
/// big-endian lengths, so distinct input lists never collide.
pub fn derive_key(label: KeyLabel, secret: &SecretKey, inputs: &[&[u8]]) -> SecretKey {
    let hkdf = Hkdf::<Sha256>::new(None, secret.as_bytes());

    let capacity = label.as_bytes().len() + inputs.iter().map(|i| 4 + i.len()).sum::<usize>();
    let mut info = Vec::with_capacity(capacity);
    info.extend_from_slice(label.as_bytes());
    for input in inputs {
        info.extend_from_slice(&(input.len() as u32).to_be_bytes());
        info.extend_from_slice(input);
    }

    let mut okm = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(&info, &mut okm) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    SecretKey::from_bytes(okm)
}

/// Derive the period 0 secret for one transport from the contact's shared
/// secret.
///
/// The transport identifier is mixed in so that the chains of different
/// transports are independent.
pub fn derive_initial_period_secret(shared: &SharedSecret, transport_id: &[u8]) -> PeriodSecret {
    PeriodSecret::new(0, derive_key(TRANSPORT_ROOT_LABEL, shared.key(), &[transport_id]))
}

/// Derive the secret for `period` from the secret of `period - 1`.
///
/// The only inputs are the previous secret and the period index, so
/// reaching period `p` requires having held period `p - 1`.
///
/// # Panics
///
/// Panics if `period` is not exactly `previous.period() + 1`. Callers
/// validate period indices before deriving.
pub fn derive_period_secret(previous: &PeriodSecret, period: u64) -> PeriodSecret {
    assert_eq!(
        previous.period().checked_add(1),
        Some(period),
        "period secrets must be derived in order"
    );

    let Ok(mut mac) = HmacSha256::new_from_slice(previous.key().as_bytes()) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(ROTATE_LABEL.as_bytes());
    mac.update(&period.to_be_bytes());
    let result = mac.finalize().into_bytes();

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&result);
    PeriodSecret::new(period, SecretKey::from_bytes(key))
}

/// Derive the tag key for streams in `direction`, seen from `role`.
///
/// Both peers agree without messages: the initiator's outgoing tag key
/// equals the responder's incoming tag key.
pub fn derive_tag_key(period_secret: &PeriodSecret, role: Role, direction: Direction) -> TagKey {
    let label = match direction.sender(role) {
        Role::Initiator => INITIATOR_TAG_LABEL,
        Role::Responder => RESPONDER_TAG_LABEL,
    };

    TagKey::new(derive_key(label, period_secret.key(), &[&period_secret.period().to_be_bytes()[..]]))
}

/// Derive the frame key for one connection in `direction`, seen from `role`.
///
/// The connection number is mixed in so that no two connections in a period
/// share a frame key.
pub fn derive_frame_key(
    period_secret: &PeriodSecret,
    role: Role,
    direction: Direction,
    connection_number: u64,
) -> FrameKey {
    let label = match direction.sender(role) {
        Role::Initiator => INITIATOR_FRAME_LABEL,
        Role::Responder => RESPONDER_FRAME_LABEL,
    };

    FrameKey::new(derive_key(label, period_secret.key(), &[
        &period_secret.period().to_be_bytes()[..],
        &connection_number.to_be_bytes()[..],
    ]))
}
