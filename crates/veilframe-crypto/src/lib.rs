//! Veilframe Cryptographic Primitives
//!
//! Key hierarchy, connection tags and frame encryption for the Veilframe
//! transport layer. Pure functions with deterministic outputs; nothing here
//! performs I/O or reads the clock.
//!
//! # Key Lifecycle
//!
//! Every contact shares one long-term secret. Per transport, a one-way chain
//! of period secrets is derived from it, one link per rotation period. Each
//! period secret yields a tag key per sending role and a frame key per
//! (sending role, connection number).
//!
//! ```text
//! SharedSecret
//!        │ HKDF(transport id)
//!        ▼
//! PeriodSecret(0) ──HMAC──▶ PeriodSecret(1) ──HMAC──▶ ... PeriodSecret(p)
//!                                                            │
//!                              ┌─────────────────────────────┤
//!                              ▼                             ▼
//!                HKDF → TagKey(sender role)   HKDF → FrameKey(sender role, n)
//!                              │                             │
//!                              ▼                             ▼
//!                AES-256 → Tag(n)            XChaCha20-Poly1305 → frames
//! ```
//!
//! # Security
//!
//! Forward Secrecy:
//! - Period secrets are chained through a one-way function: holding period
//!   `p` reveals nothing about `p - 1`
//! - Every key type is zeroized on drop and cannot be cloned
//!
//! Unlinkability:
//! - A tag is one AES block: without the tag key it is indistinguishable
//!   from random and carries no contact identifier
//!
//! Authenticity:
//! - Frame headers and bodies are sealed separately under `XChaCha20-Poly1305`
//!   with nonces built from a strictly sequential frame counter
//! - Any authentication failure poisons the opener and erases its key

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod derivation;
pub mod error;
pub mod frame;
pub mod keys;
pub mod tag;

pub use derivation::{
    KeyLabel, derive_frame_key, derive_initial_period_secret, derive_key, derive_period_secret,
    derive_tag_key,
};
pub use error::CryptoError;
pub use frame::{FrameOpener, FrameSealer, MAX_FRAMES, OpenedFrame, sealed_frame_size};
pub use keys::{Direction, FrameKey, KEY_SIZE, PeriodSecret, Role, SecretKey, SharedSecret, TagKey};
pub use tag::{Tag, decode_tag, encode_tag, recognize};
