//! Frame encryption using `XChaCha20-Poly1305`.
//!
//! Each frame is sealed in two parts so a reader learns the body length from
//! an authenticated header before it reads the body:
//!
//! ```text
//! [sealed header: FrameHeader (4) + MAC (16)][sealed body: payload + padding + MAC (16)]
//! ```
//!
//! Both parts use the frame key of the connection and a nonce built from the
//! frame counter, so the only valid order to open frames is the order they
//! were sealed in. The header bytes are the associated data of the body.
//!
//! # Invariants
//!
//! - The counter advances exactly once per frame, whether or not it opened
//! - A nonce is never reused under one frame key: sealing stops at
//!   [`MAX_FRAMES`] instead of wrapping
//! - Any failure erases the opener's key; nothing further can be opened

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use veilframe_proto::{FrameHeader, MAC_SIZE, SEALED_HEADER_SIZE};

use crate::{error::CryptoError, keys::FrameKey};

/// Number of frames one frame key may seal or open.
pub const MAX_FRAMES: u64 = 1 << 32;

/// Nonce kind byte for the header part of a frame.
const HEADER_NONCE_KIND: u8 = 1;

/// Nonce kind byte for the body part of a frame.
const BODY_NONCE_KIND: u8 = 0;

/// Build a 24-byte nonce for `XChaCha20`.
///
/// Structure:
/// - bytes 0-7: frame counter (big-endian)
/// - byte 8: part kind (header or body)
/// - bytes 9-23: zero
fn build_nonce(counter: u64, kind: u8) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[0..8].copy_from_slice(&counter.to_be_bytes());
    nonce[8] = kind;
    nonce
}

fn cipher(key: Option<&FrameKey>) -> Result<XChaCha20Poly1305, CryptoError> {
    let key = key.ok_or(CryptoError::StreamClosed)?;
    Ok(XChaCha20Poly1305::new(key.key().as_bytes().into()))
}

/// A frame that passed authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedFrame {
    /// Payload bytes with padding removed
    pub payload: Vec<u8>,
    /// Whether the sender marked this as the last frame
    pub is_final: bool,
}

/// Sending half of a connection's frame cipher.
#[derive(Debug)]
pub struct FrameSealer {
    key: Option<FrameKey>,
    counter: u64,
}

impl FrameSealer {
    /// Start sealing frames at counter zero.
    pub fn new(key: FrameKey) -> Self {
        Self { key: Some(key), counter: 0 }
    }

    /// Number of frames sealed so far.
    pub fn frames_sealed(&self) -> u64 {
        self.counter
    }

    /// Whether the sealer can no longer seal (final frame sent or erased).
    pub fn is_closed(&self) -> bool {
        self.key.is_none()
    }

    /// Erase the frame key. Further calls to [`Self::seal`] fail.
    pub fn erase(&mut self) {
        self.key = None;
    }

    /// Seal one frame carrying `payload` followed by `padding_length` zero
    /// bytes.
    ///
    /// Sealing a final frame closes the sealer and erases its key.
    ///
    /// # Errors
    ///
    /// - `StreamClosed` after the final frame or [`Self::erase`]
    /// - `RotationRequired` once [`MAX_FRAMES`] frames were sealed
    /// - `InvalidFrame` if payload plus padding does not fit one frame; the
    ///   counter does not advance
    pub fn seal(
        &mut self,
        payload: &[u8],
        padding_length: usize,
        is_final: bool,
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = cipher(self.key.as_ref())?;

        if self.counter >= MAX_FRAMES {
            return Err(CryptoError::RotationRequired { counter: self.counter });
        }

        let header = FrameHeader::new(payload.len(), padding_length, is_final)?;
        let header_bytes = header.to_bytes();

        let Ok(sealed_header) = cipher.encrypt(
            XNonce::from_slice(&build_nonce(self.counter, HEADER_NONCE_KIND)),
            header_bytes.as_slice(),
        ) else {
            unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };

        let mut body = Vec::with_capacity(header.sealed_body_length());
        body.extend_from_slice(payload);
        body.resize(header.body_length(), 0);

        let Ok(sealed_body) = cipher.encrypt(
            XNonce::from_slice(&build_nonce(self.counter, BODY_NONCE_KIND)),
            Payload { msg: &body, aad: &header_bytes },
        ) else {
            unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };

        self.counter += 1;
        if is_final {
            self.key = None;
        }

        let mut frame = sealed_header;
        frame.extend_from_slice(&sealed_body);
        Ok(frame)
    }
}

/// Receiving half of a connection's frame cipher.
///
/// Frames are opened either whole with [`Self::open_frame`] or in two steps
/// with [`Self::open_header`] and [`Self::open_body`], which lets a stream
/// reader learn how many body bytes to read.
#[derive(Debug)]
pub struct FrameOpener {
    key: Option<FrameKey>,
    counter: u64,
    pending: Option<FrameHeader>,
}

impl FrameOpener {
    /// Start opening frames at counter zero.
    pub fn new(key: FrameKey) -> Self {
        Self { key: Some(key), counter: 0, pending: None }
    }

    /// Number of frames consumed so far, including failed ones.
    pub fn frames_opened(&self) -> u64 {
        self.counter
    }

    /// Whether the opener can no longer open (final frame seen, failed, or
    /// erased).
    pub fn is_closed(&self) -> bool {
        self.key.is_none()
    }

    /// Erase the frame key. Further calls fail with `StreamClosed`.
    pub fn erase(&mut self) {
        self.key = None;
        self.pending = None;
    }

    /// Open a complete frame: sealed header immediately followed by the
    /// sealed body.
    ///
    /// # Errors
    ///
    /// - `StreamClosed` if the opener is closed
    /// - `AuthFailure` for anything else; the opener is then closed
    pub fn open_frame(&mut self, frame: &[u8]) -> Result<OpenedFrame, CryptoError> {
        let (sealed_header, sealed_body) = frame.split_at(SEALED_HEADER_SIZE.min(frame.len()));
        self.open_header(sealed_header)?;
        self.open_body(sealed_body)
    }

    /// Authenticate and decode the header of the next frame.
    ///
    /// The returned header tells the caller how many bytes the sealed body
    /// has ([`FrameHeader::sealed_body_length`]).
    ///
    /// # Errors
    ///
    /// - `StreamClosed` if the opener is closed
    /// - `AuthFailure` if the header does not authenticate, is malformed, a
    ///   header is already pending, or the counter is exhausted
    pub fn open_header(&mut self, sealed_header: &[u8]) -> Result<FrameHeader, CryptoError> {
        let cipher = cipher(self.key.as_ref())?;

        if self.pending.is_some() {
            return Err(self.fail("header opened twice"));
        }
        if self.counter >= MAX_FRAMES {
            return Err(self.fail("frame counter exhausted"));
        }
        if sealed_header.len() != SEALED_HEADER_SIZE {
            return Err(self.fail("bad header length"));
        }

        let nonce = build_nonce(self.counter, HEADER_NONCE_KIND);
        let Ok(plain) = cipher.decrypt(XNonce::from_slice(&nonce), sealed_header) else {
            return Err(self.fail("header MAC mismatch"));
        };

        let header = match FrameHeader::from_bytes(&plain) {
            Ok(header) => *header,
            Err(_) => return Err(self.fail("malformed header")),
        };

        self.pending = Some(header);
        Ok(header)
    }

    /// Authenticate the body belonging to the header returned by the last
    /// [`Self::open_header`] call.
    ///
    /// Opening the final frame closes the opener and erases its key.
    ///
    /// # Errors
    ///
    /// - `StreamClosed` if the opener is closed
    /// - `AuthFailure` if no header is pending, the body length disagrees
    ///   with the header, the MAC does not verify, or padding is non-zero
    pub fn open_body(&mut self, sealed_body: &[u8]) -> Result<OpenedFrame, CryptoError> {
        let cipher = cipher(self.key.as_ref())?;

        let Some(header) = self.pending else {
            return Err(self.fail("body without header"));
        };
        if sealed_body.len() != header.sealed_body_length() {
            return Err(self.fail("bad body length"));
        }

        let header_bytes = header.to_bytes();
        let nonce = build_nonce(self.counter, BODY_NONCE_KIND);
        let payload = Payload { msg: sealed_body, aad: &header_bytes };
        let Ok(mut body) = cipher.decrypt(XNonce::from_slice(&nonce), payload) else {
            return Err(self.fail("body MAC mismatch"));
        };

        if body[header.payload_length()..].iter().any(|&b| b != 0) {
            return Err(self.fail("non-zero padding"));
        }
        body.truncate(header.payload_length());

        self.counter += 1;
        self.pending = None;
        if header.is_final() {
            self.key = None;
        }

        Ok(OpenedFrame { payload: body, is_final: header.is_final() })
    }

    /// Close the opener after a failure: the frame counts as consumed and
    /// the key is erased.
    fn fail(&mut self, reason: &'static str) -> CryptoError {
        self.counter = self.counter.saturating_add(1);
        self.pending = None;
        self.key = None;
        CryptoError::AuthFailure { reason }
    }
}

/// Size of a sealed frame carrying `body_length` payload and padding bytes.
pub fn sealed_frame_size(body_length: usize) -> usize {
    SEALED_HEADER_SIZE + body_length + MAC_SIZE
}
