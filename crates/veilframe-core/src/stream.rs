//! Authenticated record streams over an arbitrary byte transport.
//!
//! An outgoing stream starts with the connection's tag, followed by frames
//! that carry the byte stream of encoded records. Records are packed into
//! frames without regard to record boundaries, so frame sizes reveal nothing
//! about record sizes beyond what the padding policy allows.
//!
//! ```text
//! [tag (16)][frame][frame]...[final frame]
//! ```
//!
//! Any failure on a stream erases its keys and poisons it; every later call
//! returns the same error. Failures are reported as the opaque
//! [`TransportError::ConnectionFailed`] and the cause is only logged at
//! `debug` level. The one exception is a writer that reaches the frame limit
//! of its key: it reports [`TransportError::RotationRequired`] so the caller
//! can carry on over a new connection.

use std::{fmt, time::Duration};

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use veilframe_crypto::{CryptoError, Direction, FrameOpener, FrameSealer, OpenedFrame, Tag};
use veilframe_proto::{MAX_FRAME_PAYLOAD, Record, SEALED_HEADER_SIZE};

use crate::{
    context::ConnectionContext,
    env::Environment,
    error::TransportError,
    ids::{ContactId, TransportId},
};

/// Default time to wait for the next frame before failing the stream.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// How much padding each outgoing frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaddingPolicy {
    /// No padding
    #[default]
    None,
    /// Uniformly random padding of up to `max` bytes, limited by the room
    /// left in the frame
    Random {
        /// Upper bound on padding per frame
        max: usize,
    },
    /// Pad every frame to the maximum frame size
    FillFrame,
}

/// Stream configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Padding applied to outgoing frames
    pub padding: PaddingPolicy,
    /// Maximum wait for one incoming frame (or the tag)
    pub read_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { padding: PaddingPolicy::None, read_timeout: DEFAULT_READ_TIMEOUT }
    }
}

/// Local cause of a stream failure. Never leaves this module.
#[derive(Error, Debug)]
enum StreamFailure {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame: {0}")]
    Crypto(#[from] CryptoError),

    #[error("record: {0}")]
    Record(#[from] veilframe_proto::ProtocolError),

    #[error("read timed out")]
    Timeout,

    #[error("stream ended inside a record")]
    Truncated,
}

impl StreamFailure {
    /// What the caller gets to see.
    fn outcome(&self) -> TransportError {
        match self {
            Self::Crypto(CryptoError::RotationRequired { .. }) => TransportError::RotationRequired,
            _ => TransportError::ConnectionFailed,
        }
    }
}

fn log_failure(contact: ContactId, transport: &TransportId, cause: &impl fmt::Display) {
    tracing::debug!(contact = %contact, transport = %transport, cause = %cause, "Connection failed");
}

/// Read the tag that opens a new incoming connection.
///
/// # Errors
///
/// - `ConnectionFailed` if the transport ends or stalls before a full tag
pub async fn read_tag<R: AsyncRead + Unpin>(
    reader: &mut R,
    read_timeout: Duration,
) -> Result<Tag, TransportError> {
    let mut bytes = [0u8; Tag::SIZE];
    match tokio::time::timeout(read_timeout, reader.read_exact(&mut bytes)).await {
        Ok(Ok(_)) => Ok(Tag::from_bytes(bytes)),
        Ok(Err(error)) => {
            tracing::debug!(error = %error, "Failed to read tag");
            Err(TransportError::ConnectionFailed)
        },
        Err(_) => {
            tracing::debug!("Timed out reading tag");
            Err(TransportError::ConnectionFailed)
        },
    }
}

/// Writing half of an authenticated stream.
///
/// Records are buffered and sealed into frames of at most
/// [`MAX_FRAME_PAYLOAD`] bytes. [`Self::flush`] forces out a partial frame;
/// [`Self::close`] sends the final frame and erases the key.
pub struct StreamWriter<W, E> {
    writer: W,
    env: E,
    sealer: FrameSealer,
    pending_tag: Option<Tag>,
    buffer: BytesMut,
    padding: PaddingPolicy,
    contact: ContactId,
    transport: TransportId,
    failure: Option<TransportError>,
}

impl<W: AsyncWrite + Unpin, E: Environment> StreamWriter<W, E> {
    /// Start an outgoing stream. The tag is written with the first frame.
    ///
    /// # Errors
    ///
    /// - `WrongDirection` if `context` is not an outgoing context
    pub fn new(
        writer: W,
        context: ConnectionContext,
        env: E,
        config: &StreamConfig,
    ) -> Result<Self, TransportError> {
        let contact = context.contact();
        let transport = context.transport().clone();
        let Some((tag, sealer)) = context.into_sealer() else {
            return Err(TransportError::WrongDirection { expected: Direction::Outgoing });
        };

        Ok(Self {
            writer,
            env,
            sealer,
            pending_tag: Some(tag),
            buffer: BytesMut::with_capacity(MAX_FRAME_PAYLOAD),
            padding: config.padding,
            contact,
            transport,
            failure: None,
        })
    }

    /// Frames sealed so far.
    pub fn frames_written(&self) -> u64 {
        self.sealer.frames_sealed()
    }

    /// Queue a record, writing every frame it fills.
    ///
    /// # Errors
    ///
    /// - `RotationRequired` once the frame key is used up
    /// - `ConnectionFailed` on any other failure
    pub async fn write_record(&mut self, record: &Record) -> Result<(), TransportError> {
        self.check_open()?;

        record.encode(&mut self.buffer);
        while self.buffer.len() >= MAX_FRAME_PAYLOAD {
            self.write_frame(MAX_FRAME_PAYLOAD, false).await?;
        }
        Ok(())
    }

    /// Write buffered bytes as a (non-final) frame and flush the transport.
    pub async fn flush(&mut self) -> Result<(), TransportError> {
        self.check_open()?;

        if !self.buffer.is_empty() {
            self.write_frame(self.buffer.len(), false).await?;
        }
        if let Err(error) = self.writer.flush().await {
            return Err(self.fail(&StreamFailure::Io(error)));
        }
        Ok(())
    }

    /// Send the remaining bytes in a final frame, erase the key and return
    /// the transport.
    pub async fn close(mut self) -> Result<W, TransportError> {
        self.check_open()?;

        self.write_frame(self.buffer.len(), true).await?;
        if let Err(error) = self.writer.flush().await {
            return Err(self.fail(&StreamFailure::Io(error)));
        }

        tracing::debug!(
            contact = %self.contact,
            transport = %self.transport,
            frames = self.sealer.frames_sealed(),
            "Closed outgoing stream"
        );
        Ok(self.writer)
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        if self.sealer.is_closed() {
            return Err(TransportError::StreamClosed);
        }
        Ok(())
    }

    async fn write_frame(&mut self, length: usize, is_final: bool) -> Result<(), TransportError> {
        let payload = self.buffer.split_to(length);
        let padding = self.padding_for(payload.len());

        let frame = match self.sealer.seal(&payload, padding, is_final) {
            Ok(frame) => frame,
            Err(error) => return Err(self.fail(&StreamFailure::Crypto(error))),
        };

        if let Some(tag) = self.pending_tag.take()
            && let Err(error) = self.writer.write_all(tag.as_bytes()).await
        {
            return Err(self.fail(&StreamFailure::Io(error)));
        }
        if let Err(error) = self.writer.write_all(&frame).await {
            return Err(self.fail(&StreamFailure::Io(error)));
        }
        Ok(())
    }

    fn padding_for(&self, payload_length: usize) -> usize {
        let room = MAX_FRAME_PAYLOAD.saturating_sub(payload_length);
        match self.padding {
            PaddingPolicy::None => 0,
            PaddingPolicy::FillFrame => room,
            PaddingPolicy::Random { max } => {
                let bound = max.min(room) as u64;
                if bound == 0 { 0 } else { (self.env.random_u64() % (bound + 1)) as usize }
            },
        }
    }

    fn fail(&mut self, cause: &StreamFailure) -> TransportError {
        log_failure(self.contact, &self.transport, cause);
        self.sealer.erase();
        self.buffer.clear();
        let outcome = cause.outcome();
        self.failure = Some(outcome.clone());
        outcome
    }
}

impl<W, E> fmt::Debug for StreamWriter<W, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamWriter")
            .field("contact", &self.contact)
            .field("transport", &self.transport)
            .field("frames_sealed", &self.sealer.frames_sealed())
            .field("buffered", &self.buffer.len())
            .field("failed", &self.failure.is_some())
            .finish_non_exhaustive()
    }
}

/// Reading half of an authenticated stream.
///
/// Created after the tag was read and recognized. Frames are opened in
/// order and their payloads reassembled into records.
pub struct StreamReader<R> {
    reader: R,
    opener: FrameOpener,
    buffer: BytesMut,
    read_timeout: Duration,
    contact: ContactId,
    transport: TransportId,
    finished: bool,
    poisoned: bool,
}

impl<R: AsyncRead + Unpin> StreamReader<R> {
    /// Start reading an incoming stream whose tag was already consumed.
    ///
    /// # Errors
    ///
    /// - `WrongDirection` if `context` is not an incoming context
    pub fn new(
        reader: R,
        context: ConnectionContext,
        config: &StreamConfig,
    ) -> Result<Self, TransportError> {
        let contact = context.contact();
        let transport = context.transport().clone();
        let Some(opener) = context.into_opener() else {
            return Err(TransportError::WrongDirection { expected: Direction::Incoming });
        };

        Ok(Self {
            reader,
            opener,
            buffer: BytesMut::new(),
            read_timeout: config.read_timeout,
            contact,
            transport,
            finished: false,
            poisoned: false,
        })
    }

    /// Frames opened so far.
    pub fn frames_read(&self) -> u64 {
        self.opener.frames_opened()
    }

    /// Read the next record.
    ///
    /// Returns `Ok(None)` once the final frame was read and every record in
    /// it returned.
    ///
    /// # Errors
    ///
    /// - `ConnectionFailed` on tampering, truncation, a malformed record or
    ///   a read timeout. The reader is poisoned afterwards.
    pub async fn read_record(&mut self) -> Result<Option<Record>, TransportError> {
        loop {
            if self.poisoned {
                return Err(TransportError::ConnectionFailed);
            }

            match Record::decode(&self.buffer) {
                Ok(Some((record, used))) => {
                    self.buffer.advance(used);
                    return Ok(Some(record));
                },
                Ok(None) => {},
                Err(error) => return Err(self.fail(&StreamFailure::Record(error))),
            }

            if self.finished {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(self.fail(&StreamFailure::Truncated));
            }

            let frame = match tokio::time::timeout(self.read_timeout, self.read_frame()).await {
                Ok(Ok(frame)) => frame,
                Ok(Err(cause)) => return Err(self.fail(&cause)),
                // A partially read frame cannot be resumed
                Err(_) => return Err(self.fail(&StreamFailure::Timeout)),
            };

            self.buffer.extend_from_slice(&frame.payload);
            self.finished = frame.is_final;
        }
    }

    /// Read and open one frame: the sealed header first, then the body
    /// length it announces.
    async fn read_frame(&mut self) -> Result<OpenedFrame, StreamFailure> {
        let mut sealed_header = [0u8; SEALED_HEADER_SIZE];
        self.reader.read_exact(&mut sealed_header).await?;
        let header = self.opener.open_header(&sealed_header)?;

        let mut sealed_body = vec![0u8; header.sealed_body_length()];
        self.reader.read_exact(&mut sealed_body).await?;
        Ok(self.opener.open_body(&sealed_body)?)
    }

    fn fail(&mut self, cause: &StreamFailure) -> TransportError {
        log_failure(self.contact, &self.transport, cause);
        self.opener.erase();
        self.buffer.clear();
        self.poisoned = true;
        TransportError::ConnectionFailed
    }
}

impl<R> fmt::Debug for StreamReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReader")
            .field("contact", &self.contact)
            .field("transport", &self.transport)
            .field("frames_opened", &self.opener.frames_opened())
            .field("finished", &self.finished)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}
