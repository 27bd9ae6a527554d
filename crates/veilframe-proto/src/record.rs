//! Length-prefixed records.
//!
//! A `Record` is the unit of data exchanged by the synchronization layer. The
//! codec is independent of encryption: it works the same on the plaintext
//! recovered from frames and on an in-memory buffer in tests.

use std::io::{Read, Write};

use bytes::{BufMut, Bytes};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Raw 4-byte record header (Big Endian).
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RecordHeader {
    protocol_version: u8,
    record_type: u8,
    length: [u8; 2],
}

/// One application-level record.
///
/// Layout on the wire:
/// `[protocol_version: 1][record_type: 1][length: 2 BE][payload: length]`
///
/// # Invariants
///
/// - `payload.len() <= Record::MAX_PAYLOAD_SIZE`, enforced by [`Record::new`].
///   An oversized record is a construction error and never reaches the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    protocol_version: u8,
    record_type: u8,
    payload: Bytes,
}

impl Record {
    /// Size of the record header in bytes.
    pub const HEADER_SIZE: usize = 4;

    /// Maximum payload size (48 KiB).
    pub const MAX_PAYLOAD_SIZE: usize = 48 * 1024;

    /// Create a record, rejecting oversized payloads.
    pub fn new(protocol_version: u8, record_type: u8, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: Self::MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self { protocol_version, record_type, payload })
    }

    /// Protocol version byte.
    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    /// Record type byte (meaning defined by the synchronization layer).
    pub fn record_type(&self) -> u8 {
        self.record_type
    }

    /// Record payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the record, returning its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Header plus payload length.
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.payload.len()
    }

    /// Encode the record into a buffer.
    pub fn encode(&self, dst: &mut impl BufMut) {
        // INVARIANT: new() bounds payload by MAX_PAYLOAD_SIZE < u16::MAX
        let header = RecordHeader {
            protocol_version: self.protocol_version,
            record_type: self.record_type,
            length: (self.payload.len() as u16).to_be_bytes(),
        };

        dst.put_slice(header.as_bytes());
        dst.put_slice(&self.payload);
    }

    /// Encode the record into a fresh vector.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf
    }

    /// Decode one record from the front of `bytes`.
    ///
    /// Returns `Ok(None)` if `bytes` holds only part of a record; the caller
    /// should supply more data. On success returns the record and the number
    /// of bytes it occupied.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidRecordLength` if the header announces more
    ///   than [`Record::MAX_PAYLOAD_SIZE`] bytes
    pub fn decode(bytes: &[u8]) -> Result<Option<(Self, usize)>> {
        let Ok((header, rest)) = RecordHeader::ref_from_prefix(bytes) else {
            return Ok(None);
        };

        let length = u16::from_be_bytes(header.length) as usize;
        if length > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::InvalidRecordLength {
                length,
                max: Self::MAX_PAYLOAD_SIZE,
            });
        }

        let Some(payload) = rest.get(..length) else {
            return Ok(None);
        };

        let record = Self {
            protocol_version: header.protocol_version,
            record_type: header.record_type,
            payload: Bytes::copy_from_slice(payload),
        };

        Ok(Some((record, Self::HEADER_SIZE + length)))
    }
}

/// Read exactly one record from a blocking reader.
///
/// # Errors
///
/// - `ProtocolError::EndOfStream` if the reader ends before the header and
///   the full payload were read. A zero-length record is not an error.
/// - `ProtocolError::InvalidRecordLength` for an oversized length field
pub fn read_record(reader: &mut impl Read) -> Result<Record> {
    let mut header = RecordHeader::new_zeroed();
    reader.read_exact(header.as_mut_bytes())?;

    let length = u16::from_be_bytes(header.length) as usize;
    if length > Record::MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::InvalidRecordLength { length, max: Record::MAX_PAYLOAD_SIZE });
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload)?;

    Ok(Record {
        protocol_version: header.protocol_version,
        record_type: header.record_type,
        payload: Bytes::from(payload),
    })
}

/// Write one record to a blocking writer.
pub fn write_record(writer: &mut impl Write, record: &Record) -> Result<()> {
    writer.write_all(&record.to_bytes())?;
    Ok(())
}
