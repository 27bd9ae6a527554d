//! Fuzz target for Record::decode and read_record
//!
//! Records are decoded from the plaintext of opened frames, which a peer
//! controls completely.
//!
//! # Invariants
//!
//! - Never panics; oversized length fields return an error
//! - A decoded record occupies header + payload bytes, no more than given
//! - Re-encoding a decoded record reproduces the consumed bytes
//! - The blocking reader agrees with the buffer decoder

#![no_main]

use std::io::Cursor;

use libfuzzer_sys::fuzz_target;
use veilframe_proto::{Record, read_record};

fuzz_target!(|data: &[u8]| {
    let decoded = Record::decode(data);
    let read = read_record(&mut Cursor::new(data));

    match decoded {
        Ok(Some((record, used))) => {
            assert!(used <= data.len());
            assert_eq!(used, Record::HEADER_SIZE + record.payload().len());
            assert!(record.payload().len() <= Record::MAX_PAYLOAD_SIZE);
            assert_eq!(record.to_bytes(), &data[..used]);
            assert_eq!(read.ok(), Some(record));
        },
        Ok(None) => assert!(read.is_err()),
        Err(_) => assert!(read.is_err()),
    }
});
