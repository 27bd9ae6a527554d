//! Fuzz target for persisted key records
//!
//! Key records come back from storage that may be damaged or tampered with.
//!
//! # Invariants
//!
//! - CBOR decoding never panics and never allocates from claimed lengths
//! - Restoring a decoded record either succeeds or reports corruption
//! - A restored key set round-trips to an equivalent record

#![no_main]

use libfuzzer_sys::fuzz_target;
use veilframe_core::{StoreError, TransportKeyRecord, TransportKeySet};

fuzz_target!(|data: &[u8]| {
    let Ok(record) = TransportKeyRecord::from_cbor(data) else {
        return;
    };

    match TransportKeySet::from_record(&record) {
        Ok(set) => {
            let restored = set.to_record();
            assert_eq!(restored.base_period, record.base_period);
            assert_eq!(restored.periods, record.periods);
            assert_eq!(restored.next_connection_number, record.next_connection_number);
        },
        Err(StoreError::Corrupt { .. }) => {},
        Err(other) => panic!("unexpected error restoring a decoded record: {other}"),
    }
});
