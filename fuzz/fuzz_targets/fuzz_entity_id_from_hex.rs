//! Fuzz target for EntityId::from_hex.
//!
//! Tests that parsing arbitrary strings as hex entity ids is handled safely.

#![no_main]

use fidelis_identity::EntityId;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Should succeed for valid 64-char hex, fail otherwise - never panic
        if let Ok(id) = EntityId::from_hex(s) {
            let roundtrip = EntityId::from_hex(&id.to_hex()).unwrap();
            assert_eq!(id, roundtrip);
        }
    }
});
