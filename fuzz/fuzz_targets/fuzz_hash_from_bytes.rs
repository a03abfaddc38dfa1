//! Fuzz target for Hash256::from_bytes.
//!
//! Tests that parsing arbitrary bytes as a hash is handled safely.

#![no_main]

use fidelis_crypto::Hash256;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Should succeed for exactly 32 bytes, fail otherwise - never panic
    if let Ok(hash) = Hash256::from_bytes(data) {
        assert_eq!(hash.as_bytes().len(), 32);
        let roundtrip = Hash256::from_bytes(hash.as_bytes()).unwrap();
        assert_eq!(hash, roundtrip);
    }
});
