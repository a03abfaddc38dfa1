//! Fuzz target for SignedEnvelope::from_bytes.
//!
//! Tests that decoding arbitrary gossip frames is handled safely.

#![no_main]

use fidelis_net::{SignedEnvelope, MAX_ENVELOPE_SIZE};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Should decode well-formed frames, reject the rest - never panic
    if let Ok(envelope) = SignedEnvelope::from_bytes(data, MAX_ENVELOPE_SIZE) {
        let _ = envelope.hash_matches();

        // Re-encoding a decoded frame must decode to the same envelope
        let bytes = envelope.to_bytes().unwrap();
        let roundtrip = SignedEnvelope::from_bytes(&bytes, MAX_ENVELOPE_SIZE).unwrap();
        assert_eq!(envelope, roundtrip);
    }
});
