//! Fuzz target for decoding gossip payloads.
//!
//! Tests that arbitrary payload bytes never panic the decoder or the event
//! hashing that follows a successful decode.

#![no_main]

use fidelis_core::FederationMessage;
use fidelis_crypto::decode_bounded;
use fidelis_net::MAX_PAYLOAD_SIZE;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(FederationMessage::Submission(submission)) = decode_bounded::<FederationMessage>(data, MAX_PAYLOAD_SIZE) {
        let _ = submission.event.event_hash();
        for attestation in &submission.attestations {
            let _ = attestation.signing_payload();
        }
    }
});
