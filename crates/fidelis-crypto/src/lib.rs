//! # fidelis-crypto
//!
//! Cryptographic primitives for the Fidelis federation.
//!
//! - **BLAKE3** for hashing and identifier derivation
//! - **Ed25519** for message and vote signatures
//! - **bincode** as the canonical encoding that signatures are computed over
//!
//! ## Security
//!
//! Secret key material is zeroized on drop.
//! Hash comparisons use constant-time operations via `subtle`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonical;
pub mod error;
pub mod hash;
pub mod signing;

#[cfg(test)]
mod proptests;

pub use canonical::{canonical_bytes, canonical_hash, decode_bounded};
pub use error::{CryptoError, Result};
pub use hash::Hash256;
pub use signing::{PublicKey, Signature, SigningKeyPair, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
