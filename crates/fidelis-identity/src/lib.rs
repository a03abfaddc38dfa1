//! # fidelis-identity
//!
//! Signature and identity layer for the Fidelis federation.
//!
//! Provides:
//! - Entity identifiers derived from Ed25519 public keys
//! - Entity records (kind, society, creation time, revocation)
//! - Entity keypairs for signing
//! - A registry with one-way revocation and the [`KeyDirectory`] lookup
//!   trait used by every other component to verify signatures

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod entity;
pub mod entity_id;
pub mod error;
pub mod keypair;
pub mod registry;

#[cfg(test)]
mod proptests;

pub use entity::{Entity, EntityKind, SocietyId};
pub use entity_id::EntityId;
pub use error::{IdentityError, Result};
pub use keypair::EntityKeyPair;
pub use registry::{EntityRegistry, KeyDirectory, SharedRegistry};
