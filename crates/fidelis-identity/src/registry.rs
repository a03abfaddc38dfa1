//! Entity registry and key lookup.
//!
//! The registry is the entities table of a node. It is the only place an
//! entity's revocation flag changes, and revocation never reverses.
//!
//! Components that only need to check signatures depend on the
//! [`KeyDirectory`] trait rather than the concrete registry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};
use fidelis_crypto::{PublicKey, Signature};

use crate::{Entity, EntityId, IdentityError, Result, SocietyId};

/// Maximum number of entities a single registry will hold.
pub const MAX_ENTITIES: usize = 1_000_000;

/// Read access to entity keys, revocation state and society membership.
pub trait KeyDirectory: Send + Sync {
    /// Public key for an entity, if registered.
    fn public_key(&self, id: &EntityId) -> Option<PublicKey>;

    /// Whether an entity is revoked. Unknown entities are not revoked.
    fn is_revoked(&self, id: &EntityId) -> bool;

    /// Society of an entity, if registered.
    fn society_of(&self, id: &EntityId) -> Option<SocietyId>;

    /// Whether an entity is registered.
    fn contains(&self, id: &EntityId) -> bool {
        self.public_key(id).is_some()
    }

    /// Verify a signature by a registered entity.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown signers or `Crypto` for a bad signature.
    fn verify(&self, id: &EntityId, message: &[u8], signature: &Signature) -> Result<()> {
        let key = self.public_key(id).ok_or(IdentityError::NotFound(*id))?;
        key.verify(message, signature)?;
        Ok(())
    }

    /// Verify a signature by a registered, unrevoked entity.
    ///
    /// # Errors
    ///
    /// As [`KeyDirectory::verify`], plus `Revoked` for revoked signers.
    fn verify_active(&self, id: &EntityId, message: &[u8], signature: &Signature) -> Result<()> {
        if self.is_revoked(id) {
            return Err(IdentityError::Revoked(*id));
        }
        self.verify(id, message, signature)
    }
}

/// The entities table.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: HashMap<EntityId, Entity>,
}

/// A registry shared between the components of one node.
pub type SharedRegistry = Arc<RwLock<EntityRegistry>>;

impl EntityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a new empty registry for sharing.
    #[must_use]
    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Register an entity.
    ///
    /// # Errors
    ///
    /// - `KeyMismatch` if the record's id is not derived from its key
    /// - `AlreadyExists` if the id is already registered
    /// - `RegistryFull` at capacity
    pub fn register(&mut self, entity: Entity) -> Result<EntityId> {
        entity.check_binding()?;
        let id = entity.id();
        if self.entities.contains_key(&id) {
            return Err(IdentityError::AlreadyExists(id));
        }
        if self.entities.len() >= MAX_ENTITIES {
            return Err(IdentityError::RegistryFull { max: MAX_ENTITIES });
        }
        debug!(entity = %id, kind = %entity.kind(), society = %entity.society(), "Registered entity");
        self.entities.insert(id, entity);
        Ok(id)
    }

    /// Look up an entity.
    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Revoke an entity.
    ///
    /// Returns `Ok(true)` if this call revoked it, `Ok(false)` if it was
    /// already revoked.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown entities.
    pub fn revoke(&mut self, id: &EntityId, at: DateTime<Utc>) -> Result<bool> {
        let entity = self
            .entities
            .get_mut(id)
            .ok_or(IdentityError::NotFound(*id))?;
        let changed = entity.revoke(at);
        if changed {
            info!(entity = %id, "Entity revoked");
        }
        Ok(changed)
    }

    /// Number of registered entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Ids of all unrevoked entities.
    #[must_use]
    pub fn active_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| !e.is_revoked())
            .map(Entity::id)
            .collect();
        ids.sort();
        ids
    }
}

impl KeyDirectory for EntityRegistry {
    fn public_key(&self, id: &EntityId) -> Option<PublicKey> {
        self.entities.get(id).map(|e| *e.public_key())
    }

    fn is_revoked(&self, id: &EntityId) -> bool {
        self.entities.get(id).is_some_and(Entity::is_revoked)
    }

    fn society_of(&self, id: &EntityId) -> Option<SocietyId> {
        self.entities.get(id).map(|e| e.society().clone())
    }
}

impl KeyDirectory for RwLock<EntityRegistry> {
    fn public_key(&self, id: &EntityId) -> Option<PublicKey> {
        self.read().public_key(id)
    }

    fn is_revoked(&self, id: &EntityId) -> bool {
        self.read().is_revoked(id)
    }

    fn society_of(&self, id: &EntityId) -> Option<SocietyId> {
        self.read().society_of(id)
    }
}
