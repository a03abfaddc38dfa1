//! Entity records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use fidelis_crypto::PublicKey;

use crate::{EntityId, IdentityError, Result};

/// Maximum length of a society name in bytes.
pub const MAX_SOCIETY_NAME_LEN: usize = 64;

/// The kind of participant an entity represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// A human participant.
    Human,
    /// An autonomous software agent.
    SoftwareAgent,
    /// An agent bound to a hardware device.
    HardwareAgent,
    /// An organization acting as a single party.
    Organization,
    /// A role that other entities can occupy.
    Role,
    /// A shared resource.
    Resource,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Human => "human",
            Self::SoftwareAgent => "software-agent",
            Self::HardwareAgent => "hardware-agent",
            Self::Organization => "organization",
            Self::Role => "role",
            Self::Resource => "resource",
        };
        f.write_str(name)
    }
}

/// A society grouping. Witness diversity is measured across societies.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SocietyId(String);

impl SocietyId {
    /// Create a society id.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidSociety` if the name is empty or longer
    /// than [`MAX_SOCIETY_NAME_LEN`].
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(IdentityError::InvalidSociety {
                reason: "name is empty".into(),
            });
        }
        if name.len() > MAX_SOCIETY_NAME_LEN {
            return Err(IdentityError::InvalidSociety {
                reason: format!("name exceeds {} bytes", MAX_SOCIETY_NAME_LEN),
            });
        }
        Ok(Self(name))
    }

    /// The society name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SocietyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered participant.
///
/// Every field is fixed at creation except `revoked_at`, which moves from
/// `None` to `Some` exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    id: EntityId,
    public_key: PublicKey,
    kind: EntityKind,
    society: SocietyId,
    created_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

impl Entity {
    /// Build a new, unrevoked entity record for a public key.
    #[must_use]
    pub fn new(
        public_key: PublicKey,
        kind: EntityKind,
        society: SocietyId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntityId::from_public_key(&public_key),
            public_key,
            kind,
            society,
            created_at,
            revoked_at: None,
        }
    }

    /// The entity id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// The entity's verification key.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The entity kind.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// The society this entity belongs to.
    #[must_use]
    pub fn society(&self) -> &SocietyId {
        &self.society
    }

    /// Creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Revocation time, if revoked.
    #[must_use]
    pub fn revoked_at(&self) -> Option<DateTime<Utc>> {
        self.revoked_at
    }

    /// Whether the entity is revoked.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Check that the id matches the public key.
    pub(crate) fn check_binding(&self) -> Result<()> {
        if EntityId::from_public_key(&self.public_key) != self.id {
            return Err(IdentityError::KeyMismatch { claimed: self.id });
        }
        Ok(())
    }

    /// Mark revoked. Returns `false` if it was already revoked.
    pub(crate) fn revoke(&mut self, at: DateTime<Utc>) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        self.revoked_at = Some(at);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fidelis_crypto::SigningKeyPair;

    #[test]
    fn test_society_validation() {
        assert!(SocietyId::new("alpha").is_ok());
        assert!(SocietyId::new("   ").is_err());
        assert!(SocietyId::new("x".repeat(MAX_SOCIETY_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_new_entity_is_bound_and_unrevoked() {
        let keypair = SigningKeyPair::generate();
        let entity = Entity::new(
            *keypair.public_key(),
            EntityKind::SoftwareAgent,
            SocietyId::new("alpha").unwrap(),
            Utc::now(),
        );
        assert!(entity.check_binding().is_ok());
        assert!(!entity.is_revoked());
        assert_eq!(entity.kind(), EntityKind::SoftwareAgent);
    }

    #[test]
    fn test_revoke_is_one_way() {
        let keypair = SigningKeyPair::generate();
        let mut entity = Entity::new(
            *keypair.public_key(),
            EntityKind::Human,
            SocietyId::new("beta").unwrap(),
            Utc::now(),
        );
        let first = Utc::now();
        assert!(entity.revoke(first));
        assert!(!entity.revoke(first + chrono::Duration::seconds(5)));
        assert_eq!(entity.revoked_at(), Some(first));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(EntityKind::HardwareAgent.to_string(), "hardware-agent");
        assert_eq!(EntityKind::Organization.to_string(), "organization");
    }
}
