//! Trusted credentials and the resolvers that supply them.

use std::sync::Arc;

use fedmeta_crypto::{key_fingerprint, SignatureAlgorithm};
use tracing::debug;

use crate::criteria::{CriteriaSet, Criterion};
use crate::error::TrustError;
use crate::metadata::{KeyDescriptor, KeyUsage};
use crate::resolver::MetadataResolver;

/// A verification key with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Entity the key belongs to.
    pub entity_id: Option<String>,
    /// Key name.
    pub key_name: Option<String>,
    /// Intended use.
    pub usage: KeyUsage,
    /// Signature algorithm.
    pub algorithm: SignatureAlgorithm,
    /// Raw public key bytes.
    pub public_key: Vec<u8>,
}

impl Credential {
    /// A signing credential.
    #[must_use]
    pub fn signing(algorithm: SignatureAlgorithm, public_key: impl Into<Vec<u8>>) -> Self {
        Self {
            entity_id: None,
            key_name: None,
            usage: KeyUsage::Signing,
            algorithm,
            public_key: public_key.into(),
        }
    }

    /// Set the owning entity.
    #[must_use]
    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Credential for a metadata key of `entity_id`.
    #[must_use]
    pub fn from_key(entity_id: &str, key: &KeyDescriptor) -> Self {
        Self {
            entity_id: Some(entity_id.to_owned()),
            key_name: key.key_name.clone(),
            usage: key.usage,
            algorithm: key.algorithm,
            public_key: key.public_key.clone(),
        }
    }

    /// Fingerprint of the public key, for logs.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        key_fingerprint(&self.public_key)
    }

    /// Check if the credential satisfies the entity and usage criteria.
    ///
    /// Criteria the credential cannot be judged by are ignored.
    #[must_use]
    pub fn matches(&self, criteria: &CriteriaSet) -> bool {
        criteria.iter().all(|criterion| match criterion {
            Criterion::EntityId(id) => self.entity_id.as_deref() == Some(id.as_str()),
            Criterion::Usage(usage) => self.usage.satisfies(*usage),
            Criterion::Role(_) | Criterion::Protocol(_) => true,
        })
    }
}

/// Supplies trusted credentials for a criteria set.
pub trait CredentialResolver: Send + Sync {
    /// Resolve the credentials matching `criteria`.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::CredentialResolution` if the credentials cannot
    /// be determined. An empty result is not an error.
    fn resolve(&self, criteria: &CriteriaSet) -> Result<Vec<Credential>, TrustError>;
}

/// Resolver over a fixed list of credentials.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialResolver {
    credentials: Vec<Credential>,
}

impl StaticCredentialResolver {
    /// Create a resolver over `credentials`.
    pub fn new(credentials: impl IntoIterator<Item = Credential>) -> Self {
        Self {
            credentials: credentials.into_iter().collect(),
        }
    }
}

impl CredentialResolver for StaticCredentialResolver {
    fn resolve(&self, criteria: &CriteriaSet) -> Result<Vec<Credential>, TrustError> {
        Ok(self
            .credentials
            .iter()
            .filter(|c| c.matches(criteria))
            .cloned()
            .collect())
    }
}

/// Resolver that draws keys from resolved metadata.
///
/// Requires an `EntityId` criterion. Keys come from the entity's roles,
/// restricted to the `Role` criteria if any are given, with the requested
/// usage.
#[derive(Debug, Clone)]
pub struct MetadataCredentialResolver {
    metadata: Arc<MetadataResolver>,
}

impl MetadataCredentialResolver {
    /// Create a resolver backed by `metadata`.
    #[must_use]
    pub fn new(metadata: Arc<MetadataResolver>) -> Self {
        Self { metadata }
    }
}

impl CredentialResolver for MetadataCredentialResolver {
    fn resolve(&self, criteria: &CriteriaSet) -> Result<Vec<Credential>, TrustError> {
        let Some(entity_id) = criteria.entity_ids().next() else {
            return Err(TrustError::CredentialResolution {
                message: "metadata credentials require an entityID criterion".into(),
            });
        };

        let lookup = CriteriaSet::entity_id(entity_id);
        let Some(entity) = self.metadata.resolve_single(&lookup)? else {
            debug!(entity_id, "No metadata for entity; no trusted credentials");
            return Ok(Vec::new());
        };

        let usage = criteria.usage().unwrap_or(KeyUsage::Signing);
        let roles: Vec<_> = criteria.roles().collect();
        let credentials: Vec<Credential> = entity
            .roles
            .iter()
            .filter(|r| roles.is_empty() || roles.contains(&r.kind))
            .flat_map(|r| r.keys_for(usage))
            .map(|k| Credential::from_key(&entity.entity_id, k))
            .collect();

        debug!(entity_id, count = credentials.len(), "Resolved metadata credentials");
        Ok(credentials)
    }
}
