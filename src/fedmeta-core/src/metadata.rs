//! Federation metadata model and parsing.
//!
//! A metadata document is either a single [`EntityDescriptor`] or an
//! [`EntitiesGroup`] that nests entities and further groups. Validity declared
//! on a group applies to everything inside it.
//!
//! Parsing is behind the [`MetadataParser`] trait; [`JsonMetadataParser`]
//! reads the JSON document format:
//!
//! ```json
//! {
//!   "name": "example-federation",
//!   "validUntil": "2030-01-01T00:00:00Z",
//!   "cacheDuration": 21600,
//!   "entities": [
//!     {
//!       "entityID": "https://idp.example.org",
//!       "roles": [
//!         {
//!           "kind": "idpSso",
//!           "protocols": ["urn:oasis:names:tc:SAML:2.0:protocol"],
//!           "keys": [{ "use": "signing", "algorithm": "ed25519", "publicKey": "..." }]
//!         }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use fedmeta_crypto::SignatureAlgorithm;
use serde::{Deserialize, Serialize};

use crate::error::MetadataError;

/// Kind of role an entity plays in the federation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoleKind {
    /// Identity provider single sign-on service.
    IdpSso,
    /// Service provider single sign-on service.
    SpSso,
    /// Attribute authority.
    AttributeAuthority,
    /// Authentication authority.
    AuthnAuthority,
    /// Policy decision point.
    Pdp,
}

impl RoleKind {
    /// All role kinds.
    pub const ALL: [RoleKind; 5] = [
        Self::IdpSso,
        Self::SpSso,
        Self::AttributeAuthority,
        Self::AuthnAuthority,
        Self::Pdp,
    ];

    /// Name used in metadata documents.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::IdpSso => "idpSso",
            Self::SpSso => "spSso",
            Self::AttributeAuthority => "attributeAuthority",
            Self::AuthnAuthority => "authnAuthority",
            Self::Pdp => "pdp",
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleKind {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| MetadataError::InvalidCriterion {
                name: "role".into(),
                value: s.into(),
            })
    }
}

/// Intended use of a key.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum KeyUsage {
    /// Key verifies signatures.
    Signing,
    /// Key encrypts data.
    Encryption,
    /// Usage not declared; the key serves any purpose.
    #[default]
    Unspecified,
}

impl KeyUsage {
    /// Name used in metadata documents.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Signing => "signing",
            Self::Encryption => "encryption",
            Self::Unspecified => "unspecified",
        }
    }

    /// Check if a key with this usage may serve `requested`.
    ///
    /// Keys without a declared usage serve every purpose.
    #[must_use]
    pub fn satisfies(&self, requested: KeyUsage) -> bool {
        *self == KeyUsage::Unspecified || *self == requested
    }
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyUsage {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "signing" => Ok(Self::Signing),
            "encryption" => Ok(Self::Encryption),
            "unspecified" => Ok(Self::Unspecified),
            _ => Err(MetadataError::InvalidCriterion {
                name: "usage".into(),
                value: s.into(),
            }),
        }
    }
}

/// Public key published for a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescriptor {
    /// Intended use.
    pub usage: KeyUsage,
    /// Signature algorithm of the key.
    pub algorithm: SignatureAlgorithm,
    /// Raw public key bytes.
    pub public_key: Vec<u8>,
    /// Optional key name.
    pub key_name: Option<String>,
}

/// Protocol endpoint of a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Protocol binding identifier.
    pub binding: String,
    /// Endpoint URL.
    pub location: String,
}

/// One role of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDescriptor {
    /// Role kind.
    pub kind: RoleKind,
    /// Supported protocol identifiers.
    pub protocols: Vec<String>,
    /// Published keys.
    pub keys: Vec<KeyDescriptor>,
    /// Protocol endpoints.
    pub endpoints: Vec<Endpoint>,
}

impl RoleDescriptor {
    /// Check if this role supports a protocol.
    #[must_use]
    pub fn supports_protocol(&self, protocol: &str) -> bool {
        self.protocols.iter().any(|p| p == protocol)
    }

    /// Keys that may serve `usage`.
    pub fn keys_for(&self, usage: KeyUsage) -> impl Iterator<Item = &KeyDescriptor> {
        self.keys.iter().filter(move |k| k.usage.satisfies(usage))
    }
}

/// A federation participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Unique entity identifier.
    pub entity_id: String,
    /// End of the validity window declared on the entity itself.
    pub valid_until: Option<DateTime<Utc>>,
    /// How long the entity may be cached.
    pub cache_duration: Option<Duration>,
    /// Roles the entity plays.
    pub roles: Vec<RoleDescriptor>,
    /// Organization display name.
    pub organization: Option<String>,
}

impl EntityDescriptor {
    /// Roles of a given kind.
    pub fn roles_of(&self, kind: RoleKind) -> impl Iterator<Item = &RoleDescriptor> {
        self.roles.iter().filter(move |r| r.kind == kind)
    }

    /// Check if the entity's own validity window contains `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.map_or(true, |until| now < until)
    }
}

/// A named group of entities and nested groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitiesGroup {
    /// Group name.
    pub name: Option<String>,
    /// End of the validity window for everything in the group.
    pub valid_until: Option<DateTime<Utc>>,
    /// How long the group may be cached.
    pub cache_duration: Option<Duration>,
    /// Entities directly in this group.
    pub entities: Vec<EntityDescriptor>,
    /// Nested groups.
    pub groups: Vec<EntitiesGroup>,
}

/// An entity together with the validity it inherits from its groups.
#[derive(Debug, Clone)]
pub struct FlattenedEntity {
    /// The entity.
    pub entity: EntityDescriptor,
    /// Earliest `valid_until` of the entity and every enclosing group.
    pub effective_valid_until: Option<DateTime<Utc>>,
}

impl FlattenedEntity {
    /// Check if the entity and all enclosing groups are valid at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.effective_valid_until.map_or(true, |until| now < until)
    }
}

/// A parsed metadata document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataDocument {
    /// A single entity.
    Entity(EntityDescriptor),
    /// A group of entities.
    Group(EntitiesGroup),
}

impl MetadataDocument {
    /// Validity end declared at the top level of the document.
    #[must_use]
    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Entity(e) => e.valid_until,
            Self::Group(g) => g.valid_until,
        }
    }

    /// Number of entities, including nested groups.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        fn count(group: &EntitiesGroup) -> usize {
            group.entities.len() + group.groups.iter().map(count).sum::<usize>()
        }
        match self {
            Self::Entity(_) => 1,
            Self::Group(g) => count(g),
        }
    }

    /// Earliest point at which any part of the document expires.
    ///
    /// Considers every `valid_until` and `now + cache_duration` of groups and
    /// entities. `None` if the document declares neither.
    #[must_use]
    pub fn earliest_expiration(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        fn expiry(
            now: DateTime<Utc>,
            valid_until: Option<DateTime<Utc>>,
            cache_duration: Option<Duration>,
        ) -> Option<DateTime<Utc>> {
            let cached = cache_duration
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .and_then(|d| now.checked_add_signed(d));
            earliest(valid_until, cached)
        }

        fn entity_expiry(now: DateTime<Utc>, e: &EntityDescriptor) -> Option<DateTime<Utc>> {
            expiry(now, e.valid_until, e.cache_duration)
        }

        fn group_expiry(now: DateTime<Utc>, g: &EntitiesGroup) -> Option<DateTime<Utc>> {
            let own = expiry(now, g.valid_until, g.cache_duration);
            let entities = g
                .entities
                .iter()
                .fold(own, |acc, e| earliest(acc, entity_expiry(now, e)));
            g.groups
                .iter()
                .fold(entities, |acc, sub| earliest(acc, group_expiry(now, sub)))
        }

        match self {
            Self::Entity(e) => entity_expiry(now, e),
            Self::Group(g) => group_expiry(now, g),
        }
    }

    /// Keep only entities for which `keep` returns true.
    ///
    /// `keep` may also modify the entity it is given. A single-entity document
    /// whose entity is dropped becomes an empty group.
    pub fn retain_entities<F>(&mut self, mut keep: F)
    where
        F: FnMut(&mut EntityDescriptor) -> bool,
    {
        fn retain_in<F: FnMut(&mut EntityDescriptor) -> bool>(group: &mut EntitiesGroup, keep: &mut F) {
            group.entities.retain_mut(|e| keep(e));
            for sub in &mut group.groups {
                retain_in(sub, keep);
            }
        }

        match self {
            Self::Entity(e) => {
                if !keep(e) {
                    *self = Self::Group(EntitiesGroup::default());
                }
            },
            Self::Group(g) => retain_in(g, &mut keep),
        }
    }

    /// All entities in document order with their inherited validity.
    ///
    /// Entities of a group come before those of its nested groups.
    #[must_use]
    pub fn flatten(self) -> Vec<FlattenedEntity> {
        fn walk(group: EntitiesGroup, inherited: Option<DateTime<Utc>>, out: &mut Vec<FlattenedEntity>) {
            let bound = earliest(inherited, group.valid_until);
            for entity in group.entities {
                let effective_valid_until = earliest(bound, entity.valid_until);
                out.push(FlattenedEntity {
                    entity,
                    effective_valid_until,
                });
            }
            for sub in group.groups {
                walk(sub, bound, out);
            }
        }

        match self {
            Self::Entity(entity) => vec![FlattenedEntity {
                effective_valid_until: entity.valid_until,
                entity,
            }],
            Self::Group(group) => {
                let mut out = Vec::new();
                walk(group, None, &mut out);
                out
            },
        }
    }
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Turns raw bytes into a [`MetadataDocument`].
///
/// Implementations must be deterministic and report malformed input as
/// `MetadataError::Parse`.
pub trait MetadataParser: Send + Sync {
    /// Parse a document.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::Parse` if the bytes are not a valid document.
    fn parse(&self, bytes: &[u8]) -> Result<MetadataDocument, MetadataError>;
}

/// Parser for the JSON metadata document format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMetadataParser;

impl JsonMetadataParser {
    /// Create a parser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MetadataParser for JsonMetadataParser {
    fn parse(&self, bytes: &[u8]) -> Result<MetadataDocument, MetadataError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(MetadataError::parse("Metadata document is empty"));
        }

        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| MetadataError::parse(format!("Invalid JSON: {e}")))?;
        if !value.is_object() {
            return Err(MetadataError::parse("Metadata document must be a JSON object"));
        }

        if value.get("entityID").is_some() {
            let raw: RawEntity = serde_json::from_value(value)
                .map_err(|e| MetadataError::parse(format!("Invalid entity descriptor: {e}")))?;
            Ok(MetadataDocument::Entity(raw.into_entity()?))
        } else {
            let raw: RawGroup = serde_json::from_value(value)
                .map_err(|e| MetadataError::parse(format!("Invalid entities group: {e}")))?;
            Ok(MetadataDocument::Group(raw.into_group()?))
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGroup {
    name: Option<String>,
    valid_until: Option<DateTime<Utc>>,
    cache_duration: Option<u64>,
    #[serde(default)]
    entities: Vec<RawEntity>,
    #[serde(default)]
    groups: Vec<RawGroup>,
}

impl RawGroup {
    fn into_group(self) -> Result<EntitiesGroup, MetadataError> {
        Ok(EntitiesGroup {
            name: self.name,
            valid_until: self.valid_until,
            cache_duration: self.cache_duration.map(Duration::from_secs),
            entities: self
                .entities
                .into_iter()
                .map(RawEntity::into_entity)
                .collect::<Result<_, _>>()?,
            groups: self
                .groups
                .into_iter()
                .map(RawGroup::into_group)
                .collect::<Result<_, _>>()?,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntity {
    #[serde(rename = "entityID")]
    entity_id: String,
    valid_until: Option<DateTime<Utc>>,
    cache_duration: Option<u64>,
    organization: Option<String>,
    #[serde(default)]
    roles: Vec<RawRole>,
}

impl RawEntity {
    fn into_entity(self) -> Result<EntityDescriptor, MetadataError> {
        if self.entity_id.trim().is_empty() {
            return Err(MetadataError::parse("entityID must not be empty"));
        }
        let entity_id = self.entity_id;
        let roles = self
            .roles
            .into_iter()
            .map(|r| r.into_role(&entity_id))
            .collect::<Result<_, _>>()?;

        Ok(EntityDescriptor {
            entity_id,
            valid_until: self.valid_until,
            cache_duration: self.cache_duration.map(Duration::from_secs),
            roles,
            organization: self.organization,
        })
    }
}

#[derive(Deserialize)]
struct RawRole {
    kind: RoleKind,
    #[serde(default)]
    protocols: Vec<String>,
    #[serde(default)]
    keys: Vec<RawKey>,
    #[serde(default)]
    endpoints: Vec<Endpoint>,
}

impl RawRole {
    fn into_role(self, entity_id: &str) -> Result<RoleDescriptor, MetadataError> {
        Ok(RoleDescriptor {
            kind: self.kind,
            protocols: self.protocols,
            keys: self
                .keys
                .into_iter()
                .map(|k| k.into_key(entity_id))
                .collect::<Result<_, _>>()?,
            endpoints: self.endpoints,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawKey {
    #[serde(rename = "use", default)]
    usage: KeyUsage,
    algorithm: String,
    public_key: String,
    key_name: Option<String>,
}

impl RawKey {
    fn into_key(self, entity_id: &str) -> Result<KeyDescriptor, MetadataError> {
        let algorithm = self.algorithm.parse::<SignatureAlgorithm>().map_err(|e| {
            MetadataError::parse(format!("Key of '{entity_id}' has unusable algorithm: {e}"))
        })?;
        let public_key = STANDARD.decode(self.public_key.trim()).map_err(|e| {
            MetadataError::parse(format!("Key of '{entity_id}' is not valid base64: {e}"))
        })?;
        if public_key.is_empty() {
            return Err(MetadataError::parse(format!(
                "Key of '{entity_id}' is empty"
            )));
        }

        Ok(KeyDescriptor {
            usage: self.usage,
            algorithm,
            public_key,
            key_name: self.key_name,
        })
    }
}
