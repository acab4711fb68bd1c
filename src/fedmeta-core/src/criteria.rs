//! Lookup criteria.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::MetadataError;
use crate::metadata::{KeyUsage, RoleKind};

/// A single lookup constraint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Criterion {
    /// Entity identifier.
    EntityId(String),
    /// Role the entity must play.
    Role(RoleKind),
    /// Protocol a matching role must support.
    Protocol(String),
    /// Key usage a matching role must publish a key for.
    Usage(KeyUsage),
}

impl Criterion {
    /// Build a criterion from its name and textual value.
    ///
    /// Recognized names are `entityID`, `role`, `protocol` and `usage`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCriterion` for other names and `InvalidCriterion` for
    /// values that cannot be interpreted.
    pub fn from_pair(name: &str, value: &str) -> Result<Self, MetadataError> {
        let invalid = || MetadataError::InvalidCriterion {
            name: name.into(),
            value: value.into(),
        };
        match name {
            "entityID" => {
                if value.is_empty() {
                    return Err(invalid());
                }
                Ok(Self::EntityId(value.into()))
            },
            "role" => value.parse().map(Self::Role).map_err(|_| invalid()),
            "protocol" => {
                if value.is_empty() {
                    return Err(invalid());
                }
                Ok(Self::Protocol(value.into()))
            },
            "usage" => value.parse().map(Self::Usage).map_err(|_| invalid()),
            _ => Err(MetadataError::UnknownCriterion { name: name.into() }),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntityId(id) => write!(f, "entityID={id}"),
            Self::Role(kind) => write!(f, "role={kind}"),
            Self::Protocol(p) => write!(f, "protocol={p}"),
            Self::Usage(u) => write!(f, "usage={u}"),
        }
    }
}

/// An unordered set of criteria, all of which must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CriteriaSet {
    criteria: BTreeSet<Criterion>,
}

impl CriteriaSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set matching a single entity identifier.
    #[must_use]
    pub fn entity_id(id: impl Into<String>) -> Self {
        Self::new().with(Criterion::EntityId(id.into()))
    }

    /// Build a set from `(name, value)` pairs.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`Criterion::from_pair`].
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, MetadataError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        pairs
            .into_iter()
            .map(|(name, value)| Criterion::from_pair(name, value))
            .collect::<Result<BTreeSet<_>, _>>()
            .map(|criteria| Self { criteria })
    }

    /// Add a criterion.
    #[must_use]
    pub fn with(mut self, criterion: Criterion) -> Self {
        self.criteria.insert(criterion);
        self
    }

    /// Add a criterion in place.
    pub fn insert(&mut self, criterion: Criterion) -> bool {
        self.criteria.insert(criterion)
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// Number of criteria.
    #[must_use]
    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    /// Iterate over the criteria.
    pub fn iter(&self) -> impl Iterator<Item = &Criterion> {
        self.criteria.iter()
    }

    /// Entity identifiers named by the set.
    pub fn entity_ids(&self) -> impl Iterator<Item = &str> {
        self.criteria.iter().filter_map(|c| match c {
            Criterion::EntityId(id) => Some(id.as_str()),
            _ => None,
        })
    }

    /// Roles named by the set.
    pub fn roles(&self) -> impl Iterator<Item = RoleKind> + '_ {
        self.criteria.iter().filter_map(|c| match c {
            Criterion::Role(kind) => Some(*kind),
            _ => None,
        })
    }

    /// Key usage named by the set, if exactly one is.
    #[must_use]
    pub fn usage(&self) -> Option<KeyUsage> {
        let mut usages = self.criteria.iter().filter_map(|c| match c {
            Criterion::Usage(u) => Some(*u),
            _ => None,
        });
        let first = usages.next()?;
        usages.next().is_none().then_some(first)
    }

    /// Check if the set names an entity identifier.
    #[must_use]
    pub fn has_entity_id(&self) -> bool {
        self.entity_ids().next().is_some()
    }

    /// Fail with `EmptyCriteria` if the set is empty.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::EmptyCriteria` for an empty set.
    pub fn ensure_not_empty(&self) -> Result<(), MetadataError> {
        if self.is_empty() {
            Err(MetadataError::EmptyCriteria)
        } else {
            Ok(())
        }
    }
}

impl FromIterator<Criterion> for CriteriaSet {
    fn from_iter<T: IntoIterator<Item = Criterion>>(iter: T) -> Self {
        Self {
            criteria: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for CriteriaSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, c) in self.criteria.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{c}")?;
        }
        f.write_str("}")
    }
}
