//! Immutable entity index.
//!
//! An index is built once per successful refresh and never changed. Readers
//! hold an `Arc` to the index they started with, so a concurrent publish never
//! affects a query in progress.
//!
//! An index built with validity enforcement also remembers each entity's
//! effective `validUntil` (its own bound or an enclosing group's, whichever
//! ends first). Queries skip entities whose window has closed since the index
//! was built, so an expired entity is never returned even while the source
//! itself is unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::criteria::{CriteriaSet, Criterion};
use crate::metadata::{EntityDescriptor, FlattenedEntity, RoleDescriptor, RoleKind};

/// Entity lookup structure.
#[derive(Debug, Default)]
pub struct EntityIndex {
    by_id: HashMap<String, Arc<EntityDescriptor>>,
    by_role: HashMap<RoleKind, Vec<Arc<EntityDescriptor>>>,
    ordered: Vec<Arc<EntityDescriptor>>,
    expires: HashMap<String, DateTime<Utc>>,
    enforce_validity: bool,
}

impl EntityIndex {
    /// An index with no entities.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an index from entities in document order.
    ///
    /// When an identifier appears more than once, the first occurrence wins.
    pub fn build(entities: impl IntoIterator<Item = EntityDescriptor>) -> Self {
        let mut index = Self::default();
        for entity in entities {
            index.insert(Arc::new(entity), None);
        }
        index
    }

    /// Build an index from flattened entities, keeping their effective
    /// validity.
    ///
    /// With `require_valid`, queries never return an entity whose effective
    /// `validUntil` has passed.
    pub fn from_flattened(
        entities: impl IntoIterator<Item = FlattenedEntity>,
        require_valid: bool,
    ) -> Self {
        let mut index = Self {
            enforce_validity: require_valid,
            ..Self::default()
        };
        for flat in entities {
            index.insert(Arc::new(flat.entity), flat.effective_valid_until);
        }
        index
    }

    fn insert(&mut self, entity: Arc<EntityDescriptor>, valid_until: Option<DateTime<Utc>>) {
        if self.by_id.contains_key(&entity.entity_id) {
            warn!(entity_id = %entity.entity_id, "Duplicate entity descriptor ignored");
            return;
        }

        let mut kinds: Vec<RoleKind> = entity.roles.iter().map(|r| r.kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        for kind in kinds {
            self.by_role.entry(kind).or_default().push(Arc::clone(&entity));
        }
        if let Some(until) = valid_until {
            self.expires.insert(entity.entity_id.clone(), until);
        }
        self.by_id.insert(entity.entity_id.clone(), Arc::clone(&entity));
        self.ordered.push(entity);
    }

    /// Check if queries at `now` may return the entity.
    ///
    /// Always true for an index that does not enforce validity.
    #[must_use]
    pub fn is_current(&self, entity_id: &str, now: DateTime<Utc>) -> bool {
        !self.enforce_validity || self.expires.get(entity_id).map_or(true, |until| now < *until)
    }

    /// A copy of this index without the entities that expired by `now`.
    ///
    /// Returns `None` when nothing would be removed, including when the index
    /// does not enforce validity.
    #[must_use]
    pub fn without_expired(&self, now: DateTime<Utc>) -> Option<Self> {
        if self.ordered.iter().all(|e| self.is_current(&e.entity_id, now)) {
            return None;
        }

        let mut pruned = Self {
            enforce_validity: self.enforce_validity,
            ..Self::default()
        };
        for entity in self.ordered.iter().filter(|e| self.is_current(&e.entity_id, now)) {
            let until = self.expires.get(&entity.entity_id).copied();
            pruned.insert(Arc::clone(entity), until);
        }
        Some(pruned)
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Check if the index has no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Look up an entity by identifier.
    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<&Arc<EntityDescriptor>> {
        self.by_id
            .get(entity_id)
            .filter(|_| self.is_current(entity_id, Utc::now()))
    }

    /// All entities in document order.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.ordered.iter()
    }

    /// Lazily iterate the entities of `index` matching `criteria`.
    ///
    /// The iterator keeps `index` alive. An empty criteria set matches nothing;
    /// callers that must reject it check before calling.
    #[must_use]
    pub fn query(index: Arc<EntityIndex>, criteria: CriteriaSet) -> Resolved {
        let candidates = if criteria.is_empty() {
            Candidates::None
        } else if let Some(id) = criteria.entity_ids().next() {
            Candidates::Single(index.by_id.get(id).cloned())
        } else if let Some(kind) = criteria.roles().next() {
            Candidates::Role { kind, pos: 0 }
        } else {
            Candidates::All { pos: 0 }
        };

        Resolved {
            index,
            criteria,
            candidates,
            now: Utc::now(),
        }
    }
}

/// Check if an entity satisfies every criterion.
#[must_use]
pub fn matches(entity: &EntityDescriptor, criteria: &CriteriaSet) -> bool {
    let role_kinds: Vec<RoleKind> = criteria.roles().collect();
    let in_scope = |role: &&RoleDescriptor| role_kinds.is_empty() || role_kinds.contains(&role.kind);

    criteria.iter().all(|criterion| match criterion {
        Criterion::EntityId(id) => entity.entity_id == *id,
        Criterion::Role(kind) => entity.roles.iter().any(|r| r.kind == *kind),
        Criterion::Protocol(protocol) => entity
            .roles
            .iter()
            .filter(in_scope)
            .any(|r| r.supports_protocol(protocol)),
        Criterion::Usage(usage) => entity
            .roles
            .iter()
            .filter(in_scope)
            .any(|r| r.keys_for(*usage).next().is_some()),
    })
}

enum Candidates {
    None,
    Single(Option<Arc<EntityDescriptor>>),
    Role { kind: RoleKind, pos: usize },
    All { pos: usize },
}

/// Lazy iterator over matching entities, in document order.
pub struct Resolved {
    index: Arc<EntityIndex>,
    criteria: CriteriaSet,
    candidates: Candidates,
    now: DateTime<Utc>,
}

impl Resolved {
    /// The index snapshot this iterator reads.
    #[must_use]
    pub fn snapshot(&self) -> &Arc<EntityIndex> {
        &self.index
    }

    fn next_candidate(&mut self) -> Option<Arc<EntityDescriptor>> {
        match &mut self.candidates {
            Candidates::None => None,
            Candidates::Single(entity) => entity.take(),
            Candidates::Role { kind, pos } => {
                let list = self.index.by_role.get(kind)?;
                let entity = list.get(*pos).cloned();
                *pos += 1;
                entity
            },
            Candidates::All { pos } => {
                let entity = self.index.ordered.get(*pos).cloned();
                *pos += 1;
                entity
            },
        }
    }
}

impl Iterator for Resolved {
    type Item = Arc<EntityDescriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(entity) = self.next_candidate() {
            if self.index.is_current(&entity.entity_id, self.now) && matches(&entity, &self.criteria) {
                return Some(entity);
            }
        }
        None
    }
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("criteria", &self.criteria)
            .field("index_len", &self.index.len())
            .finish_non_exhaustive()
    }
}
