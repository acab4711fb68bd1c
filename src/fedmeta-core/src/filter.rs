//! Post-parse metadata filters.
//!
//! Filters run in order between parsing and indexing. A filter may drop
//! individual entities, which is reported through [`FilterOutcome::rejected`]
//! and never fails the refresh, or reject the whole document, which fails the
//! refresh the same way a parse error does.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;

use crate::error::MetadataError;
use crate::metadata::{MetadataDocument, RoleKind};

/// Result of running a filter.
#[derive(Debug)]
pub struct FilterOutcome {
    /// The document after filtering.
    pub document: MetadataDocument,
    /// Entities the filter removed, as `MetadataError::Validation`.
    pub rejected: Vec<MetadataError>,
}

impl FilterOutcome {
    /// An outcome that removed nothing.
    #[must_use]
    pub fn unchanged(document: MetadataDocument) -> Self {
        Self {
            document,
            rejected: Vec::new(),
        }
    }
}

/// A post-parse processing stage.
pub trait MetadataFilter: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Filter a document.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::DocumentRejected` to reject the whole document.
    fn filter(&self, document: MetadataDocument) -> Result<FilterOutcome, MetadataError>;
}

/// Requires a top-level `validUntil` no further away than a maximum interval.
#[derive(Debug, Clone)]
pub struct RequiredValidUntilFilter {
    max_validity_interval: Option<Duration>,
}

impl RequiredValidUntilFilter {
    /// Require a `validUntil` at most `max_validity_interval` in the future.
    #[must_use]
    pub fn new(max_validity_interval: Duration) -> Self {
        Self {
            max_validity_interval: Some(max_validity_interval),
        }
    }

    /// Require a `validUntil` without bounding how far away it is.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            max_validity_interval: None,
        }
    }
}

impl MetadataFilter for RequiredValidUntilFilter {
    fn name(&self) -> &'static str {
        "required-valid-until"
    }

    fn filter(&self, document: MetadataDocument) -> Result<FilterOutcome, MetadataError> {
        let Some(valid_until) = document.valid_until() else {
            return Err(MetadataError::DocumentRejected {
                reason: "metadata does not declare validUntil".into(),
            });
        };

        if let Some(max) = self.max_validity_interval {
            let limit = chrono::Duration::from_std(max)
                .ok()
                .and_then(|max| Utc::now().checked_add_signed(max));
            if limit.is_some_and(|limit| valid_until > limit) {
                return Err(MetadataError::DocumentRejected {
                    reason: format!(
                        "validUntil {valid_until} is more than {}s in the future",
                        max.as_secs()
                    ),
                });
            }
        }

        Ok(FilterOutcome::unchanged(document))
    }
}

/// Keeps only the listed roles; entities left without roles are dropped.
#[derive(Debug, Clone)]
pub struct EntityRoleFilter {
    retained_roles: BTreeSet<RoleKind>,
}

impl EntityRoleFilter {
    /// Retain the given roles.
    pub fn new(retained_roles: impl IntoIterator<Item = RoleKind>) -> Self {
        Self {
            retained_roles: retained_roles.into_iter().collect(),
        }
    }
}

impl MetadataFilter for EntityRoleFilter {
    fn name(&self) -> &'static str {
        "entity-role"
    }

    fn filter(&self, mut document: MetadataDocument) -> Result<FilterOutcome, MetadataError> {
        let mut rejected = Vec::new();
        document.retain_entities(|entity| {
            entity
                .roles
                .retain(|role| self.retained_roles.contains(&role.kind));
            if entity.roles.is_empty() {
                rejected.push(MetadataError::Validation {
                    entity_id: entity.entity_id.clone(),
                    reason: "no retained roles".into(),
                });
                false
            } else {
                true
            }
        });

        Ok(FilterOutcome { document, rejected })
    }
}
