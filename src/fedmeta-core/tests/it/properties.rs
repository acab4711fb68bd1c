//! Property-based tests for entity lookup.
//!
//! Matches are checked against a brute-force oracle written independently of
//! the index.

use std::sync::Arc;

use fedmeta_core::{
    CriteriaSet, Criterion, EntityDescriptor, EntityIndex, KeyDescriptor, KeyUsage, MetadataError,
    MetadataResolver, MetadataSource, ResolverConfig, RoleDescriptor, RoleKind, SignatureAlgorithm,
};
use proptest::prelude::*;
use serde_json::json;

const PROTOCOLS: [&str; 3] = ["urn:p:a", "urn:p:b", "urn:p:c"];
const USAGES: [KeyUsage; 3] = [KeyUsage::Signing, KeyUsage::Encryption, KeyUsage::Unspecified];

#[derive(Debug, Clone)]
struct GenRole {
    kind: RoleKind,
    protocols: Vec<&'static str>,
    usages: Vec<KeyUsage>,
}

#[derive(Debug, Clone)]
struct GenEntity {
    id: String,
    roles: Vec<GenRole>,
}

#[derive(Debug, Clone)]
struct GenCriteria {
    id: Option<String>,
    role: Option<RoleKind>,
    protocol: Option<&'static str>,
    usage: Option<KeyUsage>,
}

fn role_kind() -> impl Strategy<Value = RoleKind> {
    prop::sample::select(RoleKind::ALL.to_vec())
}

fn gen_role() -> impl Strategy<Value = GenRole> {
    (
        role_kind(),
        prop::sample::subsequence(PROTOCOLS.to_vec(), 0..=3),
        prop::sample::subsequence(USAGES.to_vec(), 0..=3),
    )
        .prop_map(|(kind, protocols, usages)| GenRole {
            kind,
            protocols,
            usages,
        })
}

fn gen_entities() -> impl Strategy<Value = Vec<GenEntity>> {
    // Small id space so duplicates occur
    prop::collection::vec(
        (0u8..8, prop::collection::vec(gen_role(), 0..3)).prop_map(|(n, roles)| GenEntity {
            id: format!("https://e{n}.example.org"),
            roles,
        }),
        0..12,
    )
}

fn gen_criteria() -> impl Strategy<Value = GenCriteria> {
    (
        prop::option::of((0u8..8).prop_map(|n| format!("https://e{n}.example.org"))),
        prop::option::of(role_kind()),
        prop::option::of(prop::sample::select(PROTOCOLS.to_vec())),
        prop::option::of(prop::sample::select(USAGES.to_vec())),
    )
        .prop_filter("at least one criterion", |(id, role, protocol, usage)| {
            id.is_some() || role.is_some() || protocol.is_some() || usage.is_some()
        })
        .prop_map(|(id, role, protocol, usage)| GenCriteria {
            id,
            role,
            protocol,
            usage,
        })
}

fn to_descriptor(entity: &GenEntity) -> EntityDescriptor {
    EntityDescriptor {
        entity_id: entity.id.clone(),
        valid_until: None,
        cache_duration: None,
        roles: entity
            .roles
            .iter()
            .map(|r| RoleDescriptor {
                kind: r.kind,
                protocols: r.protocols.iter().map(|p| (*p).to_string()).collect(),
                keys: r
                    .usages
                    .iter()
                    .map(|u| KeyDescriptor {
                        usage: *u,
                        algorithm: SignatureAlgorithm::Ed25519,
                        public_key: vec![7; 32],
                        key_name: None,
                    })
                    .collect(),
                endpoints: Vec::new(),
            })
            .collect(),
        organization: None,
    }
}

fn to_set(c: &GenCriteria) -> CriteriaSet {
    let mut set = CriteriaSet::new();
    if let Some(id) = &c.id {
        set.insert(Criterion::EntityId(id.clone()));
    }
    if let Some(kind) = c.role {
        set.insert(Criterion::Role(kind));
    }
    if let Some(p) = c.protocol {
        set.insert(Criterion::Protocol(p.to_string()));
    }
    if let Some(u) = c.usage {
        set.insert(Criterion::Usage(u));
    }
    set
}

fn oracle_matches(e: &GenEntity, c: &GenCriteria) -> bool {
    let scoped: Vec<&GenRole> = e
        .roles
        .iter()
        .filter(|r| c.role.map_or(true, |kind| r.kind == kind))
        .collect();

    c.id.as_ref().map_or(true, |id| &e.id == id)
        && c.role.map_or(true, |_| !scoped.is_empty())
        && c.protocol.map_or(true, |p| scoped.iter().any(|r| r.protocols.contains(&p)))
        && c.usage.map_or(true, |u| {
            scoped
                .iter()
                .any(|r| r.usages.iter().any(|k| *k == u || *k == KeyUsage::Unspecified))
        })
}

/// Expected matches: first occurrence of each id, in document order.
fn oracle(entities: &[GenEntity], c: &GenCriteria) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    entities
        .iter()
        .filter(|e| seen.insert(e.id.clone()))
        .filter(|e| oracle_matches(e, c))
        .map(|e| e.id.clone())
        .collect()
}

fn document(entities: &[GenEntity]) -> String {
    let entities: Vec<_> = entities
        .iter()
        .map(|e| {
            json!({
                "entityID": e.id,
                "roles": e.roles.iter().map(|r| json!({
                    "kind": r.kind.as_str(),
                    "protocols": r.protocols,
                    "keys": r.usages.iter().map(|u| json!({
                        "use": u.as_str(),
                        "algorithm": "ed25519",
                        "publicKey": "BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc=",
                    })).collect::<Vec<_>>(),
                })).collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({ "entities": entities }).to_string()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    /// The index returns exactly the oracle's matches, in document order.
    #[test]
    fn resolve_matches_oracle(entities in gen_entities(), criteria in gen_criteria()) {
        let index = Arc::new(EntityIndex::build(entities.iter().map(to_descriptor)));
        let found: Vec<String> = EntityIndex::query(index, to_set(&criteria))
            .map(|e| e.entity_id.clone())
            .collect();

        prop_assert_eq!(found, oracle(&entities, &criteria));
    }
}

proptest! {
    // Each case starts a runtime and reads a file
    #![proptest_config(ProptestConfig {
        cases: 16,
        max_shrink_iters: 50,
        ..ProptestConfig::default()
    })]

    /// `resolve_single` returns a descriptor satisfying every criterion, or
    /// reports ambiguity exactly when several match without an id.
    #[test]
    fn resolve_single_satisfies_all_criteria(entities in gen_entities(), criteria in gen_criteria()) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("md.json");
        std::fs::write(&path, document(&entities)).unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let resolver = runtime.block_on(
            MetadataResolver::builder(
                ResolverConfig::builder("prop", MetadataSource::filesystem(&path))
                    .background_refresh(false)
                    .build()
                    .unwrap(),
            )
            .initialize(),
        ).unwrap();

        let expected = oracle(&entities, &criteria);
        match resolver.resolve_single(&to_set(&criteria)) {
            Ok(Some(found)) => {
                prop_assert!(expected.contains(&found.entity_id));
                let generated = entities.iter().find(|e| e.id == found.entity_id).unwrap();
                prop_assert!(oracle_matches(generated, &criteria));
            },
            Ok(None) => prop_assert!(expected.is_empty()),
            Err(MetadataError::AmbiguousMatch { matches }) => {
                prop_assert!(criteria.id.is_none());
                prop_assert_eq!(matches, expected.len());
                prop_assert!(matches > 1);
            },
            Err(e) => prop_assert!(false, "unexpected error: {}", e),
        }
    }
}
