//! Filesystem-backed resolver behavior: initialization modes, failure
//! isolation, validity filtering, and background refresh.

use std::time::Duration;

use fedmeta_core::{
    CriteriaSet, Criterion, EntityRoleFilter, MetadataError, MetadataResolver, MetadataSource,
    RequiredValidUntilFilter, ResolverConfig, RoleKind,
};
use serde_json::json;

use crate::common::{entity, eventually, group, rewrite_metadata, write_metadata};

const IDP: &str = "https://idp.example.org";
const SP: &str = "https://sp.example.org";

fn config(path: &std::path::Path) -> fedmeta_core::ResolverConfigBuilder {
    ResolverConfig::builder("it", MetadataSource::filesystem(path)).background_refresh(false)
}

// =============================================================================
// Initialization
// =============================================================================

#[tokio::test]
async fn test_missing_file_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.json");

    let err = MetadataResolver::builder(config(&path).build().unwrap())
        .initialize()
        .await
        .unwrap_err();

    assert!(matches!(err, MetadataError::Initialization { .. }));
    assert!(err.is_fatal());
    assert!(matches!(err.root_cause(), MetadataError::NotFound { .. }));
}

#[tokio::test]
async fn test_directory_fails_fast() {
    let dir = tempfile::tempdir().unwrap();

    let err = MetadataResolver::builder(config(dir.path()).build().unwrap())
        .initialize()
        .await
        .unwrap_err();

    assert!(matches!(err.root_cause(), MetadataError::Unreadable { .. }));
}

#[tokio::test]
async fn test_empty_file_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_metadata(dir.path(), "empty.json", "");

    let err = MetadataResolver::builder(config(&path).build().unwrap())
        .initialize()
        .await
        .unwrap_err();

    assert!(matches!(err.root_cause(), MetadataError::Parse { .. }));
}

#[tokio::test]
async fn test_lenient_initialization_recovers_when_file_appears() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("later.json");

    let resolver = MetadataResolver::builder(
        config(&path).fail_fast_initialization(false).build().unwrap(),
    )
    .initialize()
    .await
    .unwrap();

    // Well-formed queries on empty metadata are "not found", not errors
    assert!(resolver
        .resolve_single(&CriteriaSet::entity_id(IDP))
        .unwrap()
        .is_none());
    let state = resolver.state();
    assert!(state.last_failure.as_ref().unwrap().fetch_error);
    assert!(state.last_successful_refresh.is_none());
    assert!(!state.fail_fast_initialization);

    write_metadata(dir.path(), "later.json", &group(vec![entity(IDP, "idpSso")]));
    resolver.refresh().await.unwrap();

    assert!(resolver
        .resolve_single(&CriteriaSet::entity_id(IDP))
        .unwrap()
        .is_some());
    let state = resolver.state();
    assert!(state.last_failure.is_none());
    assert_eq!(state.entity_count, 1);
}

// =============================================================================
// Failure isolation
// =============================================================================

#[tokio::test]
async fn test_disappearing_file_keeps_previous_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_metadata(dir.path(), "md.json", &group(vec![entity(IDP, "idpSso")]));

    let resolver = MetadataResolver::builder(config(&path).build().unwrap())
        .initialize()
        .await
        .unwrap();
    let published_at = resolver.state().last_successful_refresh;

    std::fs::remove_file(&path).unwrap();
    let err = resolver.refresh().await.unwrap_err();

    assert!(matches!(err, MetadataError::Refresh { .. }));
    assert!(matches!(err.root_cause(), MetadataError::NotFound { .. }));
    assert!(resolver
        .resolve_single(&CriteriaSet::entity_id(IDP))
        .unwrap()
        .is_some());

    let state = resolver.state();
    assert!(state.last_failure.is_some());
    assert_eq!(state.last_successful_refresh, published_at);
    assert!(state.last_refresh_attempt >= published_at);
}

#[tokio::test]
async fn test_malformed_update_keeps_previous_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_metadata(dir.path(), "md.json", &group(vec![entity(IDP, "idpSso")]));
    let resolver = MetadataResolver::builder(config(&path).build().unwrap())
        .initialize()
        .await
        .unwrap();
    let before = resolver.snapshot();

    rewrite_metadata(&path, "{ not json");
    let err = resolver.refresh().await.unwrap_err();
    assert!(matches!(err.root_cause(), MetadataError::Parse { .. }));
    assert!(std::sync::Arc::ptr_eq(&before, &resolver.snapshot()));

    // The failed content was never committed, so the fixed file is re-read
    rewrite_metadata(&path, &group(vec![entity(IDP, "idpSso"), entity(SP, "spSso")]));
    resolver.refresh().await.unwrap();
    assert_eq!(resolver.state().entity_count, 2);
}

#[tokio::test]
async fn test_snapshot_iterator_survives_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_metadata(dir.path(), "md.json", &group(vec![entity(IDP, "idpSso")]));
    let resolver = MetadataResolver::builder(config(&path).build().unwrap())
        .initialize()
        .await
        .unwrap();

    let idps = CriteriaSet::new().with(Criterion::Role(RoleKind::IdpSso));
    let mut resolved = resolver.resolve(&idps).unwrap();

    rewrite_metadata(&path, &group(vec![entity("https://other.example.org", "idpSso")]));
    resolver.refresh().await.unwrap();

    // The iterator still reads the index it started with
    assert_eq!(resolved.next().unwrap().entity_id, IDP);
    assert!(resolved.next().is_none());
    let fresh: Vec<_> = resolver.resolve(&idps).unwrap().collect();
    assert_eq!(fresh[0].entity_id, "https://other.example.org");
}

// =============================================================================
// Validity
// =============================================================================

fn expiring_document() -> String {
    json!({
        "entities": [
            { "entityID": IDP, "validUntil": "2001-01-01T00:00:00Z", "roles": [{ "kind": "idpSso" }] },
            { "entityID": SP, "roles": [{ "kind": "spSso" }] },
        ],
        "groups": [{
            "validUntil": "2002-01-01T00:00:00Z",
            "entities": [{ "entityID": "https://nested.example.org", "validUntil": "2999-01-01T00:00:00Z",
                           "roles": [{ "kind": "pdp" }] }]
        }]
    })
    .to_string()
}

#[tokio::test]
async fn test_expired_entities_excluded_when_required() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_metadata(dir.path(), "md.json", &expiring_document());

    let resolver = MetadataResolver::builder(
        config(&path).require_valid_metadata(true).build().unwrap(),
    )
    .initialize()
    .await
    .unwrap();

    assert!(resolver.resolve_single(&CriteriaSet::entity_id(IDP)).unwrap().is_none());
    // Expired through its enclosing group
    assert!(resolver
        .resolve_single(&CriteriaSet::entity_id("https://nested.example.org"))
        .unwrap()
        .is_none());
    assert!(resolver.resolve_single(&CriteriaSet::entity_id(SP)).unwrap().is_some());
    assert!(resolver.state().require_valid_metadata);
    assert_eq!(resolver.state().entity_count, 1);
}

#[tokio::test]
async fn test_entity_expiring_after_load_not_served_from_unchanged_file() {
    let dir = tempfile::tempdir().unwrap();
    let valid_until = chrono::Utc::now() + chrono::Duration::milliseconds(1500);
    let document = json!({
        "entities": [
            { "entityID": IDP, "validUntil": valid_until.to_rfc3339(), "roles": [{ "kind": "idpSso" }] },
            { "entityID": SP, "roles": [{ "kind": "spSso" }] }
        ]
    })
    .to_string();
    let path = write_metadata(dir.path(), "md.json", &document);

    let resolver = MetadataResolver::builder(
        config(&path).require_valid_metadata(true).build().unwrap(),
    )
    .initialize()
    .await
    .unwrap();
    assert!(resolver.resolve_single(&CriteriaSet::entity_id(IDP)).unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(2000)).await;

    // Lookups stop returning it before any refresh
    assert!(resolver.resolve_single(&CriteriaSet::entity_id(IDP)).unwrap().is_none());

    // The file is untouched, so the refresh reuses the index minus the expired entity
    resolver.refresh().await.unwrap();
    assert!(resolver.resolve_single(&CriteriaSet::entity_id(IDP)).unwrap().is_none());
    assert!(resolver.resolve_single(&CriteriaSet::entity_id(SP)).unwrap().is_some());
    assert_eq!(resolver.state().entity_count, 1);
    assert_eq!(resolver.snapshot().len(), 1);
}

#[tokio::test]
async fn test_expired_entities_kept_when_not_required() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_metadata(dir.path(), "md.json", &expiring_document());

    let resolver = MetadataResolver::builder(config(&path).build().unwrap())
        .initialize()
        .await
        .unwrap();

    assert!(resolver.resolve_single(&CriteriaSet::entity_id(IDP)).unwrap().is_some());
    assert_eq!(resolver.state().entity_count, 3);
}

// =============================================================================
// Filters
// =============================================================================

#[tokio::test]
async fn test_filters_applied_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let doc = json!({
        "validUntil": "2999-01-01T00:00:00Z",
        "entities": [entity(IDP, "idpSso"), entity(SP, "spSso")],
    })
    .to_string();
    let path = write_metadata(dir.path(), "md.json", &doc);

    let resolver = MetadataResolver::builder(config(&path).build().unwrap())
        .filter(RequiredValidUntilFilter::unbounded())
        .filter(EntityRoleFilter::new([RoleKind::IdpSso]))
        .initialize()
        .await
        .unwrap();

    assert!(resolver.resolve_single(&CriteriaSet::entity_id(IDP)).unwrap().is_some());
    assert!(resolver.resolve_single(&CriteriaSet::entity_id(SP)).unwrap().is_none());
}

#[tokio::test]
async fn test_rejected_document_fails_like_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_metadata(dir.path(), "md.json", &group(vec![entity(IDP, "idpSso")]));

    let err = MetadataResolver::builder(config(&path).build().unwrap())
        .filter(RequiredValidUntilFilter::new(Duration::from_secs(3600)))
        .initialize()
        .await
        .unwrap_err();

    assert!(matches!(err.root_cause(), MetadataError::DocumentRejected { .. }));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_shutdown_is_idempotent_and_blocks_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_metadata(dir.path(), "md.json", &group(vec![entity(IDP, "idpSso")]));
    let resolver = MetadataResolver::builder(
        ResolverConfig::builder("it", MetadataSource::filesystem(&path))
            .min_refresh_delay(Duration::from_millis(20))
            .max_refresh_delay(Duration::from_millis(50))
            .build()
            .unwrap(),
    )
    .initialize()
    .await
    .unwrap();

    resolver.shutdown().await;
    resolver.shutdown().await;

    assert!(matches!(
        resolver.refresh().await,
        Err(MetadataError::ShutDown { .. })
    ));
    // The last snapshot is still served
    assert!(resolver.resolve_single(&CriteriaSet::entity_id(IDP)).unwrap().is_some());
    assert!(resolver.state().next_scheduled_refresh.is_none());
}

#[tokio::test]
async fn test_background_refresh_picks_up_changes_and_survives_failures() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_metadata(dir.path(), "md.json", &group(vec![entity(IDP, "idpSso")]));
    let resolver = MetadataResolver::builder(
        ResolverConfig::builder("it", MetadataSource::filesystem(&path))
            .min_refresh_delay(Duration::from_millis(20))
            .max_refresh_delay(Duration::from_millis(50))
            .build()
            .unwrap(),
    )
    .initialize()
    .await
    .unwrap();
    assert!(resolver.state().next_scheduled_refresh.is_some());

    rewrite_metadata(&path, &group(vec![entity(IDP, "idpSso"), entity(SP, "spSso")]));
    assert!(eventually(Duration::from_secs(5), || resolver.state().entity_count == 2).await);

    std::fs::remove_file(&path).unwrap();
    assert!(eventually(Duration::from_secs(5), || resolver.state().last_failure.is_some()).await);
    assert_eq!(resolver.state().entity_count, 2);

    // The loop keeps running after a failure
    rewrite_metadata(&path, &group(vec![entity(SP, "spSso")]));
    assert!(eventually(Duration::from_secs(5), || {
        let state = resolver.state();
        state.last_failure.is_none() && state.entity_count == 1
    })
    .await);

    resolver.shutdown().await;
}

#[tokio::test]
async fn test_dropping_resolver_stops_background_task() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_metadata(dir.path(), "md.json", &group(vec![entity(IDP, "idpSso")]));
    let resolver = MetadataResolver::builder(
        ResolverConfig::builder("it", MetadataSource::filesystem(&path))
            .min_refresh_delay(Duration::from_millis(20))
            .max_refresh_delay(Duration::from_millis(50))
            .build()
            .unwrap(),
    )
    .initialize()
    .await
    .unwrap();

    let weak = std::sync::Arc::downgrade(&resolver);
    drop(resolver);
    assert!(eventually(Duration::from_secs(2), || weak.upgrade().is_none()).await);
}
