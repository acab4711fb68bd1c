//! HTTP and file-backed HTTP sources against a mock metadata server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fedmeta_core::{
    CriteriaSet, JsonMetadataParser, MetadataDocument, MetadataError, MetadataParser,
    MetadataResolver, MetadataSource, ResolverConfig,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{entity, group};

const IDP: &str = "https://idp.example.org";
const SP: &str = "https://sp.example.org";

async fn serve(server: &MockServer, body: String) {
    Mock::given(method("GET"))
        .and(path("/metadata.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn unavailable_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    server
}

fn url(server: &MockServer) -> String {
    format!("{}/metadata.json", server.uri())
}

fn config(source: MetadataSource) -> ResolverConfig {
    ResolverConfig::builder("http-it", source)
        .background_refresh(false)
        .request_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map_or(0, |r| r.len())
}

#[tokio::test]
async fn test_http_source_resolves() {
    let server = MockServer::start().await;
    serve(&server, group(vec![entity(IDP, "idpSso")])).await;

    let resolver = MetadataResolver::builder(config(MetadataSource::http(&url(&server)).unwrap()))
        .initialize()
        .await
        .unwrap();

    assert!(resolver.resolve_single(&CriteriaSet::entity_id(IDP)).unwrap().is_some());
    assert!(!resolver.state().degraded);
}

#[tokio::test]
async fn test_http_error_status_fails_fast() {
    let server = unavailable_server().await;

    let err = MetadataResolver::builder(config(MetadataSource::http(&url(&server)).unwrap()))
        .initialize()
        .await
        .unwrap_err();

    assert!(matches!(err.root_cause(), MetadataError::Fetch { .. }));
}

#[tokio::test]
async fn test_not_modified_keeps_index_and_clears_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metadata.json"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/metadata.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .set_body_string(group(vec![entity(IDP, "idpSso")])),
        )
        .mount(&server)
        .await;

    let resolver = MetadataResolver::builder(config(MetadataSource::http(&url(&server)).unwrap()))
        .initialize()
        .await
        .unwrap();
    let before = resolver.snapshot();

    resolver.refresh().await.unwrap();

    assert!(Arc::ptr_eq(&before, &resolver.snapshot()));
    let state = resolver.state();
    assert!(state.last_failure.is_none());
    assert_eq!(state.entity_count, 1);
    assert_eq!(request_count(&server).await, 2);
}

#[tokio::test]
async fn test_backup_written_and_used_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let backup = dir.path().join("backup.json");
    let body = group(vec![entity(IDP, "idpSso"), entity(SP, "spSso")]);

    let server = MockServer::start().await;
    serve(&server, body.clone()).await;
    let first = MetadataResolver::builder(config(
        MetadataSource::file_backed_http(&url(&server), &backup).unwrap(),
    ))
    .initialize()
    .await
    .unwrap();
    first.shutdown().await;

    // The backup holds exactly the fetched bytes
    assert_eq!(std::fs::read_to_string(&backup).unwrap(), body);

    // Restart against a URL that no longer answers
    let down = unavailable_server().await;
    let second = MetadataResolver::builder(config(
        MetadataSource::file_backed_http(&url(&down), &backup).unwrap(),
    ))
    .initialize()
    .await
    .unwrap();

    assert!(second.state().degraded);
    assert!(second.resolve_single(&CriteriaSet::entity_id(SP)).unwrap().is_some());

    // The backup is also usable as a plain filesystem source
    let offline = MetadataResolver::builder(config(MetadataSource::filesystem(&backup)))
        .initialize()
        .await
        .unwrap();
    assert_eq!(offline.state().entity_count, 2);
}

#[tokio::test]
async fn test_no_backup_and_no_server_fails() {
    let dir = tempfile::tempdir().unwrap();
    let down = unavailable_server().await;

    let err = MetadataResolver::builder(config(
        MetadataSource::file_backed_http(&url(&down), dir.path().join("backup.json")).unwrap(),
    ))
    .initialize()
    .await
    .unwrap_err();

    assert!(matches!(err.root_cause(), MetadataError::Fetch { .. }));
}

/// Parser that records how many parses overlap.
struct CountingParser {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl MetadataParser for CountingParser {
    fn parse(&self, bytes: &[u8]) -> Result<MetadataDocument, MetadataError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        let result = JsonMetadataParser::new().parse(bytes);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refreshes_are_queued() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metadata.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(group(vec![entity(IDP, "idpSso")]))
                .set_delay(Duration::from_millis(30)),
        )
        .mount(&server)
        .await;

    let parser = Arc::new(CountingParser {
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
        calls: AtomicUsize::new(0),
    });
    let resolver = MetadataResolver::builder(config(MetadataSource::http(&url(&server)).unwrap()))
        .shared_parser(Arc::clone(&parser) as Arc<dyn MetadataParser>)
        .initialize()
        .await
        .unwrap();

    let refreshes = (0..4).map(|_| {
        let resolver = Arc::clone(&resolver);
        tokio::spawn(async move { resolver.refresh().await })
    });
    for result in futures::future::join_all(refreshes).await {
        result.unwrap().unwrap();
    }

    // Every caller got its own full run, one at a time
    assert_eq!(parser.calls.load(Ordering::SeqCst), 5);
    assert_eq!(parser.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(request_count(&server).await, 5);
}

#[tokio::test]
async fn test_no_fetch_after_shutdown() {
    let server = MockServer::start().await;
    serve(&server, group(vec![entity(IDP, "idpSso")])).await;

    let resolver = MetadataResolver::builder(
        ResolverConfig::builder("http-it", MetadataSource::http(&url(&server)).unwrap())
            .min_refresh_delay(Duration::from_millis(20))
            .max_refresh_delay(Duration::from_millis(40))
            .build()
            .unwrap(),
    )
    .initialize()
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    resolver.shutdown().await;
    let after_shutdown = request_count(&server).await;
    assert!(after_shutdown >= 2, "background refresh should have fetched");

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(request_count(&server).await, after_shutdown);
}
