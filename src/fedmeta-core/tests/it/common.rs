//! Shared fixtures for the integration tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use fedmeta_core::SignatureAlgorithm;
use serde_json::{json, Value};

static MTIME_STEP: AtomicU64 = AtomicU64::new(1);

/// Entity with one role of `kind` and no keys.
pub fn entity(id: &str, kind: &str) -> Value {
    json!({ "entityID": id, "roles": [{ "kind": kind, "protocols": ["urn:test:protocol"] }] })
}

/// Entity with an identity provider role publishing one signing key.
pub fn signing_entity(id: &str, algorithm: SignatureAlgorithm, public_key: &[u8]) -> Value {
    json!({
        "entityID": id,
        "roles": [{
            "kind": "idpSso",
            "protocols": ["urn:test:protocol"],
            "keys": [{
                "use": "signing",
                "algorithm": algorithm.name(),
                "publicKey": STANDARD.encode(public_key),
            }],
        }],
    })
}

/// Group document around `entities`.
pub fn group(entities: Vec<Value>) -> String {
    json!({ "name": "test-federation", "entities": entities }).to_string()
}

/// Write a metadata file and return its path.
pub fn write_metadata(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Replace a metadata file, giving it a strictly newer modification time.
pub fn rewrite_metadata(path: &Path, contents: &str) {
    std::fs::write(path, contents).unwrap();
    let step = MTIME_STEP.fetch_add(1, Ordering::SeqCst);
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(step))
        .unwrap();
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
