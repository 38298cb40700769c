//! Installer integration tests against a mock CDN.
//!
//! The mock serves the two registry endpoints over a real local listener so
//! the full resolve → fetch → populate path runs, with request counters to
//! assert memoisation and idempotence.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use esbox_core::cache::CacheDb;
use esbox_core::npm::{encode_deps, encode_module_files, packages_hash, SCRIPTS_PATH};
use esbox_core::vfs::{MemFs, SharedFs, PACKAGE_HASH_PATH};
use esbox_core::{InstallOptions, NpmInstaller, ProgressSink};
use esbox_proto::ProgressMessage;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct MockCdn {
    /// fingerprint → tagged `name@major` → version map.
    deps: Arc<BTreeMap<String, BTreeMap<String, String>>>,
    /// `name@version` → relative path → bytes.
    mods: Arc<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
    /// `name@version` keys that always fail.
    broken: Arc<BTreeSet<String>>,
    deps_hits: Arc<AtomicUsize>,
    mod_hits: Arc<AtomicUsize>,
}

async fn handle_deps(State(cdn): State<MockCdn>, Path(fingerprint): Path<String>) -> Response {
    cdn.deps_hits.fetch_add(1, Ordering::SeqCst);
    match cdn.deps.get(&fingerprint) {
        Some(map) => encode_deps(map).unwrap().into_response(),
        None => (StatusCode::NOT_FOUND, "unknown fingerprint").into_response(),
    }
}

async fn handle_mod(State(cdn): State<MockCdn>, Path(key): Path<String>) -> Response {
    cdn.mod_hits.fetch_add(1, Ordering::SeqCst);
    let Ok(decoded) = URL_SAFE_NO_PAD.decode(&key) else {
        return (StatusCode::BAD_REQUEST, "bad key").into_response();
    };
    let spec = String::from_utf8_lossy(&decoded).into_owned();
    if cdn.broken.contains(&spec) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "broken package").into_response();
    }
    match cdn.mods.get(&spec) {
        Some(files) => encode_module_files(files).unwrap().into_response(),
        None => (StatusCode::NOT_FOUND, "unknown module").into_response(),
    }
}

/// Serve the mock CDN on an ephemeral port, returning its base URL.
async fn spawn_cdn(cdn: MockCdn) -> String {
    let router = Router::new()
        .route("/v2/deps/:fingerprint", get(handle_deps))
        .route("/v2/mod/:key", get(handle_mod))
        .with_state(cdn);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn collecting_sink() -> (ProgressSink, Arc<Mutex<Vec<ProgressMessage>>>) {
    let records = Arc::new(Mutex::new(Vec::new()));
    let sink_records = Arc::clone(&records);
    let sink = ProgressSink::new(move |msg| {
        sink_records.lock().unwrap().push(msg);
    });
    (sink, records)
}

fn string_map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// A one-package universe: `x@1` with a manifest and an entry file.
fn single_package_cdn() -> MockCdn {
    let requested = string_map(&[("x", "1")]);
    let fingerprint = packages_hash(&requested);

    let mut deps = BTreeMap::new();
    deps.insert(fingerprint, string_map(&[("x@1", "1")]));

    let mut files = BTreeMap::new();
    files.insert(
        "package.json".to_string(),
        br#"{"name":"x","version":"1","main":"i.js"}"#.to_vec(),
    );
    files.insert("i.js".to_string(), b"X".to_vec());
    let mut mods = BTreeMap::new();
    mods.insert("x@1".to_string(), files);

    MockCdn {
        deps: Arc::new(deps),
        mods: Arc::new(mods),
        ..MockCdn::default()
    }
}

fn project_fs() -> SharedFs {
    let mut fs = MemFs::new();
    fs.write_file("/app/package.json", r#"{"dependencies": {"x": "1"}}"#);
    fs.into_shared()
}

#[tokio::test]
async fn test_install_populates_node_modules() {
    let cdn = single_package_cdn();
    let base = spawn_cdn(cdn.clone()).await;

    let installer = NpmInstaller::new(&base).unwrap();
    let fs = project_fs();
    let (sink, _) = collecting_sink();

    let resolved = installer
        .install(&fs, &InstallOptions::default(), &sink)
        .await
        .unwrap();
    assert_eq!(resolved, string_map(&[("x", "1")]));

    let fs = fs.lock().await;
    let manifest: serde_json::Value =
        serde_json::from_str(&fs.read_file("/node_modules/x/package.json")).unwrap();
    assert_eq!(manifest["version"], "1");
    assert_eq!(fs.read_file("/node_modules/x/i.js"), "X");

    let scripts: BTreeMap<String, String> =
        serde_json::from_str(&fs.read_file(SCRIPTS_PATH)).unwrap();
    assert_eq!(
        scripts.get("x").map(String::as_str),
        Some("/node_modules/x/i.js")
    );

    // The refreshed fingerprint landed on the FS.
    assert_eq!(
        fs.read_file(PACKAGE_HASH_PATH),
        packages_hash(&string_map(&[("x", "1")]))
    );
    assert_eq!(cdn.deps_hits.load(Ordering::SeqCst), 1);
    assert_eq!(cdn.mod_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_install_is_a_no_op() {
    let cdn = single_package_cdn();
    let base = spawn_cdn(cdn.clone()).await;

    let installer = NpmInstaller::new(&base).unwrap();
    let fs = project_fs();
    let (sink, _) = collecting_sink();

    installer
        .install(&fs, &InstallOptions::default(), &sink)
        .await
        .unwrap();

    // Unchanged fingerprint short-circuits resolution entirely.
    let resolved = installer
        .install(&fs, &InstallOptions::default(), &sink)
        .await
        .unwrap();
    assert!(resolved.is_empty());
    assert_eq!(cdn.deps_hits.load(Ordering::SeqCst), 1);
    assert_eq!(cdn.mod_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_version_check_skips_completed_packages() {
    let cdn = single_package_cdn();
    let base = spawn_cdn(cdn.clone()).await;

    let installer = NpmInstaller::new(&base).unwrap();
    let fs = project_fs();
    let (sink, records) = collecting_sink();

    installer
        .install(&fs, &InstallOptions::default(), &sink)
        .await
        .unwrap();

    // Drop the stored fingerprint so resolution runs again; the resolution
    // is memoised locally and every package is skipped by version check.
    fs.lock().await.delete_file(PACKAGE_HASH_PATH);
    installer
        .install(&fs, &InstallOptions::default(), &sink)
        .await
        .unwrap();

    assert_eq!(cdn.deps_hits.load(Ordering::SeqCst), 1);
    assert_eq!(cdn.mod_hits.load(Ordering::SeqCst), 1);
    let records = records.lock().unwrap();
    assert!(records
        .iter()
        .any(|m| m.message.contains("already installed")));
}

#[tokio::test]
async fn test_resolution_memoised_in_local_tier() {
    let cdn = single_package_cdn();
    let base = spawn_cdn(cdn.clone()).await;

    let installer = NpmInstaller::new(&base).unwrap();
    let fs = project_fs();
    let (sink, _) = collecting_sink();

    let opts = InstallOptions::default();
    let first = installer
        .resolve_dependencies(&fs, &opts, &sink)
        .await
        .unwrap();
    assert_eq!(
        first.dependencies,
        Some(string_map(&[("x", "1")]))
    );

    fs.lock().await.delete_file(PACKAGE_HASH_PATH);
    let second = installer
        .resolve_dependencies(&fs, &opts, &sink)
        .await
        .unwrap();
    assert_eq!(second.dependencies, Some(string_map(&[("x", "1")])));

    // Both passes resolved, but only one network call was made.
    assert_eq!(cdn.deps_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_persistent_cache_survives_new_installer() {
    let cdn = single_package_cdn();
    let base = spawn_cdn(cdn.clone()).await;
    let cache_dir = tempfile::tempdir().unwrap();

    let installer =
        NpmInstaller::new(&base).unwrap().with_cache_db(CacheDb::open(cache_dir.path()).unwrap());
    let (sink, _) = collecting_sink();
    installer
        .install(&project_fs(), &InstallOptions::default(), &sink)
        .await
        .unwrap();
    assert_eq!(cdn.mod_hits.load(Ordering::SeqCst), 1);

    // A fresh installer and FS sharing the cache directory: resolution goes
    // to the network again, the package payload does not.
    let installer =
        NpmInstaller::new(&base).unwrap().with_cache_db(CacheDb::open(cache_dir.path()).unwrap());
    let (sink, records) = collecting_sink();
    installer
        .install(&project_fs(), &InstallOptions::default(), &sink)
        .await
        .unwrap();

    assert_eq!(cdn.mod_hits.load(Ordering::SeqCst), 1);
    let records = records.lock().unwrap();
    assert!(records.iter().any(|m| m.message.contains("cache hit")));
}

#[tokio::test]
async fn test_broken_package_rejects_install() {
    let mut cdn = single_package_cdn();
    cdn.broken = Arc::new(BTreeSet::from(["x@1".to_string()]));
    let base = spawn_cdn(cdn.clone()).await;

    let installer = NpmInstaller::new(&base).unwrap();
    let fs = project_fs();
    let (sink, records) = collecting_sink();

    let err = installer
        .install(&fs, &InstallOptions::default(), &sink)
        .await
        .unwrap_err();
    assert_eq!(err.code(), esbox_core::npm::codes::NPM_FETCH_FAILED);

    // Fixed-back-off retries were exhausted.
    assert_eq!(cdn.mod_hits.load(Ordering::SeqCst), 3);
    let records = records.lock().unwrap();
    assert!(records
        .iter()
        .any(|m| m.level == esbox_proto::ProgressLevel::Error));
}
