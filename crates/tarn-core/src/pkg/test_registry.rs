//! In-process npm registry for resolver and installer tests.

use super::integrity::Integrity;
use super::tarball::tests::build_tgz;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub(crate) struct MockRegistry {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    base: Mutex<String>,
    /// name → version → (package.json, tarball file name)
    packages: Mutex<BTreeMap<String, BTreeMap<String, Value>>>,
    tarballs: Mutex<HashMap<String, Vec<u8>>>,
    manifest_hits: AtomicUsize,
    tarball_hits: AtomicUsize,
}

impl MockRegistry {
    /// Publish `name@version`; `extra` is merged into its package.json.
    pub(crate) fn publish(&self, name: &str, version: &str, extra: Value) {
        self.publish_with_files(name, version, extra, &[]);
    }

    pub(crate) fn publish_with_files(&self, name: &str, version: &str, extra: Value, files: &[(&str, &str)]) {
        let mut manifest = Map::new();
        manifest.insert("name".into(), json!(name));
        manifest.insert("version".into(), json!(version));
        if let Value::Object(extra) = extra {
            manifest.extend(extra);
        }
        let manifest = Value::Object(manifest);

        let package_json = serde_json::to_vec(&manifest).unwrap();
        let mut entries: Vec<(String, Vec<u8>)> =
            vec![("package/package.json".to_string(), package_json)];
        for (path, content) in files {
            entries.push((format!("package/{path}"), content.as_bytes().to_vec()));
        }
        let refs: Vec<(&str, &[u8])> = entries
            .iter()
            .map(|(p, c)| (p.as_str(), c.as_slice()))
            .collect();
        let tgz = build_tgz(&refs);

        let file = format!("{}-{version}.tgz", name.rsplit('/').next().unwrap());
        self.inner
            .tarballs
            .lock()
            .unwrap()
            .insert(format!("{name}/{file}"), tgz);
        self.inner
            .packages
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .insert(version.to_string(), manifest);
    }

    pub(crate) fn manifest_hits(&self) -> usize {
        self.inner.manifest_hits.load(Ordering::SeqCst)
    }

    pub(crate) fn tarball_hits(&self) -> usize {
        self.inner.tarball_hits.load(Ordering::SeqCst)
    }

    /// Start serving; returns the registry URL.
    pub(crate) async fn serve(&self) -> String {
        let app = Router::new()
            .route("/:name", get(packument))
            .route("/:name/-/:file", get(tarball))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/", listener.local_addr().unwrap());
        *self.inner.base.lock().unwrap() = base.clone();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        base
    }

    pub(crate) fn tarball_bytes(&self, name: &str, version: &str) -> Vec<u8> {
        let file = format!("{}-{version}.tgz", name.rsplit('/').next().unwrap());
        self.inner.tarballs.lock().unwrap()[&format!("{name}/{file}")].clone()
    }
}

async fn packument(Path(name): Path<String>, State(registry): State<MockRegistry>) -> Response {
    registry.inner.manifest_hits.fetch_add(1, Ordering::SeqCst);
    let base = registry.inner.base.lock().unwrap().clone();
    let packages = registry.inner.packages.lock().unwrap();
    let Some(versions) = packages.get(&name) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut out = Map::new();
    let mut latest = None;
    for (version, manifest) in versions {
        let file = format!("{}-{version}.tgz", name.rsplit('/').next().unwrap());
        let bytes = &registry.inner.tarballs.lock().unwrap()[&format!("{name}/{file}")];
        let mut manifest = manifest.clone();
        manifest["dist"] = json!({
            "tarball": format!("{base}{name}/-/{file}"),
            "integrity": Integrity::compute(bytes).as_str(),
        });
        out.insert(version.clone(), manifest);
        let parsed = semver::Version::parse(version).unwrap();
        if parsed.pre.is_empty() && latest.as_ref().map_or(true, |l: &semver::Version| parsed > *l) {
            latest = Some(parsed);
        }
    }

    Json(json!({
        "name": name,
        "dist-tags": { "latest": latest.map(|v| v.to_string()) },
        "versions": out,
    }))
    .into_response()
}

async fn tarball(
    Path((name, file)): Path<(String, String)>,
    State(registry): State<MockRegistry>,
) -> Response {
    registry.inner.tarball_hits.fetch_add(1, Ordering::SeqCst);
    match registry.inner.tarballs.lock().unwrap().get(&format!("{name}/{file}")) {
        Some(bytes) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
