//! Minimal npm registry served from memory.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tarn_core::pkg::Integrity;

#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    base: Mutex<String>,
    versions: Mutex<BTreeMap<String, BTreeMap<String, (Value, Vec<u8>)>>>,
    requests: AtomicUsize,
}

pub fn tgz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

impl Registry {
    pub fn publish(&self, name: &str, version: &str, extra: Value) {
        let mut manifest = Map::new();
        manifest.insert("name".into(), json!(name));
        manifest.insert("version".into(), json!(version));
        if let Value::Object(extra) = extra {
            manifest.extend(extra);
        }
        let manifest = Value::Object(manifest);
        let body = serde_json::to_vec(&manifest).unwrap();
        let tarball = tgz(&[("package/package.json", &body)]);
        self.inner
            .versions
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .insert(version.to_string(), (manifest, tarball));
    }

    /// Requests served so far.
    pub fn requests(&self) -> usize {
        self.inner.requests.load(Ordering::SeqCst)
    }

    pub async fn serve(&self) -> String {
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
}

async fn packument(Path(name): Path<String>, State(registry): State<Registry>) -> Response {
    registry.inner.requests.fetch_add(1, Ordering::SeqCst);
    let base = registry.inner.base.lock().unwrap().clone();
    let all = registry.inner.versions.lock().unwrap();
    let Some(versions) = all.get(&name) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut out = Map::new();
    for (version, (manifest, bytes)) in versions {
        let mut manifest = manifest.clone();
        manifest["dist"] = json!({
            "tarball": format!("{base}{name}/-/{name}-{version}.tgz"),
            "integrity": Integrity::compute(bytes).as_str(),
        });
        out.insert(version.clone(), manifest);
    }
    let latest = versions.keys().last().cloned();
    Json(json!({"name": name, "dist-tags": {"latest": latest}, "versions": out})).into_response()
}

async fn tarball(Path((name, file)): Path<(String, String)>, State(registry): State<Registry>) -> Response {
    registry.inner.requests.fetch_add(1, Ordering::SeqCst);
    let all = registry.inner.versions.lock().unwrap();
    let version = file
        .strip_prefix(&format!("{name}-"))
        .and_then(|f| f.strip_suffix(".tgz"))
        .unwrap_or_default();
    match all.get(&name).and_then(|v| v.get(version)) {
        Some((_, bytes)) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
