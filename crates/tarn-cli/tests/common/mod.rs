//! Shared helpers: an in-memory npm registry on a background thread and a
//! `tarn` command isolated from the user's home directory.

#![allow(dead_code)]

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, Output};
use std::sync::{mpsc, Arc, Mutex};

type Versions = BTreeMap<String, BTreeMap<String, (Value, Vec<u8>)>>;

#[derive(Clone, Default)]
pub struct Registry {
    versions: Arc<Mutex<Versions>>,
    base: Arc<Mutex<String>>,
}

fn tgz(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Packuments carry no `integrity`, so tarballs are accepted as served.
impl Registry {
    pub fn publish(&self, name: &str, version: &str, extra: Value) {
        let mut manifest = Map::new();
        manifest.insert("name".into(), json!(name));
        manifest.insert("version".into(), json!(version));
        if let Value::Object(extra) = extra {
            manifest.extend(extra);
        }
        let manifest = Value::Object(manifest);
        let tarball = tgz(&[(
            "package/package.json".to_string(),
            serde_json::to_vec(&manifest).unwrap(),
        )]);
        self.versions
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .insert(version.to_string(), (manifest, tarball));
    }

    /// Serve on a background thread until the test process exits.
    pub fn spawn(&self) -> String {
        let (tx, rx) = mpsc::channel();
        let registry = self.clone();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                let base = format!("http://{}/", listener.local_addr().unwrap());
                *registry.base.lock().unwrap() = base.clone();
                let app = Router::new()
                    .route("/:name", get(packument))
                    .route("/:name/-/:file", get(tarball))
                    .with_state(registry);
                tx.send(base).unwrap();
                axum::serve(listener, app).await.unwrap();
            });
        });
        rx.recv().unwrap()
    }
}

async fn packument(UrlPath(name): UrlPath<String>, State(registry): State<Registry>) -> Response {
    let base = registry.base.lock().unwrap().clone();
    let all = registry.versions.lock().unwrap();
    let Some(versions) = all.get(&name) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let mut out = Map::new();
    for (version, (manifest, _)) in versions {
        let mut manifest = manifest.clone();
        manifest["dist"] = json!({"tarball": format!("{base}{name}/-/{name}-{version}.tgz")});
        out.insert(version.clone(), manifest);
    }
    let latest = versions.keys().last().cloned();
    Json(json!({"name": name, "dist-tags": {"latest": latest}, "versions": out})).into_response()
}

async fn tarball(
    UrlPath((name, file)): UrlPath<(String, String)>,
    State(registry): State<Registry>,
) -> Response {
    let all = registry.versions.lock().unwrap();
    let version = file
        .strip_prefix(&format!("{name}-"))
        .and_then(|f| f.strip_suffix(".tgz"))
        .unwrap_or_default();
    match all.get(&name).and_then(|v| v.get(version)) {
        Some((_, bytes)) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `tarn` with caches, data and registry pointed at test locations.
pub fn tarn(home: &Path, registry: &str, cwd: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tarn"));
    cmd.current_dir(cwd)
        .env("HOME", home)
        .env("XDG_CACHE_HOME", home.join("cache"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env("BUN_INSTALL_CACHE_DIR", home.join("store"))
        .env("BUN_CONFIG_REGISTRY", registry)
        .env_remove("NPM_CONFIG_REGISTRY")
        .env_remove("TARN_LOG")
        .env_remove("RUST_LOG");
    cmd
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

pub fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}
