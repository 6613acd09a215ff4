//! npm registry client.
//!
//! Manifests are cached twice: in memory for the life of the client (one
//! shared future per name, so concurrent lookups issue a single request) and
//! on disk under `<cache>/.manifests/` with the response's freshness headers.

use super::error::PkgError;
use super::npmrc::NpmrcConfig;
use super::packument::Packument;
use super::retry::{retry, FetchError, RetryPolicy};
use super::tarball::MAX_TARBALL_SIZE;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Default npm registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Environment variables overriding the default registry, in priority order.
pub const REGISTRY_ENV: &[&str] = &["BUN_CONFIG_REGISTRY", "NPM_CONFIG_REGISTRY"];

/// `accept` header for manifest requests (abbreviated metadata preferred).
pub const MANIFEST_ACCEPT: &str =
    "application/vnd.npm.install-v1+json; q=1.0, application/json; q=0.8, */*";

/// Registry client configuration.
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Overrides `.npmrc`'s `registry=` and the npm default.
    pub registry: Option<Url>,
    pub npmrc: NpmrcConfig,
    /// Disable TLS certificate verification.
    pub insecure: bool,
    /// Serve manifests from the disk cache regardless of age; never hit the network.
    pub prefer_offline: bool,
    /// Root of the on-disk manifest cache; `None` disables it.
    pub cache_dir: Option<PathBuf>,
    pub retry: RetryPolicy,
}

type ManifestFuture = Shared<BoxFuture<'static, Result<Arc<Packument>, PkgError>>>;

/// Registry client. Cheap to clone; clones share caches.
#[derive(Clone)]
pub struct RegistryClient {
    inner: Arc<Inner>,
}

struct Inner {
    default_registry: Url,
    npmrc: NpmrcConfig,
    http: Client,
    prefer_offline: bool,
    cache_dir: Option<PathBuf>,
    retry: RetryPolicy,
    manifests: Mutex<HashMap<String, ManifestFuture>>,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("default_registry", &self.inner.default_registry.as_str())
            .field("prefer_offline", &self.inner.prefer_offline)
            .finish_non_exhaustive()
    }
}

/// A manifest response stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheRecord {
    /// Unix seconds the response was generated (server `date`, else local clock).
    fetched_at: i64,
    max_age: Option<u64>,
    no_cache: bool,
    etag: Option<String>,
    last_modified: Option<String>,
    body: String,
}

impl CacheRecord {
    fn is_fresh(&self, now: i64) -> bool {
        if self.no_cache {
            return false;
        }
        self.max_age
            .is_some_and(|max_age| now.saturating_sub(self.fetched_at) < max_age as i64)
    }

    fn refresh_from(&mut self, headers: &HeaderMap) {
        let (max_age, no_cache) = parse_cache_control(headers);
        self.max_age = max_age;
        self.no_cache = no_cache;
        self.fetched_at = response_date(headers);
        if let Some(etag) = header_str(headers, header::ETAG) {
            self.etag = Some(etag);
        }
        if let Some(lm) = header_str(headers, header::LAST_MODIFIED) {
            self.last_modified = Some(lm);
        }
    }
}

enum ManifestResponse {
    NotModified(HeaderMap),
    Body(HeaderMap, Bytes),
}

impl RegistryClient {
    /// Create a client.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(options: RegistryOptions) -> Result<Self, PkgError> {
        let default_registry = match options.registry.or_else(|| options.npmrc.registry.clone()) {
            Some(url) => url,
            None => Url::parse(DEFAULT_REGISTRY)
                .map_err(|e| PkgError::registry(format!("invalid default registry: {e}")))?,
        };

        let insecure = options.insecure || options.npmrc.strict_ssl == Some(false);
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .user_agent(crate::version::user_agent())
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|e| PkgError::registry(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                default_registry,
                npmrc: options.npmrc,
                http,
                prefer_offline: options.prefer_offline,
                cache_dir: options.cache_dir,
                retry: options.retry,
                manifests: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Parse a registry URL, adding the trailing slash `Url::join` needs.
    ///
    /// # Errors
    /// Returns `REGISTRY_ERROR` for an invalid URL.
    pub fn parse_registry_url(raw: &str) -> Result<Url, PkgError> {
        let raw = raw.trim();
        let with_slash = if raw.ends_with('/') {
            raw.to_string()
        } else {
            format!("{raw}/")
        };
        Url::parse(&with_slash)
            .map_err(|e| PkgError::registry(format!("invalid registry URL '{raw}': {e}")))
    }

    /// The registry used for unscoped packages.
    #[must_use]
    pub fn default_registry(&self) -> &Url {
        &self.inner.default_registry
    }

    /// Manifest URL for `name`, honoring scoped registries.
    ///
    /// # Errors
    /// Returns `REGISTRY_ERROR` if the URL cannot be built.
    pub fn manifest_url(&self, name: &str) -> Result<Url, PkgError> {
        self.inner.manifest_url(name)
    }

    /// Fetch the packument for `name`.
    ///
    /// # Errors
    /// `PACKAGE_NOT_FOUND` on 404, `RESOLVE_FAILED` when retries are exhausted
    /// or `--prefer-offline` finds no cached copy.
    pub async fn fetch_manifest(&self, name: &str) -> Result<Arc<Packument>, PkgError> {
        let future = {
            let mut manifests = self
                .inner
                .manifests
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = manifests.get(name) {
                existing.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let owned = name.to_string();
                let future = async move { inner.load_manifest(&owned).await.map(Arc::new) }
                    .boxed()
                    .shared();
                manifests.insert(name.to_string(), future.clone());
                future
            }
        };
        future.await
    }

    /// Download a tarball.
    ///
    /// # Errors
    /// `DOWNLOAD_FAILED` on any non-success status, exhausted retries, or an
    /// oversized body.
    pub async fn fetch_tarball(&self, url: &str) -> Result<Bytes, PkgError> {
        let parsed = Url::parse(url)
            .map_err(|e| PkgError::download_failed(format!("invalid tarball URL '{url}': {e}")))?;
        let token = self.inner.npmrc.token_for(&parsed).map(String::from);
        let http = &self.inner.http;

        let bytes = retry(self.inner.retry, || {
            let mut request = http.get(parsed.clone());
            if let Some(token) = &token {
                request = request.bearer_auth(token);
            }
            let url = parsed.to_string();
            async move {
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::Status {
                        url,
                        status: status.as_u16(),
                    });
                }
                if response
                    .content_length()
                    .is_some_and(|len| len > MAX_TARBALL_SIZE as u64)
                {
                    return Ok(None);
                }
                Ok(Some(response.bytes().await?))
            }
        })
        .await
        .map_err(|e| PkgError::download_failed(e.to_string()))?;

        match bytes {
            Some(bytes) if bytes.len() <= MAX_TARBALL_SIZE => Ok(bytes),
            _ => Err(PkgError::download_failed(format!(
                "tarball {url} exceeds {MAX_TARBALL_SIZE} bytes"
            ))),
        }
    }
}

impl Inner {
    fn registry_for(&self, name: &str) -> &Url {
        name.strip_prefix('@')
            .and_then(|_| name.split('/').next())
            .and_then(|scope| self.npmrc.scoped_registries.get(scope))
            .unwrap_or(&self.default_registry)
    }

    fn manifest_url(&self, name: &str) -> Result<Url, PkgError> {
        let encoded = name.replace('/', "%2f");
        self.registry_for(name)
            .join(&encoded)
            .map_err(|e| PkgError::registry(format!("failed to build URL for '{name}': {e}")))
    }

    fn cache_path(&self, url: &Url) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        let hash = tarn_util::hash::blake3_bytes(url.as_str().as_bytes());
        Some(dir.join(".manifests").join(format!("{}.json", &hash[..32])))
    }

    fn read_cache(&self, url: &Url) -> Option<CacheRecord> {
        let path = self.cache_path(url)?;
        let bytes = std::fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(
                    path = %path.display(),
                    error = %e,
                    "ignoring unreadable manifest cache entry"
                );
                None
            }
        }
    }

    fn write_cache(&self, url: &Url, record: &CacheRecord) {
        let Some(path) = self.cache_path(url) else {
            return;
        };
        let result = serde_json::to_vec(record)
            .map_err(std::io::Error::other)
            .and_then(|bytes| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                tarn_util::fs::atomic_write(&path, &bytes)
            });
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to write manifest cache");
        }
    }

    async fn load_manifest(&self, name: &str) -> Result<Packument, PkgError> {
        let url = self.manifest_url(name)?;
        let cached = self.read_cache(&url);

        if self.prefer_offline {
            return match cached {
                Some(record) => Packument::from_slice(record.body.as_bytes()),
                None => Err(PkgError::resolve_failed(format!(
                    "{name} failed to resolve (no cached manifest and --prefer-offline is set)"
                ))),
            };
        }

        if let Some(record) = &cached {
            if record.is_fresh(chrono::Utc::now().timestamp()) {
                debug!(package = name, "manifest cache hit");
                return Packument::from_slice(record.body.as_bytes());
            }
        }

        let response = self.request_manifest(&url, cached.as_ref()).await.map_err(|e| match e {
            FetchError::Status { status: 404, .. } => {
                PkgError::not_found(name, strip_scheme(&url))
            }
            FetchError::Status { status, .. } if (400..500).contains(&status) => {
                PkgError::registry(format!("GET {url} - {status}"))
            }
            other => PkgError::resolve_failed(format!("{name} failed to resolve: {other}")),
        })?;

        match (response, cached) {
            (ManifestResponse::NotModified(headers), Some(mut record)) => {
                debug!(package = name, "manifest revalidated");
                record.refresh_from(&headers);
                self.write_cache(&url, &record);
                Packument::from_slice(record.body.as_bytes())
            }
            (ManifestResponse::NotModified(_), None) => Err(PkgError::registry(format!(
                "GET {url} - 304 without a cached copy"
            ))),
            (ManifestResponse::Body(headers, body), _) => {
                let packument = Packument::from_slice(&body)?;
                let mut record = CacheRecord {
                    fetched_at: 0,
                    max_age: None,
                    no_cache: false,
                    etag: None,
                    last_modified: None,
                    body: String::from_utf8_lossy(&body).into_owned(),
                };
                record.refresh_from(&headers);
                self.write_cache(&url, &record);
                Ok(packument)
            }
        }
    }

    async fn request_manifest(
        &self,
        url: &Url,
        cached: Option<&CacheRecord>,
    ) -> Result<ManifestResponse, FetchError> {
        let token = self.npmrc.token_for(url).map(String::from);

        retry(self.retry, || {
            let mut request = self
                .http
                .get(url.clone())
                .header(header::ACCEPT, HeaderValue::from_static(MANIFEST_ACCEPT));
            if let Some(token) = &token {
                request = request.bearer_auth(token);
            }
            if let Some(record) = cached {
                if let Some(etag) = &record.etag {
                    request = request.header(header::IF_NONE_MATCH, etag);
                }
                if let Some(lm) = &record.last_modified {
                    request = request.header(header::IF_MODIFIED_SINCE, lm);
                }
            }

            async move {
                let response = request.send().await?;
                let status = response.status();
                let headers = response.headers().clone();
                if status == StatusCode::NOT_MODIFIED {
                    return Ok(ManifestResponse::NotModified(headers));
                }
                if !status.is_success() {
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
                let body = response.bytes().await?;
                Ok(ManifestResponse::Body(headers, body))
            }
        })
        .await
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// `(max-age, no-cache)` from `cache-control`.
fn parse_cache_control(headers: &HeaderMap) -> (Option<u64>, bool) {
    let Some(value) = header_str(headers, header::CACHE_CONTROL) else {
        return (None, false);
    };
    let mut max_age = None;
    let mut no_cache = false;
    for directive in value.split(',').map(str::trim) {
        if let Some(secs) = directive.strip_prefix("max-age=") {
            max_age = secs.trim_matches('"').parse().ok();
        } else if directive.eq_ignore_ascii_case("no-cache")
            || directive.eq_ignore_ascii_case("no-store")
        {
            no_cache = true;
        }
    }
    (max_age, no_cache)
}

fn response_date(headers: &HeaderMap) -> i64 {
    header_str(headers, header::DATE)
        .and_then(|d| chrono::DateTime::parse_from_rfc2822(&d).ok())
        .map_or_else(|| chrono::Utc::now().timestamp(), |d| d.timestamp())
}

fn strip_scheme(url: &Url) -> &str {
    let s = url.as_str();
    s.split_once("://").map_or(s, |(_, rest)| rest)
}
