//! Everything an install needs that lives outside the project.
//!
//! The store, the link registry, the registry client and the platform
//! target are resolved once from configuration and passed explicitly to the
//! resolver and the installer.

use super::error::PkgError;
use super::link_registry::LinkRegistry;
use super::npmrc::load_npmrc_files;
use super::platform::Platform;
use super::registry::{RegistryClient, RegistryOptions, REGISTRY_ENV};
use super::retry::RetryPolicy;
use super::store::ContentStore;
use crate::config::InstallConfig;
use crate::paths::{resolve_cache_dir, CACHE_DIR_ENV};
use std::path::{Path, PathBuf};

/// Overrides coming from the environment and the command line.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    /// Registry URL from the environment or a flag; beats `.npmrc` and `bunfig.toml`.
    pub registry: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub link_dir: Option<PathBuf>,
    pub prefer_offline: bool,
    pub insecure: bool,
    pub platform: Platform,
    pub retry: RetryPolicy,
}

impl ContextOptions {
    /// Read `BUN_INSTALL_CACHE_DIR`, `BUN_CONFIG_REGISTRY` and `NPM_CONFIG_REGISTRY`.
    #[must_use]
    pub fn from_env() -> Self {
        let registry = REGISTRY_ENV
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.trim().is_empty());
        let cache_dir = std::env::var_os(CACHE_DIR_ENV)
            .map(PathBuf::from)
            .filter(|p| !p.as_os_str().is_empty());

        Self {
            registry,
            cache_dir,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Context {
    pub root: PathBuf,
    pub install: InstallConfig,
    pub store: ContentStore,
    pub links: LinkRegistry,
    pub registry: RegistryClient,
    pub platform: Platform,
    pub insecure: bool,
}

impl Context {
    /// Build a context for the project at `root`.
    ///
    /// Registry precedence: `options.registry`, then `.npmrc`, then
    /// `bunfig.toml`, then the npm default.
    ///
    /// # Errors
    /// Returns `REGISTRY_ERROR` for an invalid registry URL or if the HTTP
    /// client cannot be created.
    pub fn new(
        root: &Path,
        install: InstallConfig,
        options: ContextOptions,
    ) -> Result<Self, PkgError> {
        let npmrc = load_npmrc_files(root);

        let registry_url = match options.registry.as_deref() {
            Some(raw) => Some(RegistryClient::parse_registry_url(raw)?),
            None if npmrc.registry.is_some() => None,
            None => install
                .registry
                .as_deref()
                .map(RegistryClient::parse_registry_url)
                .transpose()?,
        };

        let store = ContentStore::new(resolve_cache_dir(
            options.cache_dir,
            install.cache.dir.as_deref(),
        ));
        let links = options
            .link_dir
            .map_or_else(LinkRegistry::default_location, LinkRegistry::new);
        let prefer_offline = options.prefer_offline || install.prefer_offline.unwrap_or(false);

        let registry = RegistryClient::new(RegistryOptions {
            registry: registry_url,
            npmrc,
            insecure: options.insecure,
            prefer_offline,
            cache_dir: Some(store.root().to_path_buf()),
            retry: options.retry,
        })?;

        tracing::debug!(
            root = %root.display(),
            store = %store.root().display(),
            registry = %registry.default_registry(),
            "install context ready"
        );

        Ok(Self {
            root: root.to_path_buf(),
            install,
            store,
            links,
            registry,
            platform: options.platform,
            insecure: options.insecure,
        })
    }

    /// `<root>/node_modules`.
    #[must_use]
    pub fn node_modules(&self) -> PathBuf {
        self.root.join("node_modules")
    }
}
