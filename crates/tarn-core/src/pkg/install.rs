//! Installing a resolved graph into `node_modules`.
//!
//! Every package that needs contents is fetched, verified and extracted into
//! the store before anything under `node_modules` is touched. The tree is
//! then laid out either hoisted (npm style) or isolated (one copy per
//! package under `node_modules/.bun`, dependencies reached through symlinks).

use super::context::Context;
use super::error::{codes, PkgError};
use super::git;
use super::graph::{DependencyGraph, PackageKey, Resolution, ResolvedPackage, ROOT_WORKSPACE};
use super::hoist::{HoistPlan, TreePath};
use super::integrity::Integrity;
use super::link::{link_bins, link_package, package_dir, points_to};
use super::platform::Platform;
use super::scanner::ScanPackage;
use crate::config::Linker;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tarn_util::fs::{hardlink_dir_all, remove_path, unique_sibling};
use tarn_util::hash::blake3_bytes;
use tracing::{debug, info};

/// Tarball downloads in flight at once.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 16;

/// Directory under `node_modules` holding the isolated layout.
pub const ISOLATED_DIR: &str = ".bun";

#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub linker: Linker,
    pub production: bool,
    /// Report what would be installed without writing anything.
    pub dry_run: bool,
    pub concurrency: usize,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            linker: Linker::Hoisted,
            production: false,
            dry_run: false,
            concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }
}

/// Outcome of an install.
#[derive(Debug, Default)]
pub struct InstallReport {
    /// Packages written or relinked under `node_modules`.
    pub installed: BTreeSet<PackageKey>,
    /// Packages already in place.
    pub unchanged: usize,
    /// Packages downloaded or cloned into the store.
    pub fetched: usize,
    /// Packages skipped because of their `os`/`cpu` constraints.
    pub filtered: BTreeSet<PackageKey>,
    pub bins: usize,
    /// Hashes computed for tarballs that arrived without one.
    pub computed_integrity: BTreeMap<PackageKey, Integrity>,
    /// Per-package failures; the rest of the tree was still linked.
    pub failures: Vec<PkgError>,
}

impl InstallReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    #[must_use]
    pub fn changed(&self) -> bool {
        !self.installed.is_empty()
    }

    /// Fill in the integrity of packages that were hashed during the install.
    /// Returns how many entries changed.
    pub fn backfill_integrity(&self, graph: &mut DependencyGraph) -> usize {
        backfill(graph, &self.computed_integrity)
    }
}

pub(crate) fn backfill(
    graph: &mut DependencyGraph,
    computed: &BTreeMap<PackageKey, Integrity>,
) -> usize {
    let mut filled = 0;
    for (key, integrity) in computed {
        let Some(pkg) = graph.packages.get_mut(key) else {
            continue;
        };
        if pkg.integrity.as_deref() != Some(integrity.as_str()) {
            pkg.integrity = Some(integrity.as_str().to_string());
            filled += 1;
        }
    }
    filled
}

/// Tarball packages whose integrity is unknown.
fn lacks_integrity(pkg: &ResolvedPackage) -> bool {
    pkg.resolution.is_tarball() && pkg.integrity.as_deref().and_then(Integrity::parse).is_none()
}

/// Serializes writes to the same destination.
#[derive(Default)]
struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    fn get(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }
}

pub struct Installer<'a> {
    ctx: &'a Context,
    graph: &'a DependencyGraph,
    options: InstallOptions,
    prefetched: HashMap<PackageKey, Bytes>,
    root: PathBuf,
    locks: PathLocks,
    /// Integrity computed during this install for tarballs that had none.
    hashed: Mutex<BTreeMap<PackageKey, Integrity>>,
}

impl<'a> Installer<'a> {
    #[must_use]
    pub fn new(ctx: &'a Context, graph: &'a DependencyGraph, options: InstallOptions) -> Self {
        let root = dunce::canonicalize(&ctx.root).unwrap_or_else(|_| ctx.root.clone());
        Self {
            ctx,
            graph,
            options,
            prefetched: HashMap::new(),
            root,
            locks: PathLocks::default(),
            hashed: Mutex::default(),
        }
    }

    /// Tarballs already downloaded by the resolver.
    #[must_use]
    pub fn with_prefetched(mut self, prefetched: HashMap<PackageKey, Bytes>) -> Self {
        self.prefetched = prefetched;
        self
    }

    /// Hashes for tarballs the resolver already downloaded whose integrity
    /// is unknown. Used when nothing is installed (`--lockfile-only`).
    #[must_use]
    pub fn prefetched_integrity(&self) -> BTreeMap<PackageKey, Integrity> {
        self.prefetched
            .iter()
            .filter(|(key, _)| self.graph.packages.get(*key).is_some_and(lacks_integrity))
            .map(|(key, bytes)| (key.clone(), Integrity::compute(bytes)))
            .collect()
    }

    /// Packages this install would place on disk.
    #[must_use]
    pub fn targets(&self) -> BTreeSet<PackageKey> {
        self.graph.reachable(&self.ctx.platform, self.options.production)
    }

    /// What a security scanner gets to see.
    #[must_use]
    pub fn scan_list(&self) -> Vec<ScanPackage> {
        self.targets()
            .iter()
            .filter_map(|k| self.graph.packages.get(k))
            .filter(|p| !matches!(p.resolution, Resolution::Workspace { .. }))
            .map(|p| ScanPackage {
                name: p.real_name.clone(),
                version: p.version.clone(),
            })
            .collect()
    }

    /// Fetch what is missing from the store, then link the tree.
    ///
    /// # Errors
    /// `INTEGRITY_CHECK_FAILED`, `DOWNLOAD_FAILED` or `EXTRACT_FAILED` abort
    /// the install before `node_modules` is modified. Per-package link
    /// failures are collected in [`InstallReport::failures`] instead.
    pub async fn run(&self) -> Result<InstallReport, PkgError> {
        let keep = self.targets();
        let mut report = InstallReport {
            filtered: self
                .graph
                .reachable(&Platform::any(), self.options.production)
                .difference(&keep)
                .cloned()
                .collect(),
            ..InstallReport::default()
        };

        if self.options.dry_run {
            report.installed = keep;
            return Ok(report);
        }

        let computed = self.fetch_all(&keep).await?;
        report.fetched = computed.len();
        report.computed_integrity = computed.into_iter().flatten().collect();
        self.hashed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone_from(&report.computed_integrity);

        match self.options.linker {
            Linker::Hoisted => self.link_hoisted(&keep, &mut report),
            Linker::Isolated => self.link_isolated(&keep, &mut report),
        }

        info!(
            installed = report.installed.len(),
            unchanged = report.unchanged,
            fetched = report.fetched,
            failures = report.failures.len(),
            "install finished"
        );
        Ok(report)
    }

    /// One entry per package brought into the store, holding the computed
    /// integrity of tarballs that had none.
    async fn fetch_all(
        &self,
        keep: &BTreeSet<PackageKey>,
    ) -> Result<Vec<Option<(PackageKey, Integrity)>>, PkgError> {
        let missing: Vec<&ResolvedPackage> = keep
            .iter()
            .filter_map(|k| self.graph.packages.get(k))
            .filter(|p| !p.resolution.is_symlinked())
            .filter(|p| lacks_integrity(p) || !self.ctx.store.contains(p))
            .collect();
        debug!(missing = missing.len(), "fetching packages");

        stream::iter(missing)
            .map(|pkg| self.fetch_one(pkg))
            .buffer_unordered(self.options.concurrency.max(1))
            .try_collect()
            .await
    }

    async fn fetch_one(
        &self,
        pkg: &ResolvedPackage,
    ) -> Result<Option<(PackageKey, Integrity)>, PkgError> {
        let store = &self.ctx.store;
        if let Resolution::Git { url, commit } = &pkg.resolution {
            let checkout = git::clone_at(store, url, Some(commit)).await?;
            checkout.persist(store, pkg)?;
            return Ok(None);
        }

        let bytes = match self.prefetched.get(&pkg.key()) {
            Some(bytes) => bytes.clone(),
            None => self.download(pkg).await?,
        };
        let computed = match pkg.integrity.as_deref().and_then(Integrity::parse) {
            Some(integrity) => {
                integrity.verify(&pkg.identity(), &bytes)?;
                None
            }
            None => Some((pkg.key(), Integrity::compute(&bytes))),
        };

        let store = store.clone();
        let mut owned = pkg.clone();
        if let Some((_, integrity)) = &computed {
            owned.integrity = Some(integrity.as_str().to_string());
        }
        let dest = tokio::task::spawn_blocking(move || store.import_tarball(&owned, &bytes))
            .await
            .map_err(|e| PkgError::extract_failed(format!("extraction task failed: {e}")))??;
        debug!(package = %pkg.key(), dest = %dest.display(), "extracted");
        Ok(computed)
    }

    async fn download(&self, pkg: &ResolvedPackage) -> Result<Bytes, PkgError> {
        let registry = &self.ctx.registry;
        match &pkg.resolution {
            Resolution::Registry { tarball } if !tarball.is_empty() => {
                registry.fetch_tarball(tarball).await
            }
            Resolution::Registry { .. } => {
                // Lockfiles may omit the URL; ask the registry again.
                let packument = registry.fetch_manifest(&pkg.real_name).await?;
                let tarball = packument
                    .versions
                    .get(&pkg.version)
                    .and_then(|m| m.dist.as_ref())
                    .map(|d| d.tarball.clone())
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| PkgError::no_matching_version(&pkg.real_name, &pkg.version))?;
                registry.fetch_tarball(&tarball).await
            }
            Resolution::Tarball { url } => registry.fetch_tarball(url).await,
            Resolution::Github {
                owner,
                repo,
                committish,
            } => registry.fetch_tarball(&git::github_tarball_url(owner, repo, committish)).await,
            Resolution::LocalTarball { path } => {
                let abs = self.root.join(path);
                tokio::fs::read(&abs)
                    .await
                    .map(Bytes::from)
                    .map_err(|e| PkgError::file_not_found(format!("{}: {e}", abs.display())))
            }
            Resolution::Git { .. }
            | Resolution::Folder { .. }
            | Resolution::Link { .. }
            | Resolution::Workspace { .. } => {
                Err(PkgError::download_failed(format!("{} has no tarball", pkg.identity())))
            }
        }
    }

    fn link_hoisted(&self, keep: &BTreeSet<PackageKey>, report: &mut InstallReport) {
        let plan = HoistPlan::plan(self.graph, keep, self.options.production);
        let mut by_depth: BTreeMap<usize, Vec<(&TreePath, &PackageKey)>> = BTreeMap::new();
        for (path, key) in plan.slots() {
            by_depth.entry(path.len()).or_default().push((path, key));
        }

        // Real directory of every placed slot; children go in its node_modules.
        let mut dirs: BTreeMap<TreePath, PathBuf> = BTreeMap::new();
        let mut bins = Vec::new();

        for slots in by_depth.values() {
            let jobs: Vec<(&TreePath, &PackageKey, PathBuf)> = slots
                .iter()
                .filter_map(|(path, key)| {
                    let parent = &path[..path.len() - 1];
                    let base = if parent.is_empty() {
                        self.root.clone()
                    } else {
                        dirs.get(parent)?.clone()
                    };
                    Some((*path, *key, base.join("node_modules")))
                })
                .collect();

            let results: Vec<Result<(PathBuf, bool), PkgError>> = jobs
                .par_iter()
                .map(|(path, key, node_modules)| {
                    let pkg = self.package(key)?;
                    let name = path.last().map_or(pkg.name.as_str(), String::as_str);
                    self.place(node_modules, name, pkg)
                })
                .collect();

            for ((path, key, node_modules), result) in jobs.into_iter().zip(results) {
                match result {
                    Ok((dir, changed)) => {
                        record(report, key, changed);
                        let pkg = self.graph.packages.get(key);
                        if let (Some(pkg), Some(name)) = (pkg, path.last()) {
                            if !pkg.bin.is_empty() {
                                let slot = package_dir(&node_modules, name);
                                bins.push((node_modules, slot, pkg));
                            }
                        }
                        dirs.insert(path.clone(), dir);
                    }
                    Err(err) => report.failures.push(err),
                }
            }
        }

        for (node_modules, dir, pkg) in bins {
            match link_bins(&node_modules, &dir, &pkg.bin) {
                Ok(created) => report.bins += created.len(),
                Err(err) => report.failures.push(err),
            }
        }
    }

    fn link_isolated(&self, keep: &BTreeSet<PackageKey>, report: &mut InstallReport) {
        let packages: Vec<&ResolvedPackage> =
            keep.iter().filter_map(|k| self.graph.packages.get(k)).collect();

        // Each package once, under .bun/<entry>/node_modules/<name>.
        let results: Vec<(PackageKey, Result<(PathBuf, bool), PkgError>)> = packages
            .par_iter()
            .filter(|p| !p.resolution.is_symlinked())
            .map(|pkg| {
                let node_modules = self.isolated_node_modules(pkg);
                (pkg.key(), self.place(&node_modules, &pkg.name, pkg))
            })
            .collect();
        let mut locations: HashMap<PackageKey, PathBuf> = HashMap::new();
        for (key, result) in results {
            match result {
                Ok((dir, changed)) => {
                    record(report, &key, changed);
                    locations.insert(key, dir);
                }
                Err(err) => report.failures.push(err),
            }
        }
        for pkg in packages.iter().filter(|p| p.resolution.is_symlinked()) {
            match self.symlink_target(pkg) {
                Ok(dir) => {
                    locations.insert(pkg.key(), dir);
                }
                Err(err) => report.failures.push(err),
            }
        }

        // Dependencies next to each package.
        let link_results: Vec<Result<(), PkgError>> = packages
            .par_iter()
            .filter(|p| !p.resolution.is_symlinked())
            .flat_map_iter(|pkg| {
                let node_modules = self.isolated_node_modules(pkg);
                let locations = &locations;
                pkg.dependencies.iter().filter_map(move |(name, edge)| {
                    let target = locations.get(edge.target.as_ref()?)?;
                    Some(link_package(&node_modules, name, target).map(|_| ()))
                })
            })
            .collect();
        report.failures.extend(link_results.into_iter().filter_map(Result::err));

        // Each workspace's direct dependencies in its own node_modules.
        for (path, ws) in &self.graph.workspaces {
            let ws_dir = if path == ROOT_WORKSPACE {
                self.root.clone()
            } else {
                self.root.join(path)
            };
            let node_modules = ws_dir.join("node_modules");
            for (name, edge) in &ws.dependencies {
                if self.options.production && !edge.kind.is_production() {
                    continue;
                }
                let Some(key) = edge.target.as_ref() else {
                    continue;
                };
                let Some(target) = locations.get(key) else {
                    continue;
                };
                let was_linked = points_to(&package_dir(&node_modules, name), target);
                match link_package(&node_modules, name, target) {
                    Ok(link) => {
                        if !was_linked {
                            report.installed.insert(key.clone());
                        }
                        if let Some(pkg) = self.graph.packages.get(key) {
                            match link_bins(&node_modules, &link, &pkg.bin) {
                                Ok(created) => report.bins += created.len(),
                                Err(err) => report.failures.push(err),
                            }
                        }
                    }
                    Err(err) => report.failures.push(err),
                }
            }
        }
    }

    /// Put `pkg` at `<node_modules>/<name>`. Returns its real directory and
    /// whether anything changed.
    fn place(
        &self,
        node_modules: &Path,
        name: &str,
        pkg: &ResolvedPackage,
    ) -> Result<(PathBuf, bool), PkgError> {
        let dest = package_dir(node_modules, name);
        let lock = self.locks.get(&dest);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if pkg.resolution.is_symlinked() {
            let target = self.symlink_target(pkg)?;
            let changed = !points_to(&dest, &target);
            link_package(node_modules, name, &target)?;
            return Ok((target, changed));
        }

        if is_current(&dest, pkg) {
            return Ok((dest, false));
        }

        let src = self.store_dir(pkg);
        let staging = unique_sibling(&dest, "stage");
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PkgError::link_failed(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let mode = hardlink_dir_all(&src, &staging).map_err(|e| {
            let _ = remove_path(&staging);
            PkgError::link_failed(format!("failed to materialize {}: {e}", pkg.identity()))
        })?;
        remove_path(&dest)
            .and_then(|()| fs::rename(&staging, &dest))
            .map_err(|e| {
                let _ = remove_path(&staging);
                PkgError::link_failed(format!("failed to place {}: {e}", dest.display()))
            })?;
        debug!(package = %pkg.key(), dest = %dest.display(), ?mode, "placed");
        Ok((dest, true))
    }

    fn symlink_target(&self, pkg: &ResolvedPackage) -> Result<PathBuf, PkgError> {
        match &pkg.resolution {
            Resolution::Workspace { path } | Resolution::Folder { path } => {
                Ok(self.root.join(path))
            }
            Resolution::Link { name } => self.ctx.links.lookup(name).ok_or_else(|| {
                PkgError::file_not_found(format!(
                    "link:{name} not found; run `tarn link` in the package directory first"
                ))
            }),
            _ => Ok(self.store_dir(pkg)),
        }
    }

    /// Store entry of `pkg`, keyed by the integrity computed during this
    /// install when the graph had none.
    fn store_dir(&self, pkg: &ResolvedPackage) -> PathBuf {
        let hashed = self.hashed.lock().unwrap_or_else(PoisonError::into_inner);
        match hashed.get(&pkg.key()) {
            Some(integrity) => {
                let mut pkg = pkg.clone();
                pkg.integrity = Some(integrity.as_str().to_string());
                self.ctx.store.entry_dir(&pkg)
            }
            None => self.ctx.store.entry_dir(pkg),
        }
    }

    fn isolated_node_modules(&self, pkg: &ResolvedPackage) -> PathBuf {
        self.root
            .join("node_modules")
            .join(ISOLATED_DIR)
            .join(isolated_entry(pkg))
            .join("node_modules")
    }

    fn package(&self, key: &str) -> Result<&ResolvedPackage, PkgError> {
        self.graph
            .packages
            .get(key)
            .ok_or_else(|| {
                PkgError::new(codes::LOCKFILE_INVALID, format!("{key} is missing from the graph"))
            })
    }
}

fn record(report: &mut InstallReport, key: &PackageKey, changed: bool) {
    if changed {
        report.installed.insert(key.clone());
    } else {
        report.unchanged += 1;
    }
}

/// Directory name of `pkg` under `node_modules/.bun`.
#[must_use]
pub fn isolated_entry(pkg: &ResolvedPackage) -> String {
    let name = pkg.name.replace('/', "+");
    match &pkg.resolution {
        Resolution::Registry { .. } if pkg.name == pkg.real_name => {
            format!("{name}@{}", pkg.version)
        }
        _ => format!("{name}@{}", &blake3_bytes(pkg.key().as_bytes())[..16]),
    }
}

/// Whether `dest` already holds this exact package as a real directory.
fn is_current(dest: &Path, pkg: &ResolvedPackage) -> bool {
    let Ok(meta) = dest.symlink_metadata() else {
        return false;
    };
    if !meta.is_dir() {
        return false;
    }
    let Ok(bytes) = fs::read(dest.join("package.json")) else {
        return false;
    };
    let Ok(manifest) = super::manifest::PackageManifest::from_slice(&bytes) else {
        return false;
    };
    manifest.name == pkg.real_name && manifest.version == pkg.version
}
