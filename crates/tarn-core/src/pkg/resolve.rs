//! Dependency resolution.
//!
//! Resolution proceeds in waves: every request discovered in one wave is
//! resolved concurrently, then the results are merged in request order so
//! the graph does not depend on network timing. Children of newly added
//! packages form the next wave.

use super::context::Context;
use super::error::PkgError;
use super::git;
use super::graph::{
    DependencyGraph, Edge, EdgeKind, PackageKey, Resolution, ResolvedPackage, WorkspaceEntry,
};
use super::integrity::Integrity;
use super::manifest::{DeclaredDependency, PackageManifest};
use super::spec::{Specifier, TarballSource};
use super::tarball::read_package_json_from_tarball;
use super::version::version_satisfies;
use super::workspaces::{WorkspaceMember, WorkspaceSet};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tarn_util::fs::relative_path;
use tracing::{debug, warn};

/// Manifest requests in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 32;

/// What [`Resolver::resolve`] produced.
#[derive(Debug, Default)]
pub struct ResolveOutput {
    pub graph: DependencyGraph,
    /// Packages whose `os`/`cpu` exclude the target platform.
    pub filtered: BTreeSet<PackageKey>,
    /// Distinct manifests requested from the registry.
    pub fetched: usize,
    /// Packages taken unchanged from the lockfile.
    pub reused: usize,
    /// Tarballs downloaded while resolving, reused by the installer.
    pub prefetched: HashMap<PackageKey, Bytes>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Owner {
    Workspace(String),
    Package(PackageKey),
}

#[derive(Debug, Clone)]
struct Request {
    owner: Owner,
    name: String,
    spec: String,
    kind: EdgeKind,
    /// Directory relative `file:` specifiers are resolved against.
    base: PathBuf,
}

impl Request {
    /// Requests with the same memo key resolve to the same package.
    fn memo_key(&self) -> (String, String, PathBuf, bool) {
        (
            self.name.clone(),
            self.spec.clone(),
            self.base.clone(),
            matches!(self.owner, Owner::Workspace(_)),
        )
    }

    fn display(&self) -> String {
        format!("{}@{}", self.name, self.spec)
    }
}

enum Outcome {
    /// Bound to a workspace member.
    Bound(PackageKey),
    Resolved(Box<Resolved>),
}

struct Resolved {
    pkg: ResolvedPackage,
    children: Vec<DeclaredDependency>,
    base: PathBuf,
    tarball: Option<Bytes>,
    manifest_fetched: Option<String>,
    reused: bool,
    warning: Option<String>,
}

impl Resolved {
    fn new(pkg: ResolvedPackage, base: PathBuf) -> Self {
        Self {
            pkg,
            children: Vec::new(),
            base,
            tarball: None,
            manifest_fetched: None,
            reused: false,
            warning: None,
        }
    }
}

/// Turns workspace manifests into a [`DependencyGraph`].
pub struct Resolver<'a> {
    ctx: &'a Context,
    workspaces: &'a WorkspaceSet,
    lockfile: Option<&'a DependencyGraph>,
    concurrency: usize,
}

impl<'a> Resolver<'a> {
    #[must_use]
    pub fn new(ctx: &'a Context, workspaces: &'a WorkspaceSet) -> Self {
        Self {
            ctx,
            workspaces,
            lockfile: None,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Prefer versions recorded in `lockfile` while their specifiers are unchanged.
    #[must_use]
    pub fn with_lockfile(mut self, lockfile: Option<&'a DependencyGraph>) -> Self {
        self.lockfile = lockfile;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Resolve every workspace's dependencies.
    ///
    /// # Errors
    /// `PACKAGE_NOT_FOUND`, `VERSION_CONFLICT`, `RESOLVE_FAILED`, or
    /// `INVALID_SPECIFIER` for the first failing non-optional dependency.
    pub async fn resolve(&self) -> Result<ResolveOutput, PkgError> {
        let mut out = ResolveOutput::default();
        let mut queue = self.seed(&mut out.graph);
        let mut memo: HashMap<(String, String, PathBuf, bool), PackageKey> = HashMap::new();
        let mut skipped: HashSet<(String, String, PathBuf, bool)> = HashSet::new();
        let mut fetched = BTreeSet::new();
        let mut wave_index = 0usize;

        while !queue.is_empty() {
            let wave = std::mem::take(&mut queue);
            wave_index += 1;

            let mut seen = HashSet::new();
            let pending: Vec<&Request> = wave
                .iter()
                .filter(|r| {
                    let key = r.memo_key();
                    !memo.contains_key(&key) && !skipped.contains(&key) && seen.insert(key)
                })
                .collect();
            debug!(wave = wave_index, requests = wave.len(), pending = pending.len(), "resolving");

            let results: Vec<Result<Outcome, PkgError>> =
                stream::iter(pending.iter().map(|r| self.resolve_request(r)))
                    .buffered(self.concurrency)
                    .collect()
                    .await;
            let mut results: HashMap<_, _> = pending
                .iter()
                .map(|r| r.memo_key())
                .zip(results)
                .collect();

            for request in &wave {
                let memo_key = request.memo_key();
                if let Some(key) = memo.get(&memo_key) {
                    let bound = out
                        .graph
                        .packages
                        .get(key)
                        .is_some_and(|p| matches!(p.resolution, Resolution::Workspace { .. }));
                    let key = key.clone();
                    set_edge(&mut out.graph, request, Some(key), bound);
                    continue;
                }

                match results.remove(&memo_key) {
                    Some(Ok(Outcome::Bound(key))) => {
                        memo.insert(memo_key, key.clone());
                        set_edge(&mut out.graph, request, Some(key), true);
                    }
                    Some(Ok(Outcome::Resolved(resolved))) => {
                        let resolved = *resolved;
                        let key = resolved.pkg.key();
                        memo.insert(memo_key, key.clone());
                        if let Some(warning) = resolved.warning {
                            warn!("{warning}");
                            out.warnings.push(warning);
                        }
                        if !out.graph.packages.contains_key(&key) {
                            if let Some(name) = resolved.manifest_fetched {
                                fetched.insert(name);
                            }
                            if resolved.reused {
                                out.reused += 1;
                            }
                            if let Some(bytes) = resolved.tarball {
                                out.prefetched.insert(key.clone(), bytes);
                            }
                            let mut pkg = resolved.pkg;
                            if self.ctx.platform.allows(&pkg.os, &pkg.cpu) {
                                for child in resolved.children {
                                    queue.push(Request {
                                        owner: Owner::Package(key.clone()),
                                        name: child.name,
                                        spec: child.spec,
                                        kind: child.kind,
                                        base: resolved.base.clone(),
                                    });
                                }
                            } else {
                                // Left unresolved for other platforms to fill from the lockfile.
                                debug!(package = %key, "platform excluded; skipping dependencies");
                                for child in resolved.children {
                                    let edge = Edge {
                                        spec: child.spec,
                                        kind: child.kind,
                                        target: None,
                                    };
                                    pkg.dependencies.insert(child.name, edge);
                                }
                            }
                            out.graph.packages.insert(key.clone(), pkg);
                        }
                        set_edge(&mut out.graph, request, Some(key), false);
                    }
                    Some(Err(err)) if request.kind == EdgeKind::Optional => {
                        let warning = format!(
                            "optional dependency {} skipped: {}",
                            request.display(),
                            err.message()
                        );
                        warn!("{warning}");
                        out.warnings.push(warning);
                        skipped.insert(memo_key);
                        set_edge(&mut out.graph, request, None, false);
                    }
                    Some(Err(err)) => return Err(err),
                    None => set_edge(&mut out.graph, request, None, false),
                }
            }
        }

        out.fetched = fetched.len();
        out.filtered = out
            .graph
            .packages
            .iter()
            .filter(|(_, p)| !self.ctx.platform.allows(&p.os, &p.cpu))
            .map(|(k, _)| k.clone())
            .collect();
        debug!(
            packages = out.graph.packages.len(),
            filtered = out.filtered.len(),
            fetched = out.fetched,
            reused = out.reused,
            "resolution complete"
        );
        Ok(out)
    }

    /// Workspace entries, member nodes, and the first wave of requests.
    fn seed(&self, graph: &mut DependencyGraph) -> Vec<Request> {
        let mut queue = Vec::new();
        for member in self.workspaces.members.values() {
            let manifest = &member.manifest;
            graph.workspaces.insert(
                member.path.clone(),
                WorkspaceEntry {
                    name: manifest.name.clone(),
                    version: Some(manifest.version.clone()).filter(|v| !v.is_empty()),
                    dependencies: std::collections::BTreeMap::new(),
                },
            );
            if !member.path.is_empty() {
                let pkg = workspace_package(member);
                graph.packages.insert(pkg.key(), pkg);
            }
            for dep in manifest.declared_dependencies(true) {
                queue.push(Request {
                    owner: Owner::Workspace(member.path.clone()),
                    name: dep.name,
                    spec: dep.spec,
                    kind: dep.kind,
                    base: member.dir.clone(),
                });
            }
        }
        queue
    }

    async fn resolve_request(&self, request: &Request) -> Result<Outcome, PkgError> {
        let spec = Specifier::parse(&request.spec)?;

        if matches!(request.owner, Owner::Workspace(_)) {
            if let Some(key) = self.bind_workspace(request, &spec)? {
                return Ok(Outcome::Bound(key));
            }
        }
        if let Some(reused) = self.reuse_locked(request, &spec) {
            return Ok(Outcome::Resolved(Box::new(reused)));
        }

        let resolved = match &spec {
            Specifier::SemverRange(_) | Specifier::DistTag(_) => {
                self.from_registry(request, &request.name, &spec).await?
            }
            Specifier::NpmAlias { name, spec: inner } if inner.is_registry() => {
                self.from_registry(request, name, inner).await?
            }
            Specifier::NpmAlias { .. } | Specifier::Workspace(_) => {
                return Err(PkgError::resolve_failed(format!(
                    "{} failed to resolve",
                    request.display()
                )))
            }
            Specifier::Tarball(TarballSource::Url(url)) => {
                let bytes = self.ctx.registry.fetch_tarball(url).await?;
                self.from_tarball(request, Resolution::Tarball { url: url.clone() }, bytes)?
            }
            Specifier::Tarball(TarballSource::Path(path)) => {
                let abs = request.base.join(path);
                let bytes = tokio::fs::read(&abs).await.map_err(|e| {
                    PkgError::resolve_failed(format!("{} failed to resolve: {e}", request.spec))
                })?;
                let resolution = Resolution::LocalTarball {
                    path: self.root_relative(&abs),
                };
                self.from_tarball(request, resolution, Bytes::from(bytes))?
            }
            Specifier::LocalFolder(path) => self.from_folder(request, path)?,
            Specifier::Link(name) => self.from_link(request, name),
            Specifier::GithubRepo {
                owner,
                repo,
                committish,
            } => self.from_github(request, owner, repo, committish.as_deref()).await?,
            Specifier::GitUrl(source) => {
                let committish = source.committish.as_deref();
                let checkout = git::clone_at(&self.ctx.store, &source.url, committish).await?;
                let resolution = Resolution::Git {
                    url: source.url.clone(),
                    commit: checkout.commit.clone(),
                };
                let manifest = checkout.manifest.clone();
                let mut resolved = Resolved::new(
                    package_from_manifest(&request.name, &manifest, resolution, None),
                    self.workspaces.root.clone(),
                );
                checkout.persist(&self.ctx.store, &resolved.pkg)?;
                resolved.children = manifest.declared_dependencies(false);
                resolved
            }
        };
        Ok(Outcome::Resolved(Box::new(resolved)))
    }

    fn bind_workspace(
        &self,
        request: &Request,
        spec: &Specifier,
    ) -> Result<Option<PackageKey>, PkgError> {
        let member = self.workspaces.by_name(&request.name);
        match (spec, member) {
            (Specifier::Workspace(range), Some(member)) => {
                let version = &member.manifest.version;
                if workspace_range_accepts(range, version) {
                    Ok(Some(workspace_package(member).key()))
                } else {
                    Err(PkgError::version_conflict(format!(
                        "{} does not match workspace package {} at version {version}",
                        request.display(),
                        request.name
                    )))
                }
            }
            (Specifier::Workspace(_), None) => Err(PkgError::resolve_failed(format!(
                "{} failed to resolve: no workspace package named \"{}\"",
                request.display(),
                request.name
            ))),
            (Specifier::SemverRange(range), Some(member))
                if version_satisfies(&member.manifest.version, range) =>
            {
                Ok(Some(workspace_package(member).key()))
            }
            _ => Ok(None),
        }
    }

    /// The locked package for `request`, if its specifier is unchanged and still satisfied.
    fn reuse_locked(&self, request: &Request, spec: &Specifier) -> Option<Resolved> {
        let lock = self.lockfile?;
        let edge = match &request.owner {
            Owner::Workspace(path) => lock.workspaces.get(path)?.dependencies.get(&request.name)?,
            Owner::Package(key) => lock.packages.get(key)?.dependencies.get(&request.name)?,
        };
        if edge.spec != request.spec {
            return None;
        }
        let locked = lock.packages.get(edge.target.as_ref()?)?;
        if locked.name != request.name {
            return None;
        }

        let acceptable = match (&locked.resolution, spec) {
            (Resolution::Registry { .. }, Specifier::SemverRange(range)) => {
                locked.real_name == request.name && version_satisfies(&locked.version, range)
            }
            (Resolution::Registry { .. }, Specifier::DistTag(_)) => {
                locked.real_name == request.name
            }
            (Resolution::Registry { .. }, Specifier::NpmAlias { name, spec: inner }) => {
                locked.real_name == *name
                    && match inner.as_ref() {
                        Specifier::SemverRange(range) => version_satisfies(&locked.version, range),
                        _ => true,
                    }
            }
            (
                Resolution::Tarball { .. }
                | Resolution::LocalTarball { .. }
                | Resolution::Github { .. }
                | Resolution::Git { .. },
                _,
            ) => true,
            _ => false,
        };
        if !acceptable {
            return None;
        }

        let mut pkg = locked.clone();
        let children = std::mem::take(&mut pkg.dependencies)
            .into_iter()
            .map(|(name, edge)| DeclaredDependency {
                name,
                spec: edge.spec,
                kind: edge.kind,
            })
            .collect();
        debug!(package = %pkg.key(), "reusing locked version");

        let mut resolved = Resolved::new(pkg, self.workspaces.root.clone());
        resolved.children = children;
        resolved.reused = true;
        Some(resolved)
    }

    async fn from_registry(
        &self,
        request: &Request,
        real_name: &str,
        spec: &Specifier,
    ) -> Result<Resolved, PkgError> {
        let packument = self.ctx.registry.fetch_manifest(real_name).await?;
        let manifest = packument.select(spec, &request.spec)?;

        let mut manifest = manifest.clone();
        if manifest.name.is_empty() {
            manifest.name = real_name.to_string();
        }
        let dist = manifest.dist.clone().unwrap_or_default();
        let integrity = dist
            .integrity
            .filter(|i| Integrity::parse(i).is_some());
        let resolution = Resolution::Registry {
            tarball: dist.tarball,
        };

        let mut pkg = package_from_manifest(&request.name, &manifest, resolution, integrity);
        pkg.real_name = real_name.to_string();

        let mut resolved = Resolved::new(pkg, self.workspaces.root.clone());
        resolved.children = manifest.declared_dependencies(false);
        resolved.manifest_fetched = Some(real_name.to_string());
        Ok(resolved)
    }

    fn from_tarball(
        &self,
        request: &Request,
        resolution: Resolution,
        bytes: Bytes,
    ) -> Result<Resolved, PkgError> {
        let manifest = read_package_json_from_tarball(&bytes).map_err(|e| {
            PkgError::resolve_failed(format!("{} failed to resolve: {}", request.spec, e.message()))
        })?;
        let integrity = Integrity::compute(&bytes).as_str().to_string();

        let pkg = package_from_manifest(&request.name, &manifest, resolution, Some(integrity));
        let mut resolved = Resolved::new(pkg, self.workspaces.root.clone());
        resolved.children = manifest.declared_dependencies(false);
        resolved.tarball = Some(bytes);
        Ok(resolved)
    }

    fn from_folder(&self, request: &Request, path: &Path) -> Result<Resolved, PkgError> {
        let abs = request.base.join(path);
        let manifest_path = abs.join("package.json");
        if !manifest_path.is_file() {
            return Err(PkgError::resolve_failed(format!("{} failed to resolve", request.spec)));
        }
        let manifest = PackageManifest::read(&manifest_path)?;
        let resolution = Resolution::Folder {
            path: self.root_relative(&abs),
        };

        let pkg = package_from_manifest(&request.name, &manifest, resolution, None);
        let mut resolved = Resolved::new(pkg, dunce::canonicalize(&abs).unwrap_or(abs));
        resolved.children = manifest.declared_dependencies(false);
        Ok(resolved)
    }

    fn from_link(&self, request: &Request, link_name: &str) -> Resolved {
        let resolution = Resolution::Link {
            name: link_name.to_string(),
        };
        let target = self.ctx.links.lookup(link_name);
        let manifest = target
            .as_ref()
            .and_then(|dir| PackageManifest::read(&dir.join("package.json")).ok())
            .unwrap_or_default();

        let pkg = package_from_manifest(&request.name, &manifest, resolution, None);
        let mut resolved = Resolved::new(pkg, self.workspaces.root.clone());
        if target.is_none() {
            resolved.warning = Some(format!(
                "{} is not registered; run `tarn link` in its directory",
                request.display()
            ));
        }
        resolved
    }

    async fn from_github(
        &self,
        request: &Request,
        owner: &str,
        repo: &str,
        committish: Option<&str>,
    ) -> Result<Resolved, PkgError> {
        let remote = format!("https://github.com/{owner}/{repo}.git");
        let (commit, warning) = match git::ls_remote(&remote, committish).await {
            Ok(commit) => (commit, None),
            Err(err) => {
                let reference = committish.unwrap_or("HEAD").to_string();
                let warning = format!(
                    "could not pin {}: {}; using {reference}",
                    request.display(),
                    err.message()
                );
                (reference, Some(warning))
            }
        };

        let url = git::github_tarball_url(owner, repo, &commit);
        let bytes = self.ctx.registry.fetch_tarball(&url).await?;
        let resolution = Resolution::Github {
            owner: owner.to_string(),
            repo: repo.to_string(),
            committish: commit,
        };
        let mut resolved = self.from_tarball(request, resolution, bytes)?;
        resolved.warning = warning;
        Ok(resolved)
    }

    /// `abs` relative to the project root, with `/` separators.
    fn root_relative(&self, abs: &Path) -> String {
        let root = &self.workspaces.root;
        let root = dunce::canonicalize(root).unwrap_or_else(|_| root.clone());
        let abs = dunce::canonicalize(abs).unwrap_or_else(|_| abs.to_path_buf());
        relative_path(&root, &abs)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn set_edge(
    graph: &mut DependencyGraph,
    request: &Request,
    target: Option<PackageKey>,
    bound: bool,
) {
    let kind = if bound && request.kind == EdgeKind::Prod {
        EdgeKind::Workspace
    } else {
        request.kind
    };
    let edge = Edge {
        spec: request.spec.clone(),
        kind,
        target,
    };
    let deps = match &request.owner {
        Owner::Workspace(path) => graph.workspaces.get_mut(path).map(|w| &mut w.dependencies),
        Owner::Package(key) => graph.packages.get_mut(key).map(|p| &mut p.dependencies),
    };
    if let Some(deps) = deps {
        deps.insert(request.name.clone(), edge);
    }
}

/// `workspace:*`, `workspace:^` and `workspace:~` accept any version.
fn workspace_range_accepts(range: &str, version: &str) -> bool {
    match range.trim() {
        "" | "*" | "^" | "~" => true,
        range => version_satisfies(version, range),
    }
}

fn workspace_package(member: &WorkspaceMember) -> ResolvedPackage {
    let resolution = Resolution::Workspace {
        path: member.path.clone(),
    };
    package_from_manifest(member.name(), &member.manifest, resolution, None)
}

fn package_from_manifest(
    install_name: &str,
    manifest: &PackageManifest,
    resolution: Resolution,
    integrity: Option<String>,
) -> ResolvedPackage {
    let real_name = if manifest.name.is_empty() {
        install_name.to_string()
    } else {
        manifest.name.clone()
    };
    ResolvedPackage {
        name: install_name.to_string(),
        real_name,
        version: manifest.version.clone(),
        resolution,
        integrity,
        bin: manifest.bin_entries(),
        os: manifest.os.clone(),
        cpu: manifest.cpu.clone(),
        dependencies: std::collections::BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstallConfig;
    use crate::pkg::context::ContextOptions;
    use crate::pkg::error::codes;
    use crate::pkg::platform::{Platform, TargetSet};
    use crate::pkg::retry::RetryPolicy;
    use crate::pkg::tarball::tests::build_tgz;
    use crate::pkg::test_registry::MockRegistry;
    use serde_json::json;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        project: TempDir,
        _cache: TempDir,
        options: ContextOptions,
        ctx: Context,
    }

    impl Fixture {
        /// A context with empty in-memory caches.
        fn fresh_ctx(&self) -> Context {
            Context::new(self.project.path(), InstallConfig::default(), self.options.clone()).unwrap()
        }
    }

    async fn fixture(registry: &MockRegistry, package_json: serde_json::Value) -> Fixture {
        let base = registry.serve().await;
        let project = tempdir().unwrap();
        let cache = tempdir().unwrap();
        fs::write(project.path().join("package.json"), package_json.to_string()).unwrap();
        let options = ContextOptions {
            registry: Some(base),
            cache_dir: Some(cache.path().to_path_buf()),
            link_dir: Some(cache.path().join("links")),
            platform: Platform::any(),
            retry: RetryPolicy::immediate(1),
            ..ContextOptions::default()
        };
        let ctx = Context::new(project.path(), InstallConfig::default(), options.clone()).unwrap();
        Fixture {
            project,
            _cache: cache,
            options,
            ctx,
        }
    }

    async fn resolve_with(
        ctx: &Context,
        fx: &Fixture,
        lock: Option<&DependencyGraph>,
    ) -> Result<ResolveOutput, PkgError> {
        let set = WorkspaceSet::load(fx.project.path()).unwrap();
        Resolver::new(ctx, &set).with_lockfile(lock).resolve().await
    }

    async fn resolve(fx: &Fixture, lock: Option<&DependencyGraph>) -> Result<ResolveOutput, PkgError> {
        resolve_with(&fx.ctx, fx, lock).await
    }

    fn root_target<'g>(graph: &'g DependencyGraph, name: &str) -> Option<&'g str> {
        graph.workspaces[""].dependencies[name].target.as_deref()
    }

    #[tokio::test]
    async fn test_resolves_transitive_registry_graph() {
        let registry = MockRegistry::default();
        registry.publish("a", "1.0.0", json!({"dependencies": {"b": "^1.0.0"}}));
        registry.publish("b", "1.0.0", json!({}));
        registry.publish("b", "1.2.0", json!({}));
        registry.publish("b", "2.0.0", json!({}));
        let fx = fixture(&registry, json!({"dependencies": {"a": "^1", "b": "2.0.0"}})).await;

        let out = resolve(&fx, None).await.unwrap();
        let graph = &out.graph;
        assert_eq!(root_target(graph, "a"), Some("a@1.0.0"));
        assert_eq!(root_target(graph, "b"), Some("b@2.0.0"));
        assert_eq!(
            graph.packages["a@1.0.0"].dependencies["b"].target.as_deref(),
            Some("b@1.2.0")
        );
        assert_eq!(graph.packages.len(), 3);
        assert_eq!(out.fetched, 2);
        assert!(graph.packages["b@1.2.0"].integrity.as_deref().unwrap().starts_with("sha512-"));
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic() {
        let registry = MockRegistry::default();
        for name in ["x", "y", "z"] {
            registry.publish(name, "1.0.0", json!({"dependencies": {"shared": "*"}}));
        }
        registry.publish("shared", "1.0.0", json!({}));
        registry.publish("shared", "1.1.0", json!({}));
        let fx = fixture(&registry, json!({"dependencies": {"x": "1", "y": "1", "z": "1"}})).await;

        let first = resolve(&fx, None).await.unwrap().graph;
        let second = resolve(&fx, None).await.unwrap().graph;
        assert_eq!(first, second);
        assert_eq!(
            crate::pkg::lockfile::text::encode(&first),
            crate::pkg::lockfile::text::encode(&second)
        );
    }

    #[tokio::test]
    async fn test_precedence_and_aliases() {
        let registry = MockRegistry::default();
        registry.publish("baz", "0.0.3", json!({}));
        registry.publish("baz", "0.0.5", json!({}));
        let fx = fixture(
            &registry,
            json!({
                "dependencies": {"baz": "0.0.3", "bar": "npm:baz@0.0.3"},
                "optionalDependencies": {"baz": "0.0.5"},
                "peerDependencies": {"baz": "0.0.3"}
            }),
        )
        .await;

        let graph = resolve(&fx, None).await.unwrap().graph;
        let baz = &graph.workspaces[""].dependencies["baz"];
        assert_eq!(baz.kind, EdgeKind::Optional);
        assert_eq!(baz.target.as_deref(), Some("baz@0.0.5"));
        assert_eq!(root_target(&graph, "bar"), Some("bar@npm:baz@0.0.3"));
        assert_eq!(graph.packages["bar@npm:baz@0.0.3"].real_name, "baz");
        assert!(!graph.packages.contains_key("baz@0.0.3"));
    }

    #[tokio::test]
    async fn test_missing_version_is_not_found() {
        let registry = MockRegistry::default();
        registry.publish("left", "1.0.0", json!({}));
        let fx = fixture(&registry, json!({"dependencies": {"left": "1.2.3"}})).await;
        let err = resolve(&fx, None).await.unwrap_err();
        assert_eq!(err.code(), codes::PACKAGE_NOT_FOUND);
        assert_eq!(err.message(), "left@1.2.3 failed to resolve");
    }

    #[tokio::test]
    async fn test_failed_optional_is_skipped() {
        let registry = MockRegistry::default();
        let fx = fixture(&registry, json!({"optionalDependencies": {"ghost": "^1"}})).await;
        let out = resolve(&fx, None).await.unwrap();
        assert_eq!(root_target(&out.graph, "ghost"), None);
        assert_eq!(out.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_platform_filtered_packages_recorded() {
        let registry = MockRegistry::default();
        registry.publish("native", "1.0.0", json!({"cpu": ["!arm64"]}));
        let mut fx = fixture(&registry, json!({"optionalDependencies": {"native": "1.0.0"}})).await;

        fx.ctx.platform = Platform {
            os: TargetSet::Any,
            cpu: TargetSet::OneOf(vec!["arm64".to_string()]),
        };
        let out = resolve(&fx, None).await.unwrap();
        assert!(out.filtered.contains("native@1.0.0"));
        assert!(out.graph.reachable(&fx.ctx.platform, false).is_empty());

        fx.ctx.platform = Platform::any();
        assert!(resolve(&fx, None).await.unwrap().filtered.is_empty());
    }

    #[tokio::test]
    async fn test_serial_resolution_matches_concurrent() {
        let registry = MockRegistry::default();
        registry.publish("a", "1.0.0", json!({"dependencies": {"c": "^1.0.0"}}));
        registry.publish("b", "1.0.0", json!({"dependencies": {"c": "1.0.0"}}));
        registry.publish("c", "1.0.0", json!({}));
        registry.publish("c", "1.1.0", json!({}));
        let fx = fixture(&registry, json!({"dependencies": {"a": "1.0.0", "b": "1.0.0"}})).await;

        let set = WorkspaceSet::load(fx.project.path()).unwrap();
        let concurrent = Resolver::new(&fx.ctx, &set).resolve().await.unwrap();
        let serial_ctx = fx.fresh_ctx();
        let serial = Resolver::new(&serial_ctx, &set).with_concurrency(0).resolve().await.unwrap();
        assert_eq!(serial.graph, concurrent.graph);
        assert!(serial.graph.packages.contains_key("c@1.1.0"));
        assert!(serial.graph.packages.contains_key("c@1.0.0"));
    }

    #[tokio::test]
    async fn test_filtered_package_subtree_not_traversed() {
        let registry = MockRegistry::default();
        registry.publish("native", "1.0.0", json!({"cpu": ["x64"], "dependencies": {"helper": "^1.0.0"}}));
        let mut fx = fixture(&registry, json!({"optionalDependencies": {"native": "1.0.0"}})).await;
        fx.ctx.platform = Platform {
            os: TargetSet::Any,
            cpu: TargetSet::OneOf(vec!["arm64".to_string()]),
        };

        // `helper` is not published: traversing it would fail the resolve.
        let out = resolve(&fx, None).await.unwrap();
        assert!(out.warnings.is_empty(), "{:?}", out.warnings);
        assert!(out.filtered.contains("native@1.0.0"));
        assert!(!out.graph.packages.keys().any(|k| k.starts_with("helper@")));
        let edge = &out.graph.packages["native@1.0.0"].dependencies["helper"];
        assert_eq!(edge.spec, "^1.0.0");
        assert_eq!(edge.target, None);

        // A platform that allows `native` resolves the subtree from the lockfile entry.
        registry.publish("helper", "1.2.0", json!({}));
        let mut ctx = fx.fresh_ctx();
        ctx.platform = Platform::any();
        let again = resolve_with(&ctx, &fx, Some(&out.graph)).await.unwrap();
        assert_eq!(again.reused, 1);
        assert_eq!(
            again.graph.packages["native@1.0.0"].dependencies["helper"].target.as_deref(),
            Some("helper@1.2.0")
        );
    }

    #[tokio::test]
    async fn test_lockfile_versions_are_reused() {
        let registry = MockRegistry::default();
        registry.publish("dep", "1.0.0", json!({}));
        let fx = fixture(&registry, json!({"dependencies": {"dep": "^1.0.0"}})).await;
        let locked = resolve(&fx, None).await.unwrap().graph;

        registry.publish("dep", "1.5.0", json!({}));
        let hits = registry.manifest_hits();
        let out = resolve(&fx, Some(&locked)).await.unwrap();
        assert_eq!(root_target(&out.graph, "dep"), Some("dep@1.0.0"));
        assert_eq!(out.reused, 1);
        assert_eq!(registry.manifest_hits(), hits);

        fs::write(
            fx.project.path().join("package.json"),
            json!({"dependencies": {"dep": "^1.5.0"}}).to_string(),
        )
        .unwrap();
        let out = resolve_with(&fx.fresh_ctx(), &fx, Some(&locked)).await.unwrap();
        assert_eq!(root_target(&out.graph, "dep"), Some("dep@1.5.0"));
    }

    #[tokio::test]
    async fn test_workspaces_bind_and_conflict() {
        let registry = MockRegistry::default();
        let fx = fixture(
            &registry,
            json!({"workspaces": ["packages/*"], "dependencies": {"lib": "workspace:*"}}),
        )
        .await;
        let lib = fx.project.path().join("packages/lib");
        let app = fx.project.path().join("packages/app");
        fs::create_dir_all(&lib).unwrap();
        fs::create_dir_all(&app).unwrap();
        fs::write(lib.join("package.json"), r#"{"name":"lib","version":"1.2.0"}"#).unwrap();
        fs::write(app.join("package.json"), r#"{"name":"app","devDependencies":{"lib":"^1.0.0"}}"#).unwrap();

        let graph = resolve(&fx, None).await.unwrap().graph;
        let root_edge = &graph.workspaces[""].dependencies["lib"];
        assert_eq!(root_edge.kind, EdgeKind::Workspace);
        assert_eq!(root_edge.target.as_deref(), Some("lib@workspace:packages/lib"));
        let app_edge = &graph.workspaces["packages/app"].dependencies["lib"];
        assert_eq!(app_edge.kind, EdgeKind::Dev);
        assert_eq!(app_edge.target.as_deref(), Some("lib@workspace:packages/lib"));

        fs::write(
            fx.project.path().join("package.json"),
            json!({"workspaces": ["packages/*"], "dependencies": {"lib": "workspace:^2.0.0"}}).to_string(),
        )
        .unwrap();
        let err = resolve(&fx, None).await.unwrap_err();
        assert_eq!(err.code(), codes::VERSION_CONFLICT);
    }

    #[tokio::test]
    async fn test_local_sources() {
        let registry = MockRegistry::default();
        registry.publish("helper", "1.0.0", json!({}));
        let fx = fixture(&registry, json!({})).await;

        let lib = fx.project.path().join("lib");
        fs::create_dir_all(&lib).unwrap();
        fs::write(
            lib.join("package.json"),
            r#"{"name":"lib","version":"0.1.0","dependencies":{"helper":"^1"}}"#,
        )
        .unwrap();
        let tgz = build_tgz(&[("package/package.json", br#"{"name":"packed","version":"2.0.0"}"#)]);
        fs::write(fx.project.path().join("packed.tgz"), &tgz).unwrap();

        let base = fx.ctx.registry.default_registry().to_string();
        registry.publish("remote", "3.0.0", json!({}));
        let remote_url = format!("{base}remote/-/remote-3.0.0.tgz");
        fs::write(
            fx.project.path().join("package.json"),
            json!({"dependencies": {
                "lib": "file:./lib",
                "packed": "file:./packed.tgz",
                "remote": remote_url
            }})
            .to_string(),
        )
        .unwrap();

        let out = resolve(&fx, None).await.unwrap();
        let graph = &out.graph;
        assert_eq!(root_target(graph, "lib"), Some("lib@file:lib"));
        assert_eq!(
            graph.packages["lib@file:lib"].dependencies["helper"].target.as_deref(),
            Some("helper@1.0.0")
        );
        let packed = &graph.packages["packed@file:packed.tgz"];
        assert_eq!(packed.version, "2.0.0");
        assert_eq!(packed.integrity.as_deref(), Some(Integrity::compute(&tgz).as_str()));

        let remote_key = format!("remote@{remote_url}");
        assert_eq!(
            graph.packages[&remote_key].integrity.as_deref(),
            Some(Integrity::compute(&registry.tarball_bytes("remote", "3.0.0")).as_str())
        );
        assert!(out.prefetched.contains_key(&remote_key));
    }

    #[tokio::test]
    async fn test_missing_folder_fails_to_resolve() {
        let registry = MockRegistry::default();
        let fx = fixture(&registry, json!({"dependencies": {"gone": "file:../gone"}})).await;
        let err = resolve(&fx, None).await.unwrap_err();
        assert_eq!(err.code(), codes::RESOLVE_FAILED);
        assert_eq!(err.message(), "file:../gone failed to resolve");
    }

    #[test]
    fn test_workspace_range_accepts() {
        assert!(workspace_range_accepts("*", "1.0.0"));
        assert!(workspace_range_accepts("^", ""));
        assert!(workspace_range_accepts("^1.0.0", "1.4.0"));
        assert!(!workspace_range_accepts("^2.0.0", "1.4.0"));
    }
}
