//! The resolved dependency graph.
//!
//! Nodes are keyed by [`PackageKey`], `<install name>@<resolution>`:
//! `baz@0.0.5`, `bar@npm:baz@0.0.3`, `lib@file:../lib`, `app@workspace:packages/app`.
//! Two requests collapse into one node only if both the install name and the
//! resolution agree, so aliases never merge with their targets.

use super::platform::Platform;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Identity of a resolved package within a graph.
pub type PackageKey = String;

/// Path of the root workspace.
pub const ROOT_WORKSPACE: &str = "";

/// How a dependency was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeKind {
    Prod,
    Dev,
    Optional,
    Peer,
    /// A `dependencies` entry bound to a member of the workspace.
    Workspace,
}

impl EdgeKind {
    /// The `package.json` section this kind is written back to.
    #[must_use]
    pub fn section(self) -> &'static str {
        match self {
            Self::Prod | Self::Workspace => "dependencies",
            Self::Dev => "devDependencies",
            Self::Optional => "optionalDependencies",
            Self::Peer => "peerDependencies",
        }
    }

    /// Whether `--production` keeps this edge.
    #[must_use]
    pub fn is_production(self) -> bool {
        !matches!(self, Self::Dev)
    }
}

/// Where a package's contents come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// A registry tarball.
    Registry { tarball: String },
    /// A git clone pinned to a commit.
    Git { url: String, commit: String },
    /// A GitHub codeload tarball pinned to a ref.
    Github {
        owner: String,
        repo: String,
        committish: String,
    },
    /// A remote tarball.
    Tarball { url: String },
    /// A tarball on disk, relative to the project root.
    LocalTarball { path: String },
    /// A folder on disk, relative to the project root.
    Folder { path: String },
    /// A package registered with `tarn link`.
    Link { name: String },
    /// A workspace member, by path relative to the root.
    Workspace { path: String },
}

impl Resolution {
    /// The resolution part of a [`PackageKey`].
    #[must_use]
    pub fn key_fragment(&self, install_name: &str, real_name: &str, version: &str) -> String {
        match self {
            Self::Registry { .. } if install_name == real_name => version.to_string(),
            Self::Registry { .. } => format!("npm:{real_name}@{version}"),
            Self::Git { url, commit } => format!("git+{url}#{commit}"),
            Self::Github {
                owner,
                repo,
                committish,
            } => format!("github:{owner}/{repo}#{committish}"),
            Self::Tarball { url } => url.clone(),
            Self::LocalTarball { path } | Self::Folder { path } => format!("file:{path}"),
            Self::Link { name } => format!("link:{name}"),
            Self::Workspace { path } => format!("workspace:{path}"),
        }
    }

    /// Whether the package contents are a tarball that carries an integrity hash.
    #[must_use]
    pub fn is_tarball(&self) -> bool {
        matches!(
            self,
            Self::Registry { .. }
                | Self::Github { .. }
                | Self::Tarball { .. }
                | Self::LocalTarball { .. }
        )
    }

    /// Whether the package is linked in place rather than copied out of the store.
    #[must_use]
    pub fn is_symlinked(&self) -> bool {
        matches!(
            self,
            Self::Folder { .. } | Self::Link { .. } | Self::Workspace { .. }
        )
    }
}

/// A dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// The specifier as written in the manifest.
    pub spec: String,
    pub kind: EdgeKind,
    /// `None` when the dependency was skipped (platform filter, failed optional).
    pub target: Option<PackageKey>,
}

/// A resolved package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPackage {
    /// The name it is installed under (alias name for `npm:` aliases).
    pub name: String,
    /// The name it is published under.
    pub real_name: String,
    pub version: String,
    pub resolution: Resolution,
    /// SRI string; `None` when unknown.
    pub integrity: Option<String>,
    pub bin: BTreeMap<String, String>,
    pub os: Vec<String>,
    pub cpu: Vec<String>,
    pub dependencies: BTreeMap<String, Edge>,
}

impl ResolvedPackage {
    #[must_use]
    pub fn key(&self) -> PackageKey {
        format!(
            "{}@{}",
            self.name,
            self.resolution
                .key_fragment(&self.name, &self.real_name, &self.version)
        )
    }

    /// `<real name>@<resolution>`, as shown to users and written to text lockfiles.
    #[must_use]
    pub fn identity(&self) -> String {
        format!(
            "{}@{}",
            self.real_name,
            self.resolution
                .key_fragment(&self.real_name, &self.real_name, &self.version)
        )
    }
}

/// A workspace manifest as seen by the resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceEntry {
    pub name: String,
    pub version: Option<String>,
    pub dependencies: BTreeMap<String, Edge>,
}

/// The complete resolved graph: workspace roots plus every package node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    /// Workspace path (`""` for the root) → manifest.
    pub workspaces: BTreeMap<String, WorkspaceEntry>,
    pub packages: BTreeMap<PackageKey, ResolvedPackage>,
}

impl DependencyGraph {
    /// Whether the package at `key` should be installed on `platform`.
    #[must_use]
    pub fn is_installable(&self, key: &str, platform: &Platform) -> bool {
        self.packages
            .get(key)
            .is_some_and(|pkg| platform.allows(&pkg.os, &pkg.cpu))
    }

    /// Packages to install: reachable from the workspaces and allowed by `platform`.
    ///
    /// With `production`, devDependencies of workspaces are not followed.
    #[must_use]
    pub fn reachable(&self, platform: &Platform, production: bool) -> BTreeSet<PackageKey> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&PackageKey> = VecDeque::new();

        for ws in self.workspaces.values() {
            for edge in ws.dependencies.values() {
                if production && !edge.kind.is_production() {
                    continue;
                }
                if let Some(target) = &edge.target {
                    queue.push_back(target);
                }
            }
        }

        while let Some(key) = queue.pop_front() {
            if seen.contains(key) || !self.is_installable(key, platform) {
                continue;
            }
            seen.insert(key.clone());
            if let Some(pkg) = self.packages.get(key) {
                queue.extend(pkg.dependencies.values().filter_map(|e| e.target.as_ref()));
            }
        }

        seen
    }

    /// Total number of dependency edges resolved to a package.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.workspaces
            .values()
            .map(|w| &w.dependencies)
            .chain(self.packages.values().map(|p| &p.dependencies))
            .flat_map(BTreeMap::values)
            .filter(|e| e.target.is_some())
            .count()
    }
}
