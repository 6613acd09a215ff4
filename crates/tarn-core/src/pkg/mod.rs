//! Package manager functionality.
//!
//! Provides:
//! - Parsing dependency specifiers (semver, tags, aliases, git, tarballs, paths)
//! - Fetching packuments and tarballs from npm-compatible registries
//! - Resolving a project (and its workspaces) into a dependency graph
//! - Binary, text and yarn lockfiles
//! - A content-addressed store and hoisted or isolated `node_modules` layouts
//! - Pruning, `link:` registration and security scanner hooks

pub mod context;
pub mod error;
pub mod git;
pub mod graph;
pub mod hoist;
pub mod install;
pub mod integrity;
pub mod link;
pub mod link_registry;
pub mod lockfile;
pub mod manifest;
pub mod npmrc;
pub mod packument;
pub mod platform;
pub mod prune;
pub mod registry;
pub mod resolve;
pub mod retry;
pub mod scanner;
pub mod spec;
pub mod store;
pub mod tarball;
pub mod version;
pub mod workspaces;

#[cfg(test)]
pub(crate) mod test_registry;

pub use context::{Context, ContextOptions};
pub use error::{codes, PkgError};
pub use graph::{
    DependencyGraph, Edge, EdgeKind, PackageKey, Resolution, ResolvedPackage, ROOT_WORKSPACE,
};
pub use install::{InstallOptions, InstallReport, Installer};
pub use integrity::Integrity;
pub use link_registry::LinkRegistry;
pub use lockfile::LockfileFormat;
pub use manifest::{DependencySection, PackageManifest};
pub use platform::{Platform, TargetSet};
pub use prune::{prune, PruneOptions, PruneReport};
pub use registry::{RegistryClient, DEFAULT_REGISTRY, REGISTRY_ENV};
pub use resolve::{ResolveOutput, Resolver};
pub use scanner::{Advisory, AdvisoryLevel, CommandScanner, ScanPackage, SecurityScanner};
pub use spec::{DependencyRequest, Specifier};
pub use store::ContentStore;
pub use workspaces::{WorkspaceMember, WorkspaceSet};
