//! Workspace discovery for monorepos.
//!
//! The root `package.json` lists member directories as globs in
//! `workspaces` (`["packages/*"]` or `{ "packages": [...] }`); `!pattern`
//! entries exclude matches.

use super::error::PkgError;
use super::graph::ROOT_WORKSPACE;
use super::manifest::PackageManifest;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One manifest taking part in an install.
#[derive(Debug, Clone)]
pub struct WorkspaceMember {
    /// Path relative to the root with `/` separators; `""` for the root.
    pub path: String,
    pub dir: PathBuf,
    pub manifest: PackageManifest,
}

impl WorkspaceMember {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.manifest.name
    }
}

/// The root manifest plus every workspace member.
#[derive(Debug, Clone)]
pub struct WorkspaceSet {
    pub root: PathBuf,
    /// Keyed by relative path; the root is always present under `""`.
    pub members: BTreeMap<String, WorkspaceMember>,
}

impl WorkspaceSet {
    /// Read the root `package.json` and expand its workspace globs.
    ///
    /// # Errors
    /// Returns `PACKAGE_JSON_NOT_FOUND` / `PACKAGE_JSON_INVALID` for the root
    /// manifest, or `PACKAGE_JSON_INVALID` for a member without a name.
    pub fn load(root: &Path) -> Result<Self, PkgError> {
        let manifest = PackageManifest::read(&root.join("package.json"))?;
        let patterns = manifest.workspace_patterns();

        let mut members = BTreeMap::new();
        members.insert(
            ROOT_WORKSPACE.to_string(),
            WorkspaceMember {
                path: ROOT_WORKSPACE.to_string(),
                dir: root.to_path_buf(),
                manifest,
            },
        );

        for dir in expand_patterns(root, &patterns) {
            let manifest_path = dir.join("package.json");
            if !manifest_path.is_file() {
                continue;
            }
            let manifest = PackageManifest::read(&manifest_path)?;
            if manifest.name.is_empty() {
                return Err(PkgError::package_json_invalid(format!(
                    "workspace package at {} is missing a \"name\"",
                    dir.display()
                )));
            }
            let path = relative_key(root, &dir);
            tracing::debug!(workspace = %path, name = %manifest.name, "found workspace package");
            members.insert(path.clone(), WorkspaceMember { path, dir, manifest });
        }

        Ok(Self {
            root: root.to_path_buf(),
            members,
        })
    }

    #[must_use]
    pub fn root_member(&self) -> Option<&WorkspaceMember> {
        self.members.get(ROOT_WORKSPACE)
    }

    /// Non-root members, by package name.
    pub fn packages(&self) -> impl Iterator<Item = &WorkspaceMember> {
        self.members.values().filter(|m| !m.path.is_empty())
    }

    /// A non-root member by package name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&WorkspaceMember> {
        self.packages().find(|m| m.name() == name)
    }
}

fn expand_patterns(root: &Path, patterns: &[String]) -> Vec<PathBuf> {
    let (excludes, includes): (Vec<&String>, Vec<&String>) =
        patterns.iter().partition(|p| p.starts_with('!'));

    let exclude: Vec<glob::Pattern> = excludes
        .iter()
        .filter_map(|p| glob::Pattern::new(p[1..].trim_end_matches('/')).ok())
        .collect();

    let mut dirs = Vec::new();
    for pattern in includes {
        let full_pattern = root.join(pattern.trim_end_matches('/'));
        let Ok(entries) = glob::glob(&full_pattern.to_string_lossy()) else {
            tracing::warn!(pattern = %pattern, "invalid workspace pattern");
            continue;
        };
        for entry in entries.flatten() {
            let rel = relative_key(root, &entry);
            if rel.is_empty()
                || rel.split('/').any(|part| part == "node_modules")
                || exclude.iter().any(|p| p.matches(&rel))
                || !entry.is_dir()
            {
                continue;
            }
            if !dirs.contains(&entry) {
                dirs.push(entry);
            }
        }
    }
    dirs.sort();
    dirs
}

fn relative_key(root: &Path, dir: &Path) -> String {
    dir.strip_prefix(root)
        .unwrap_or(dir)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Find the workspace root by walking up from `start`: the nearest
/// `package.json` with a `workspaces` field, else the nearest `package.json`.
#[must_use]
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let nearest = crate::paths::project_root(start)?;
    let mut current = nearest.clone();

    loop {
        if let Ok(manifest) = PackageManifest::read(&current.join("package.json")) {
            if !manifest.workspace_patterns().is_empty() {
                return Some(current);
            }
        }
        if !current.pop() {
            return Some(nearest);
        }
    }
}
