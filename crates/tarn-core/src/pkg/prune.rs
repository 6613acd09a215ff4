//! Removing packages nothing depends on from `node_modules`.
//!
//! The installed tree is indexed first (top-level, scoped and nested
//! entries of the root and every workspace), then walked from the
//! workspaces' declared dependencies using node's lookup rules. Whatever
//! the walk never reaches is moved into a trash directory in one pass and
//! deleted; if any move fails the earlier ones are put back.

use super::error::{codes, PkgError};
use super::link::is_dangling;
use super::manifest::{DeclaredDependency, PackageManifest};
use super::workspaces::WorkspaceSet;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use tarn_util::fs::{remove_path, unique_sibling};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct PruneOptions {
    /// Treat devDependencies of the workspaces as unreachable.
    pub production: bool,
    pub dry_run: bool,
}

/// One package directory selected for removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunedPackage {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Default)]
pub struct PruneReport {
    pub removed: Vec<PrunedPackage>,
    pub removed_bins: Vec<PathBuf>,
    pub dry_run: bool,
}

impl PruneReport {
    /// Nothing was (or would be) removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.removed_bins.is_empty()
    }
}

/// Prune the project at `root`.
///
/// # Errors
/// Returns `PACKAGE_JSON_NOT_FOUND` when `root` has no `package.json`, and
/// `LINK_FAILED` when a removal cannot be staged (the tree is restored).
pub fn prune(root: &Path, options: PruneOptions) -> Result<PruneReport, PkgError> {
    if !root.join("package.json").is_file() {
        return Err(PkgError::new(
            codes::PACKAGE_JSON_NOT_FOUND,
            "No package.json found, nothing to prune",
        ));
    }
    let root = dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let workspaces = WorkspaceSet::load(&root)?;

    let mut index = BTreeMap::new();
    let mut bin_dirs = Vec::new();
    for member in workspaces.members.values() {
        index_node_modules(&member.dir.join("node_modules"), &mut index, &mut bin_dirs);
    }
    debug!(indexed = index.len(), "indexed node_modules");

    let reached = reachable(&workspaces, &index, options.production);

    // Top-most unreachable entries only; their nested contents go with them.
    let mut removed: Vec<PrunedPackage> = Vec::new();
    for (path, name) in &index {
        if reached.contains(path) || removed.iter().any(|r| path.starts_with(&r.path)) {
            continue;
        }
        removed.push(PrunedPackage {
            name: name.clone(),
            path: path.clone(),
        });
    }

    let removed_bins: Vec<PathBuf> = bin_dirs
        .iter()
        .filter(|dir| !removed.iter().any(|r| dir.starts_with(&r.path)))
        .flat_map(|dir| stale_bins(dir, &removed))
        .collect();

    removed.sort_by(|a, b| a.name.cmp(&b.name).then(a.path.cmp(&b.path)));
    let report = PruneReport {
        removed,
        removed_bins,
        dry_run: options.dry_run,
    };
    if options.dry_run || report.is_empty() {
        return Ok(report);
    }

    let doomed: Vec<PathBuf> = report
        .removed
        .iter()
        .map(|r| r.path.clone())
        .chain(report.removed_bins.iter().cloned())
        .collect();
    commit_removals(&root.join("node_modules"), &doomed)?;

    for pkg in &report.removed {
        if let Some(scope) = pkg.path.parent().filter(|p| is_scope_dir(p)) {
            // Only succeeds when the scope is now empty.
            let _ = fs::remove_dir(scope);
        }
    }
    Ok(report)
}

/// Record every package directory under `node_modules`, recursing into
/// nested `node_modules` of real (non-symlinked) packages.
fn index_node_modules(
    node_modules: &Path,
    index: &mut BTreeMap<PathBuf, String>,
    bin_dirs: &mut Vec<PathBuf>,
) {
    let Ok(entries) = fs::read_dir(node_modules) else {
        return;
    };
    bin_dirs.push(node_modules.join(".bin"));

    for entry in entries.flatten() {
        let path = entry.path();
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }

        if name.starts_with('@') {
            let Ok(scoped) = fs::read_dir(&path) else {
                continue;
            };
            for scoped_entry in scoped.flatten() {
                let scoped_name = format!("{name}/{}", scoped_entry.file_name().to_string_lossy());
                index_package(&scoped_entry.path(), scoped_name, index, bin_dirs);
            }
        } else {
            index_package(&path, name.into_owned(), index, bin_dirs);
        }
    }
}

fn index_package(
    path: &Path,
    name: String,
    index: &mut BTreeMap<PathBuf, String>,
    bin_dirs: &mut Vec<PathBuf>,
) {
    let Ok(meta) = path.symlink_metadata() else {
        return;
    };
    if meta.file_type().is_symlink() {
        index.insert(path.to_path_buf(), name);
    } else if meta.is_dir() {
        index.insert(path.to_path_buf(), name);
        index_node_modules(&path.join("node_modules"), index, bin_dirs);
    }
}

/// Package directories reachable from the workspaces' dependencies.
fn reachable(
    workspaces: &WorkspaceSet,
    index: &BTreeMap<PathBuf, String>,
    production: bool,
) -> HashSet<PathBuf> {
    let mut reached: HashSet<PathBuf> = HashSet::new();
    let mut queue: VecDeque<(PathBuf, PathBuf, Vec<DeclaredDependency>)> = VecDeque::new();

    for member in workspaces.members.values() {
        let deps = member.manifest.declared_dependencies(!production);
        queue.push_back((member.dir.clone(), member.dir.clone(), deps));
    }
    // Workspace packages linked at the top level stay while the workspace exists.
    let root_nm = workspaces.root.join("node_modules");
    for member in workspaces.packages() {
        let link = super::link::package_dir(&root_nm, member.name());
        if index.contains_key(&link) {
            reached.insert(link);
        }
    }

    while let Some((real, logical, deps)) = queue.pop_front() {
        for dep in deps {
            let found = lookup(&real, &dep.name).or_else(|| lookup(&logical, &dep.name));
            let Some(found) = found else {
                continue;
            };
            if !index.contains_key(&found) || !reached.insert(found.clone()) {
                continue;
            }
            let target = dunce::canonicalize(&found).unwrap_or_else(|_| found.clone());
            let Ok(manifest) = PackageManifest::read(&target.join("package.json")) else {
                continue;
            };
            queue.push_back((target, found, manifest.declared_dependencies(false)));
        }
    }
    reached
}

/// Node's lookup: `<dir>/node_modules/<name>` in `from` and each ancestor.
fn lookup(from: &Path, name: &str) -> Option<PathBuf> {
    from.ancestors()
        .filter(|dir| dir.file_name().map_or(true, |n| n != "node_modules"))
        .map(|dir| super::link::package_dir(&dir.join("node_modules"), name))
        .find(|candidate| candidate.symlink_metadata().is_ok())
}

/// `.bin` entries that are dangling or point into a removed package.
fn stale_bins(bin_dir: &Path, removed: &[PrunedPackage]) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(bin_dir) else {
        return Vec::new();
    };
    let mut stale: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|link| {
            if is_dangling(link) {
                return true;
            }
            let Ok(target) = fs::read_link(link) else {
                return false;
            };
            let target = tarn_util::fs::normalize_lexically(&bin_dir.join(target));
            removed.iter().any(|r| target.starts_with(&r.path))
        })
        .collect();
    stale.sort();
    stale
}

fn is_scope_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('@'))
}

/// Move every path into a trash directory, then delete it. On the first
/// failed move all earlier moves are undone.
fn commit_removals(node_modules: &Path, paths: &[PathBuf]) -> Result<(), PkgError> {
    let trash = unique_sibling(&node_modules.join("prune"), "trash");
    fs::create_dir_all(&trash)
        .map_err(|e| PkgError::link_failed(format!("failed to create {}: {e}", trash.display())))?;

    let mut moved: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        let dest = trash.join(i.to_string());
        if let Err(e) = fs::rename(path, &dest) {
            for (from, to) in moved.iter().rev() {
                if let Err(undo) = fs::rename(to, from) {
                    warn!(path = %from.display(), error = %undo, "failed to restore pruned entry");
                }
            }
            let _ = remove_path(&trash);
            return Err(PkgError::link_failed(format!(
                "failed to remove {}: {e}",
                path.display()
            )));
        }
        moved.push((path.clone(), dest));
    }

    if let Err(e) = remove_path(&trash) {
        warn!(path = %trash.display(), error = %e, "failed to delete prune trash");
    }
    debug!(removed = paths.len(), "pruned");
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    fn write_pkg(dir: &Path, name: &str, deps: &[&str]) {
        fs::create_dir_all(dir).unwrap();
        let deps: serde_json::Map<String, serde_json::Value> =
            deps.iter().map(|d| ((*d).to_string(), "*".into())).collect();
        let manifest = serde_json::json!({"name": name, "version": "1.0.0", "dependencies": deps});
        fs::write(dir.join("package.json"), manifest.to_string()).unwrap();
    }

    fn project() -> tempfile::TempDir {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::write(
            root.join("package.json"),
            r#"{"dependencies":{"a":"*"},"devDependencies":{"dev":"*"}}"#,
        )
        .unwrap();
        let nm = root.join("node_modules");
        write_pkg(&nm.join("a"), "a", &["b"]);
        write_pkg(&nm.join("a/node_modules/b"), "b", &[]);
        write_pkg(&nm.join("b"), "b", &[]);
        write_pkg(&nm.join("dev"), "dev", &["dev-helper"]);
        write_pkg(&nm.join("dev-helper"), "dev-helper", &[]);
        write_pkg(&nm.join("@scope/orphan"), "@scope/orphan", &[]);
        fs::create_dir_all(nm.join(".bin")).unwrap();
        symlink("../@scope/orphan/cli.js", nm.join(".bin/orphan")).unwrap();
        symlink("../gone/cli.js", nm.join(".bin/gone")).unwrap();
        tmp
    }

    fn names(report: &PruneReport) -> Vec<&str> {
        report.removed.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_prune_removes_unreachable() {
        let tmp = project();
        let root = tmp.path();
        let nm = root.join("node_modules");

        let report = prune(root, PruneOptions::default()).unwrap();
        // The shadowed top-level b is not what a resolves to.
        assert_eq!(names(&report), vec!["@scope/orphan", "b"]);
        assert_eq!(report.removed_bins.len(), 2);
        assert!(!nm.join("@scope").exists());
        assert!(!nm.join("b").exists());
        assert!(nm.join("a/node_modules/b").is_dir());
        assert!(nm.join("dev-helper").is_dir());
        assert!(nm.join(".bin/orphan").symlink_metadata().is_err());

        let again = prune(root, PruneOptions::default()).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_production_drops_dev_closure() {
        let tmp = project();
        let report = prune(
            tmp.path(),
            PruneOptions {
                production: true,
                dry_run: false,
            },
        )
        .unwrap();
        assert_eq!(names(&report), vec!["@scope/orphan", "b", "dev", "dev-helper"]);
        assert!(tmp.path().join("node_modules/a").is_dir());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let tmp = project();
        let report = prune(
            tmp.path(),
            PruneOptions {
                production: false,
                dry_run: true,
            },
        )
        .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.removed.len(), 2);
        assert!(tmp.path().join("node_modules/@scope/orphan").is_dir());
        assert!(tmp.path().join("node_modules/.bin/gone").symlink_metadata().is_ok());
    }

    #[test]
    fn test_symlinked_folder_dependencies_are_followed() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("package.json"), r#"{"dependencies":{"lib":"file:lib"}}"#).unwrap();
        write_pkg(&root.join("lib"), "lib", &["util"]);
        let nm = root.join("node_modules");
        fs::create_dir_all(&nm).unwrap();
        symlink("../lib", nm.join("lib")).unwrap();
        write_pkg(&nm.join("util"), "util", &[]);
        write_pkg(&nm.join("stray"), "stray", &[]);

        let report = prune(root, PruneOptions::default()).unwrap();
        assert_eq!(names(&report), vec!["stray"]);
        assert!(nm.join("util").is_dir());
    }

    #[test]
    fn test_missing_manifest() {
        let tmp = tempdir().unwrap();
        let err = prune(tmp.path(), PruneOptions::default()).unwrap_err();
        assert_eq!(err.code(), codes::PACKAGE_JSON_NOT_FOUND);
        assert_eq!(err.message(), "No package.json found, nothing to prune");
    }
}
