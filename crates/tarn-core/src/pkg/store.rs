//! Content-addressed package store.
//!
//! Every tarball-backed or git package is extracted once into
//! `<root>/<name>@<version or source hash>@@<content hash>/` and never
//! modified afterwards. Installs hardlink (or copy) out of these entries.

use super::error::PkgError;
use super::graph::{Resolution, ResolvedPackage};
use super::tarball::extract_tarball_atomic;
use std::fs;
use std::path::{Path, PathBuf};
use tarn_util::hash::blake3_bytes;

/// Directory holding cached registry manifests, skipped when listing entries.
pub const MANIFEST_DIR: &str = ".manifests";

/// The global content store.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

/// A package extracted in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub name: String,
    /// Version for registry packages, a source hash otherwise.
    pub version: String,
    pub path: PathBuf,
}

impl ContentStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory name of `pkg` in the store.
    #[must_use]
    pub fn entry_name(pkg: &ResolvedPackage) -> String {
        let identity = pkg.identity();
        let source = match &pkg.resolution {
            Resolution::Registry { .. } => pkg.version.clone(),
            _ => short_hash(identity.as_bytes()),
        };
        let content = match (&pkg.integrity, &pkg.resolution) {
            (Some(integrity), _) => short_hash(integrity.as_bytes()),
            (None, Resolution::Git { commit, .. }) => commit.chars().take(16).collect(),
            (None, _) => short_hash(identity.as_bytes()),
        };
        format!("{}@{source}@@{content}", escape_name(&pkg.real_name))
    }

    /// Where `pkg` is (or would be) extracted.
    #[must_use]
    pub fn entry_dir(&self, pkg: &ResolvedPackage) -> PathBuf {
        self.root.join(Self::entry_name(pkg))
    }

    /// Whether `pkg` has already been extracted.
    #[must_use]
    pub fn contains(&self, pkg: &ResolvedPackage) -> bool {
        self.entry_dir(pkg).join("package.json").is_file()
    }

    /// Extract verified tarball bytes for `pkg` into the store.
    ///
    /// # Errors
    /// Returns `EXTRACT_FAILED` if the tarball cannot be unpacked.
    pub fn import_tarball(&self, pkg: &ResolvedPackage, bytes: &[u8]) -> Result<PathBuf, PkgError> {
        let dest = self.entry_dir(pkg);
        extract_tarball_atomic(bytes, &dest)?;
        Ok(dest)
    }

    /// Move an already-populated directory (a git checkout) into the store.
    ///
    /// # Errors
    /// Returns `CACHE_ERROR` if the directory cannot be moved or copied.
    pub fn import_dir(&self, pkg: &ResolvedPackage, src: &Path) -> Result<PathBuf, PkgError> {
        let dest = self.entry_dir(pkg);
        if dest.exists() {
            return Ok(dest);
        }
        fs::create_dir_all(&self.root)?;
        if fs::rename(src, &dest).is_err() && !dest.exists() {
            tarn_util::fs::copy_dir_all(src, &dest).map_err(|e| {
                PkgError::cache_error(format!("failed to store {}: {e}", pkg.identity()))
            })?;
        }
        Ok(dest)
    }

    /// A scratch directory inside the store, on the same filesystem as its entries.
    ///
    /// # Errors
    /// Returns `CACHE_ERROR` if the directory cannot be created.
    pub fn scratch_dir(&self, prefix: &str) -> Result<tempfile::TempDir, PkgError> {
        fs::create_dir_all(&self.root)?;
        tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&self.root)
            .map_err(|e| PkgError::cache_error(format!("failed to create temp dir: {e}")))
    }

    /// List extracted packages, sorted by directory name.
    ///
    /// # Errors
    /// Returns `CACHE_ERROR` if the store exists but cannot be read.
    pub fn list(&self) -> Result<Vec<StoreEntry>, PkgError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut entries: Vec<StoreEntry> = fs::read_dir(&self.root)?
            .flatten()
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|e| {
                let dir_name = e.file_name().to_string_lossy().into_owned();
                let (name, version) = parse_entry_name(&dir_name)?;
                Some(StoreEntry {
                    name,
                    version,
                    path: e.path(),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Delete the whole store, including cached manifests. Returns the number
    /// of package entries removed.
    ///
    /// # Errors
    /// Returns `CACHE_ERROR` if an entry cannot be removed.
    pub fn clear(&self) -> Result<usize, PkgError> {
        let count = self.list()?.len();
        if self.root.exists() {
            for entry in fs::read_dir(&self.root)?.flatten() {
                tarn_util::fs::remove_path(&entry.path()).map_err(|e| {
                    PkgError::cache_error(format!(
                        "failed to remove {}: {e}",
                        entry.path().display()
                    ))
                })?;
            }
        }
        Ok(count)
    }
}

fn short_hash(bytes: &[u8]) -> String {
    blake3_bytes(bytes)[..16].to_string()
}

/// `@scope/name` becomes `@scope+name`.
fn escape_name(name: &str) -> String {
    name.replace('/', "+")
}

fn parse_entry_name(dir_name: &str) -> Option<(String, String)> {
    if dir_name.starts_with('.') {
        return None;
    }
    let (head, _content) = dir_name.split_once("@@")?;
    let (name, version) = head.rsplit_once('@')?;
    if name.is_empty() {
        return None;
    }
    Some((name.replacen('+', "/", 1), version.to_string()))
}
