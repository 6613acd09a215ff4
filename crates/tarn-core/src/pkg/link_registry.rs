//! Global registry of linkable packages (`tarn link`).
//!
//! Each registered package is a symlink `<dir>/<name>` pointing at the
//! package's directory.

use super::error::PkgError;
use super::link::{create_dir_link, package_dir};
use std::fs;
use std::path::{Path, PathBuf};
use tarn_util::fs::remove_path;

#[derive(Debug, Clone)]
pub struct LinkRegistry {
    dir: PathBuf,
}

impl LinkRegistry {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data dir>/links`.
    #[must_use]
    pub fn default_location() -> Self {
        Self::new(crate::paths::data_dir().join("links"))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register `target` under `name`, replacing an earlier registration.
    ///
    /// # Errors
    /// Returns `LINK_FAILED` if the link cannot be written.
    pub fn register(&self, name: &str, target: &Path) -> Result<(), PkgError> {
        let target = dunce::canonicalize(target).map_err(|e| {
            PkgError::file_not_found(format!("{}: {e}", target.display()))
        })?;
        let link = package_dir(&self.dir, name);
        let (Some(parent), Some(file_name)) = (link.parent(), link.file_name()) else {
            return Err(PkgError::link_failed(format!("invalid package name: {name}")));
        };
        fs::create_dir_all(parent)?;
        // Relative links must be computed from the real location of the registry.
        let link = dunce::canonicalize(parent)?.join(file_name);
        if link.symlink_metadata().is_ok() {
            remove_path(&link)
                .map_err(|e| PkgError::link_failed(format!("failed to replace link {name}: {e}")))?;
        }
        create_dir_link(&target, &link)?;
        tracing::debug!(package = name, target = %target.display(), "registered link");
        Ok(())
    }

    /// The directory registered under `name`, if it still exists.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<PathBuf> {
        let link = package_dir(&self.dir, name);
        dunce::canonicalize(&link).ok().filter(|p| p.is_dir())
    }

    /// Forget `name`. Returns whether it was registered.
    ///
    /// # Errors
    /// Returns `LINK_FAILED` if the link cannot be removed.
    pub fn unregister(&self, name: &str) -> Result<bool, PkgError> {
        let link = package_dir(&self.dir, name);
        if link.symlink_metadata().is_err() {
            return Ok(false);
        }
        remove_path(&link)
            .map_err(|e| PkgError::link_failed(format!("failed to unlink {name}: {e}")))?;
        Ok(true)
    }

    /// Every live registration, sorted by name. Dangling links are skipped.
    ///
    /// # Errors
    /// Returns an error if the registry directory cannot be read.
    pub fn list(&self) -> Result<Vec<(String, PathBuf)>, PkgError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)?.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('@') && !entry.file_type().is_ok_and(|t| t.is_symlink()) {
                for inner in fs::read_dir(entry.path())?.flatten() {
                    names.push(format!("{name}/{}", inner.file_name().to_string_lossy()));
                }
            } else if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names
            .into_iter()
            .filter_map(|name| self.lookup(&name).map(|target| (name, target)))
            .collect())
    }
}
