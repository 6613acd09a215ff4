//! Lockfile persistence.
//!
//! Two interchangeable encodings of a [`DependencyGraph`]: `bun.lockb`
//! (binary, the default) and `bun.lock` (text). A project has at most one of
//! them; saving in one format removes the other.

pub mod binary;
pub mod text;
pub mod yarn;

use super::error::PkgError;
use super::graph::DependencyGraph;
use std::fs;
use std::path::Path;
use tarn_util::fs::atomic_write;

pub const TEXT_LOCKFILE_NAME: &str = "bun.lock";
pub const BINARY_LOCKFILE_NAME: &str = "bun.lockb";
pub const YARN_LOCKFILE_NAME: &str = "yarn.lock";

/// On-disk lockfile encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockfileFormat {
    #[default]
    Binary,
    Text,
}

impl LockfileFormat {
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Binary => BINARY_LOCKFILE_NAME,
            Self::Text => TEXT_LOCKFILE_NAME,
        }
    }

    fn other(self) -> Self {
        match self {
            Self::Binary => Self::Text,
            Self::Text => Self::Binary,
        }
    }
}

/// Encode `graph` in `format`.
///
/// # Errors
/// Returns `LOCKFILE_INVALID` if encoding fails.
pub fn encode(graph: &DependencyGraph, format: LockfileFormat) -> Result<Vec<u8>, PkgError> {
    match format {
        LockfileFormat::Binary => binary::encode(graph),
        LockfileFormat::Text => Ok(text::encode(graph).into_bytes()),
    }
}

/// Decode lockfile bytes.
///
/// # Errors
/// Returns `LOCKFILE_INVALID` for malformed content.
pub fn decode(bytes: &[u8], format: LockfileFormat) -> Result<DependencyGraph, PkgError> {
    match format {
        LockfileFormat::Binary => binary::decode(bytes),
        LockfileFormat::Text => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| PkgError::lockfile_invalid(format!("bun.lock is not UTF-8: {e}")))?;
            text::decode(text)
        }
    }
}

/// The lockfile format present in `root`, preferring the text format.
#[must_use]
pub fn existing_format(root: &Path) -> Option<LockfileFormat> {
    [LockfileFormat::Text, LockfileFormat::Binary]
        .into_iter()
        .find(|f| root.join(f.file_name()).is_file())
}

/// Load the project's lockfile, if any.
///
/// # Errors
/// Returns `LOCKFILE_INVALID` if the file exists but cannot be decoded.
pub fn load(root: &Path) -> Result<Option<(DependencyGraph, LockfileFormat)>, PkgError> {
    let Some(format) = existing_format(root) else {
        return Ok(None);
    };
    let bytes = fs::read(root.join(format.file_name()))?;
    let graph = decode(&bytes, format)?;
    tracing::debug!(
        file = format.file_name(),
        packages = graph.packages.len(),
        "loaded lockfile"
    );
    Ok(Some((graph, format)))
}

/// Write `graph` in `format`, removing a lockfile in the other format.
///
/// Returns whether anything on disk changed.
///
/// # Errors
/// Returns `LOCKFILE_INVALID` if encoding fails or `CACHE_ERROR` if the file
/// cannot be written.
pub fn save(
    root: &Path,
    graph: &DependencyGraph,
    format: LockfileFormat,
) -> Result<bool, PkgError> {
    let bytes = encode(graph, format)?;
    let path = root.join(format.file_name());
    let other = root.join(format.other().file_name());

    let mut changed = false;
    if fs::read(&path).ok().as_deref() != Some(bytes.as_slice()) {
        atomic_write(&path, &bytes)?;
        changed = true;
    }
    if other.is_file() {
        fs::remove_file(&other)?;
        changed = true;
    }
    Ok(changed)
}

/// Write `yarn.lock` next to the project lockfile.
///
/// # Errors
/// Returns `CACHE_ERROR` if the file cannot be written.
pub fn save_yarn(root: &Path, graph: &DependencyGraph) -> Result<(), PkgError> {
    atomic_write(&root.join(YARN_LOCKFILE_NAME), yarn::encode(graph).as_bytes())?;
    Ok(())
}

/// Delete every lockfile in `root`. Returns whether one existed.
///
/// # Errors
/// Returns `CACHE_ERROR` if a file cannot be removed.
pub fn remove(root: &Path) -> Result<bool, PkgError> {
    let mut removed = false;
    for name in [TEXT_LOCKFILE_NAME, BINARY_LOCKFILE_NAME] {
        let path = root.join(name);
        if path.is_file() {
            fs::remove_file(&path)?;
            removed = true;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::lockfile::text::tests::sample_graph;
    use tempfile::tempdir;

    #[test]
    fn test_save_reports_changes_only() {
        let dir = tempdir().unwrap();
        let graph = sample_graph();

        assert!(save(dir.path(), &graph, LockfileFormat::Binary).unwrap());
        assert!(!save(dir.path(), &graph, LockfileFormat::Binary).unwrap());

        let (loaded, format) = load(dir.path()).unwrap().unwrap();
        assert_eq!(format, LockfileFormat::Binary);
        assert_eq!(loaded, graph);
    }

    #[test]
    fn test_switching_format_replaces_file() {
        let dir = tempdir().unwrap();
        let graph = sample_graph();
        save(dir.path(), &graph, LockfileFormat::Binary).unwrap();

        assert!(save(dir.path(), &graph, LockfileFormat::Text).unwrap());
        assert!(dir.path().join(TEXT_LOCKFILE_NAME).is_file());
        assert!(!dir.path().join(BINARY_LOCKFILE_NAME).exists());
        assert_eq!(existing_format(dir.path()), Some(LockfileFormat::Text));
        assert_eq!(load(dir.path()).unwrap().unwrap().0, graph);
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        assert!(!remove(dir.path()).unwrap());
        assert!(load(dir.path()).unwrap().is_none());

        save(dir.path(), &sample_graph(), LockfileFormat::Text).unwrap();
        assert!(remove(dir.path()).unwrap());
        assert!(existing_format(dir.path()).is_none());
    }

    #[test]
    fn test_yarn_written() {
        let dir = tempdir().unwrap();
        save_yarn(dir.path(), &sample_graph()).unwrap();
        let text = fs::read_to_string(dir.path().join(YARN_LOCKFILE_NAME)).unwrap();
        assert!(text.contains("# yarn lockfile v1"));
    }
}
