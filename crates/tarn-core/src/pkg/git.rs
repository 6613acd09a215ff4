//! Git dependencies, driven through the system `git`.

use super::error::PkgError;
use super::graph::ResolvedPackage;
use super::manifest::PackageManifest;
use super::store::ContentStore;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command;

/// Base URL for GitHub tarball downloads.
pub const GITHUB_CODELOAD: &str = "https://codeload.github.com";

/// A fresh checkout waiting to be moved into the store.
#[derive(Debug)]
pub struct Checkout {
    pub commit: String,
    pub manifest: PackageManifest,
    path: PathBuf,
    _scratch: TempDir,
}

impl Checkout {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the checkout into the store under `pkg`'s entry.
    ///
    /// # Errors
    /// Returns `CACHE_ERROR` if the directory cannot be moved.
    pub fn persist(self, store: &ContentStore, pkg: &ResolvedPackage) -> Result<PathBuf, PkgError> {
        store.import_dir(pkg, &self.path)
    }
}

async fn git(args: &[&str], cwd: Option<&Path>) -> Result<String, String> {
    let mut command = Command::new("git");
    command.args(args).env("GIT_TERMINAL_PROMPT", "0");
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    let output = command
        .output()
        .await
        .map_err(|e| format!("failed to run git: {e}"))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(format!(
            "git {} exited with {}: {}",
            args.first().unwrap_or(&""),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

fn is_full_sha(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Resolve `reference` (branch, tag, or `HEAD`) on `url` to a commit.
///
/// # Errors
/// Returns `RESOLVE_FAILED` if the remote cannot be queried or has no such ref.
pub async fn ls_remote(url: &str, reference: Option<&str>) -> Result<String, PkgError> {
    let reference = reference.unwrap_or("HEAD");
    if is_full_sha(reference) {
        return Ok(reference.to_lowercase());
    }
    let output = git(&["ls-remote", url, reference], None)
        .await
        .map_err(|e| PkgError::resolve_failed(format!("{url} failed to resolve: {e}")))?;
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .find(|sha| is_full_sha(sha))
        .map(str::to_lowercase)
        .ok_or_else(|| {
            PkgError::resolve_failed(format!("{url} failed to resolve: no ref named {reference}"))
        })
}

/// Clone `url` into the store's scratch space and check out `committish`
/// (the default branch when `None`).
///
/// # Errors
/// Returns `RESOLVE_FAILED` if cloning or checking out fails, or the
/// repository has no `package.json`.
pub async fn clone_at(
    store: &ContentStore,
    url: &str,
    committish: Option<&str>,
) -> Result<Checkout, PkgError> {
    let failed = |msg: String| PkgError::resolve_failed(format!("{url} failed to resolve: {msg}"));

    let scratch = store.scratch_dir(".git-")?;
    let path = scratch.path().join("checkout");
    let path_str = path.to_string_lossy().into_owned();

    git(&["clone", "--quiet", url, &path_str], None)
        .await
        .map_err(failed)?;
    if let Some(committish) = committish {
        git(&["checkout", "--quiet", committish], Some(&path))
            .await
            .map_err(failed)?;
    }
    let commit = git(&["rev-parse", "HEAD"], Some(&path)).await.map_err(failed)?;
    tracing::debug!(url, commit = %commit, "cloned git dependency");

    let manifest = PackageManifest::read(&path.join("package.json"))
        .map_err(|e| failed(e.message().to_string()))?;
    let _ = tarn_util::fs::remove_path(&path.join(".git"));

    Ok(Checkout {
        commit,
        manifest,
        path,
        _scratch: scratch,
    })
}

/// codeload URL for a GitHub repository at `committish`.
#[must_use]
pub fn github_tarball_url(owner: &str, repo: &str, committish: &str) -> String {
    format!("{GITHUB_CODELOAD}/{owner}/{repo}/tar.gz/{committish}")
}
