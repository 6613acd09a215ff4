//! Symlinks in `node_modules`: package links and `.bin` entries.

use super::error::PkgError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tarn_util::fs::{relative_path, remove_path};

/// `<node_modules>/<name>`, splitting scoped names into their scope directory.
#[must_use]
pub fn package_dir(node_modules: &Path, name: &str) -> PathBuf {
    name.split('/')
        .fold(node_modules.to_path_buf(), |dir, part| dir.join(part))
}

/// Point `<node_modules>/<name>` at `target` with a relative symlink
/// (a junction on Windows), replacing whatever was there.
///
/// An existing link that already resolves to `target` is left untouched.
///
/// # Errors
/// Returns `LINK_FAILED` if the link cannot be created.
pub fn link_package(node_modules: &Path, name: &str, target: &Path) -> Result<PathBuf, PkgError> {
    let link_path = package_dir(node_modules, name);
    let parent = link_path
        .parent()
        .ok_or_else(|| PkgError::link_failed(format!("invalid package name: {name}")))?;
    fs::create_dir_all(parent).map_err(|e| {
        PkgError::link_failed(format!("failed to create {}: {e}", parent.display()))
    })?;

    if points_to(&link_path, target) {
        return Ok(link_path);
    }

    if link_path.symlink_metadata().is_ok() {
        remove_path(&link_path).map_err(|e| {
            PkgError::link_failed(format!("failed to remove {}: {e}", link_path.display()))
        })?;
    }

    create_dir_link(target, &link_path)?;
    Ok(link_path)
}

/// Whether `link` is a symlink resolving to `target`.
#[must_use]
pub fn points_to(link: &Path, target: &Path) -> bool {
    let Ok(meta) = link.symlink_metadata() else {
        return false;
    };
    if !meta.file_type().is_symlink() {
        return false;
    }
    match (dunce::canonicalize(link), dunce::canonicalize(target)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Create a directory link at `link` pointing to `target`.
///
/// # Errors
/// Returns `LINK_FAILED` if the link cannot be created.
pub fn create_dir_link(target: &Path, link: &Path) -> Result<(), PkgError> {
    #[cfg(unix)]
    {
        let base = link.parent().unwrap_or(Path::new("."));
        let relative = relative_path(base, target);
        std::os::unix::fs::symlink(&relative, link).map_err(|e| {
            PkgError::link_failed(format!(
                "failed to create symlink {} -> {}: {e}",
                link.display(),
                relative.display()
            ))
        })?;
    }

    #[cfg(windows)]
    {
        let absolute = dunce::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());
        junction::create(&absolute, link).map_err(|e| {
            PkgError::link_failed(format!(
                "failed to create junction {} -> {}: {e}",
                link.display(),
                absolute.display()
            ))
        })?;
    }

    Ok(())
}

/// Whether `path` is a symlink whose target no longer exists.
#[must_use]
pub fn is_dangling(path: &Path) -> bool {
    path.symlink_metadata()
        .is_ok_and(|m| m.file_type().is_symlink())
        && fs::metadata(path).is_err()
}

/// Create `<node_modules>/.bin/<name>` links for a package's `bin` entries.
///
/// `package_dir` is where the package lives (inside `node_modules` or the
/// isolated store). Entries escaping the package are ignored. Returns the
/// links created.
///
/// # Errors
/// Returns `LINK_FAILED` if a link cannot be written.
pub fn link_bins(
    node_modules: &Path,
    package_dir: &Path,
    bins: &BTreeMap<String, String>,
) -> Result<Vec<PathBuf>, PkgError> {
    if bins.is_empty() {
        return Ok(Vec::new());
    }

    let bin_dir = node_modules.join(".bin");
    fs::create_dir_all(&bin_dir)
        .map_err(|e| PkgError::link_failed(format!("failed to create .bin: {e}")))?;

    let mut created = Vec::new();
    for (bin_name, script) in bins {
        let Some(bin_name) = sanitize_bin_name(bin_name) else {
            tracing::warn!(bin = %bin_name, "skipping invalid bin name");
            continue;
        };
        let Some(script) = normalize_relative(script) else {
            tracing::warn!(bin = %bin_name, script = %script, "skipping bin outside its package");
            continue;
        };

        let target = package_dir.join(&script);
        let link = bin_dir.join(bin_name);
        if link.symlink_metadata().is_ok() {
            remove_path(&link).map_err(|e| {
                PkgError::link_failed(format!("failed to replace {}: {e}", link.display()))
            })?;
        }

        write_bin_link(&target, &link)?;
        make_executable(&target);
        created.push(link);
    }

    Ok(created)
}

#[cfg(unix)]
fn write_bin_link(target: &Path, link: &Path) -> Result<(), PkgError> {
    let relative = relative_path(link.parent().unwrap_or(Path::new(".")), target);
    std::os::unix::fs::symlink(&relative, link).map_err(|e| {
        PkgError::link_failed(format!(
            "failed to link {} -> {}: {e}",
            link.display(),
            relative.display()
        ))
    })
}

#[cfg(windows)]
fn write_bin_link(target: &Path, link: &Path) -> Result<(), PkgError> {
    let shim = format!("@ECHO off\r\nnode \"{}\" %*\r\n", target.display());
    fs::write(link.with_extension("cmd"), shim)
        .map_err(|e| PkgError::link_failed(format!("failed to write shim: {e}")))
}

fn make_executable(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = fs::metadata(path) {
            let mode = meta.permissions().mode();
            if mode & 0o111 != 0o111 {
                let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o111));
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

fn sanitize_bin_name(name: &str) -> Option<&str> {
    let name = name.rsplit('/').next().unwrap_or(name);
    (!name.is_empty() && name != "." && name != ".." && !name.contains('\\')).then_some(name)
}

/// Normalize a package-relative path, rejecting anything that climbs out.
fn normalize_relative(path: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}
