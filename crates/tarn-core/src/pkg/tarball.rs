//! Tarball extraction.

use super::error::PkgError;
use super::manifest::PackageManifest;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::Archive;

/// Maximum tarball size (200 MB).
pub const MAX_TARBALL_SIZE: usize = 200 * 1024 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn archive(bytes: &[u8]) -> Archive<Box<dyn Read + '_>> {
    let reader: Box<dyn Read + '_> = if bytes.starts_with(&GZIP_MAGIC) {
        Box::new(GzDecoder::new(bytes))
    } else {
        Box::new(bytes)
    };
    Archive::new(reader)
}

/// Extract a package tarball (gzipped or plain) to `dest` atomically.
///
/// Entries are unpacked into a temp directory next to `dest`, then the
/// tarball's root directory is renamed into place. If `dest` appears in the
/// meantime (a concurrent extraction), the existing copy wins.
///
/// # Errors
/// Returns `EXTRACT_FAILED` for corrupt archives and unsafe entry paths.
pub fn extract_tarball_atomic(bytes: &[u8], dest: &Path) -> Result<(), PkgError> {
    let parent = dest
        .parent()
        .ok_or_else(|| PkgError::extract_failed("destination has no parent"))?;
    fs::create_dir_all(parent)?;

    if dest.exists() {
        return Ok(());
    }

    let temp_dir = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(parent)
        .map_err(|e| PkgError::extract_failed(format!("failed to create temp dir: {e}")))?;

    extract_to(bytes, temp_dir.path())?;
    let root = find_extracted_root(temp_dir.path())?;

    match fs::rename(&root, dest) {
        Ok(()) => Ok(()),
        Err(_) if dest.exists() => Ok(()),
        Err(e) => tarn_util::fs::copy_dir_all(&root, dest).map_err(|copy_err| {
            PkgError::extract_failed(format!(
                "failed to move extracted package: rename={e}, copy={copy_err}"
            ))
        }),
    }
}

/// Read `package.json` from the root directory of a tarball without extracting it.
///
/// # Errors
/// Returns `EXTRACT_FAILED` if the archive is corrupt or has no root `package.json`.
pub fn read_package_json_from_tarball(bytes: &[u8]) -> Result<PackageManifest, PkgError> {
    let mut archive = archive(bytes);
    let entries = archive
        .entries()
        .map_err(|e| PkgError::extract_failed(format!("failed to read tarball entries: {e}")))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| PkgError::extract_failed(format!("failed to read tarball entry: {e}")))?;
        let is_root_manifest = entry.path().is_ok_and(|path| {
            let parts: Vec<Component> = path
                .components()
                .filter(|c| !matches!(c, Component::CurDir))
                .collect();
            matches!(parts.as_slice(), [_, Component::Normal(f)] if *f == "package.json")
                || matches!(parts.as_slice(), [Component::Normal(f)] if *f == "package.json")
        });
        if is_root_manifest {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            return PackageManifest::from_slice(&content);
        }
    }

    Err(PkgError::extract_failed("tarball has no package.json"))
}

/// Find the single top-level directory of an extracted tarball.
///
/// npm tarballs usually use `package/`, `@types/*` use the bare name and
/// GitHub archives use `<owner>-<repo>-<sha>/`. Archives with `package.json`
/// at the top level use the directory itself.
fn find_extracted_root(temp_dir: &Path) -> Result<PathBuf, PkgError> {
    let package_dir = temp_dir.join("package");
    if package_dir.is_dir() {
        return Ok(package_dir);
    }

    if temp_dir.join("package.json").is_file() {
        return Ok(temp_dir.to_path_buf());
    }

    let dirs: Vec<PathBuf> = fs::read_dir(temp_dir)
        .map_err(|e| PkgError::extract_failed(format!("failed to read extracted dir: {e}")))?
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_ok_and(|ft| ft.is_dir()))
        .map(|e| e.path())
        .collect();

    match dirs.as_slice() {
        [only] => Ok(only.clone()),
        [] => Err(PkgError::extract_failed(
            "tarball does not contain any top-level directory",
        )),
        many => Err(PkgError::extract_failed(format!(
            "tarball contains {} top-level directories, expected 1",
            many.len()
        ))),
    }
}

fn extract_to(bytes: &[u8], dest: &Path) -> Result<(), PkgError> {
    let mut archive = archive(bytes);

    for entry in archive
        .entries()
        .map_err(|e| PkgError::extract_failed(format!("failed to read tarball entries: {e}")))?
    {
        let mut entry = entry
            .map_err(|e| PkgError::extract_failed(format!("failed to read tarball entry: {e}")))?;

        let path = entry
            .path()
            .map_err(|e| PkgError::extract_failed(format!("failed to read entry path: {e}")))?
            .into_owned();
        let path_str = path.to_string_lossy();

        if path.is_absolute() || path.has_root() {
            return Err(PkgError::extract_failed(format!(
                "tarball contains absolute path: {path_str}"
            )));
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(PkgError::extract_failed(format!(
                "tarball contains path traversal: {path_str}"
            )));
        }

        let dest_path = dest.join(&path);
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            fs::create_dir_all(&dest_path)?;
        } else if entry_type.is_file() {
            let mut file = File::create(&dest_path)?;
            io::copy(&mut entry, &mut file)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(mode) = entry.header().mode() {
                    // Owner always gets read/write; npm tarballs sometimes ship 0o000.
                    let perms = fs::Permissions::from_mode((mode & 0o777) | 0o600);
                    let _ = fs::set_permissions(&dest_path, perms);
                }
            }
        }
        // Symlinks, hardlinks and device entries are skipped.
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tar::Builder;
    use tempfile::tempdir;

    pub(crate) fn build_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut tar_bytes = Vec::new();
        {
            let mut builder = Builder::new(&mut tar_bytes);
            for (path, content) in files {
                let mut header = tar::Header::new_gnu();
                header.set_path(path).unwrap();
                header.set_size(content.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append(&header, *content).unwrap();
            }
            builder.finish().unwrap();
        }
        tar_bytes
    }

    pub(crate) fn build_tgz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&build_tar(files)).unwrap();
        encoder.finish().unwrap()
    }

    fn raw_tar_with_path(path: &str) -> Vec<u8> {
        // `Header::set_path` refuses `..`, so write the name bytes directly.
        let mut header = tar::Header::new_old();
        let name = &mut header.as_old_mut().name;
        name[..path.len()].copy_from_slice(path.as_bytes());
        header.set_size(1);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();

        let mut out = Vec::new();
        out.extend_from_slice(header.as_bytes());
        let mut block = [0u8; 512];
        block[0] = b'x';
        out.extend_from_slice(&block);
        out.extend_from_slice(&[0u8; 1024]);
        out
    }

    #[test]
    fn test_extract_package_prefix() {
        let bytes = build_tgz(&[
            ("package/package.json", br#"{"name":"a","version":"1.0.0"}"#),
            ("package/lib/index.js", b"module.exports = 1;"),
        ]);
        let dir = tempdir().unwrap();
        let dest = dir.path().join("a@1.0.0");

        extract_tarball_atomic(&bytes, &dest).unwrap();

        assert!(dest.join("package.json").is_file());
        assert!(dest.join("lib/index.js").is_file());
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_extract_plain_tar_with_custom_root() {
        let bytes = build_tar(&[("node/package.json", br#"{"name":"@types/node"}"#)]);
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out");

        extract_tarball_atomic(&bytes, &dest).unwrap();
        assert!(dest.join("package.json").is_file());
    }

    #[test]
    fn test_rejects_path_traversal() {
        let bytes = raw_tar_with_path("package/../../evil.txt");
        let dir = tempdir().unwrap();
        let err = extract_tarball_atomic(&bytes, &dir.path().join("out")).unwrap_err();
        assert_eq!(err.code(), crate::pkg::error::codes::EXTRACT_FAILED);
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[test]
    fn test_rejects_absolute_path() {
        let bytes = raw_tar_with_path("/tmp/evil.txt");
        let dir = tempdir().unwrap();
        assert!(extract_tarball_atomic(&bytes, &dir.path().join("out")).is_err());
    }

    #[test]
    fn test_corrupt_archive() {
        let dir = tempdir().unwrap();
        let bytes = [0x1f, 0x8b, 0, 1, 2, 3];
        assert!(extract_tarball_atomic(&bytes, &dir.path().join("out")).is_err());
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_existing_destination_kept() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("pkg");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("marker"), "old").unwrap();

        let bytes = build_tgz(&[("package/package.json", b"{}")]);
        extract_tarball_atomic(&bytes, &dest).unwrap();
        assert!(dest.join("marker").exists());
    }

    #[test]
    fn test_read_package_json_from_tarball() {
        let bytes = build_tgz(&[
            ("package/README.md", b"# hi"),
            ("package/package.json", br#"{"name":"from-tgz","version":"2.0.0"}"#),
            ("package/sub/package.json", br#"{"name":"nested"}"#),
        ]);
        let manifest = read_package_json_from_tarball(&bytes).unwrap();
        assert_eq!(manifest.name, "from-tgz");
        assert_eq!(manifest.version, "2.0.0");

        let empty = build_tgz(&[("package/index.js", b"")]);
        assert!(read_package_json_from_tarball(&empty).is_err());
    }
}
