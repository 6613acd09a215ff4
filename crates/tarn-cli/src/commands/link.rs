//! `tarn link` / `tarn unlink`.
//!
//! - `tarn link` registers the current package in the global link registry
//! - `tarn link <pkg>` symlinks a registered package into `node_modules`
//! - `tarn link <pkg> --save` also records `link:<pkg>` and reinstalls
//! - `tarn unlink` unregisters the current package
//! - `tarn unlink <pkg>` removes the symlink from `node_modules`

use super::install::{InstallArgs, Pipeline};
use super::{package_dir, Output};
use tarn_core::pkg::link::{link_package, package_dir as module_dir};
use tarn_core::pkg::manifest::{add_dependency, DependencySection};
use tarn_core::pkg::{codes, LinkRegistry, PackageManifest, PkgError};
use tarn_core::Config;
use tarn_util::fs::remove_path;

pub async fn link(
    config: &Config,
    package: Option<&str>,
    save: bool,
    out: &Output,
) -> Result<(), PkgError> {
    let registry = LinkRegistry::default_location();
    let Some(name) = package else {
        let dir = package_dir(&config.cwd)?;
        let name = package_name(&dir)?;
        registry.register(&name, &dir)?;
        out.line(format!("Success! Registered \"{name}\""));
        out.line("");
        out.line(format!("To use {name} in a project, run:\n  tarn link {name}"));
        return Ok(());
    };

    let target = registry.lookup(name).ok_or_else(|| {
        PkgError::new(
            codes::FILE_NOT_FOUND,
            format!("package \"{name}\" is not linked; run `tarn link` in its directory first"),
        )
    })?;
    let dir = package_dir(&config.cwd)?;

    if save {
        add_dependency(
            &dir.join("package.json"),
            DependencySection::Dependencies,
            name,
            &format!("link:{name}"),
        )?;
        let pipeline = Pipeline::open(config, InstallArgs::default(), *out)?;
        let resolved = pipeline.resolve().await?;
        pipeline.install(resolved).await?;
    } else {
        link_package(&dir.join("node_modules"), name, &target)?;
    }
    out.line(format!("installed {name}@link:{name}"));
    Ok(())
}

pub fn unlink(config: &Config, package: Option<&str>, out: &Output) -> Result<(), PkgError> {
    let dir = package_dir(&config.cwd)?;
    match package {
        None => {
            let name = package_name(&dir)?;
            if LinkRegistry::default_location().unregister(&name)? {
                out.line(format!("success: unlinked package \"{name}\""));
            } else {
                out.warn(format!("\"{name}\" is not registered"));
            }
        }
        Some(name) => {
            let link = module_dir(&dir.join("node_modules"), name);
            let is_link = link
                .symlink_metadata()
                .is_ok_and(|m| m.file_type().is_symlink());
            if !is_link {
                return Err(PkgError::new(
                    codes::FILE_NOT_FOUND,
                    format!("\"{name}\" is not linked in {}", dir.display()),
                ));
            }
            remove_path(&link).map_err(|e| {
                PkgError::link_failed(format!("failed to remove {}: {e}", link.display()))
            })?;
            out.line(format!("success: unlinked \"{name}\""));
        }
    }
    Ok(())
}

fn package_name(dir: &std::path::Path) -> Result<String, PkgError> {
    let manifest = PackageManifest::read(&dir.join("package.json"))?;
    if manifest.name.is_empty() {
        return Err(PkgError::package_json_invalid(
            "package.json must have a \"name\" to be linked",
        ));
    }
    Ok(manifest.name)
}
