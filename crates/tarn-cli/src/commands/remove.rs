//! `tarn remove`.

use super::install::{InstallArgs, Pipeline};
use super::{package_dir, plural, Output};
use std::fs;
use tarn_core::pkg::lockfile;
use tarn_core::pkg::manifest::remove_dependency;
use tarn_core::pkg::{prune, PkgError, PruneOptions};
use tarn_core::Config;
use tarn_util::fs::atomic_write;
use tracing::warn;

#[derive(clap::Args, Debug, Clone)]
pub struct RemoveArgs {
    /// Dependencies to remove
    #[arg(required = true, value_name = "NAME")]
    pub names: Vec<String>,

    #[command(flatten)]
    pub install: InstallArgs,
}

pub async fn run(config: &Config, args: &RemoveArgs, out: &Output) -> Result<(), PkgError> {
    let dir = package_dir(&config.cwd)?;
    let manifest_path = dir.join("package.json");
    let original = fs::read(&manifest_path).map_err(|e| {
        PkgError::package_json_invalid(format!("failed to read {}: {e}", manifest_path.display()))
    })?;

    let mut removed = Vec::new();
    for name in &args.names {
        if remove_dependency(&manifest_path, name)? {
            removed.push(name.as_str());
        } else {
            out.warn(format!("{name} is not in package.json"));
        }
    }
    if removed.is_empty() {
        out.line("No packages removed");
        return Ok(());
    }

    let result = reinstall(config, args, out).await;
    match result {
        Ok(()) => {
            for name in removed {
                out.line(format!(" - {name}"));
            }
            Ok(())
        }
        Err(err) => {
            if let Err(e) = atomic_write(&manifest_path, &original) {
                warn!(
                    path = %manifest_path.display(),
                    error = %e,
                    "failed to restore package.json"
                );
            }
            Err(err)
        }
    }
}

async fn reinstall(config: &Config, args: &RemoveArgs, out: &Output) -> Result<(), PkgError> {
    let pipeline = Pipeline::open(config, args.install.clone(), *out)?;
    let production = pipeline.production();

    let nothing_left = pipeline
        .workspaces()
        .members
        .values()
        .all(|m| !m.manifest.has_dependencies());
    if nothing_left {
        if lockfile::remove(pipeline.root())? {
            out.status("Removed lockfile");
        }
    } else {
        let resolved = pipeline.resolve().await?;
        pipeline.install(resolved).await?;
    }

    let report = prune(
        pipeline.root(),
        PruneOptions {
            production,
            dry_run: false,
        },
    )?;
    if !report.is_empty() {
        out.status(format!("Pruned {}", plural(report.removed.len(), "package")));
    }
    Ok(())
}
