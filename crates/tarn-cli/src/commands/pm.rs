//! `tarn pm` utilities.

use super::{plural, Output};
use std::path::PathBuf;
use tarn_core::paths::{resolve_cache_dir, CACHE_DIR_ENV};
use tarn_core::pkg::lockfile;
use tarn_core::pkg::workspaces::find_workspace_root;
use tarn_core::pkg::{codes, ContentStore, LinkRegistry, PkgError, ROOT_WORKSPACE};
use tarn_core::Config;

/// Print the dependency tree recorded in the lockfile.
pub fn ls(config: &Config, all: bool, out: &Output) -> Result<(), PkgError> {
    let root = find_workspace_root(&config.cwd)
        .ok_or_else(|| PkgError::package_json_not_found(&config.cwd.join("package.json")))?;
    let Some((graph, _)) = lockfile::load(&root)? else {
        return Err(PkgError::new(
            codes::FILE_NOT_FOUND,
            format!("no lockfile in {}; run `tarn install` first", root.display()),
        ));
    };

    let lines: Vec<String> = if all {
        graph
            .packages
            .values()
            .map(|pkg| format!("{}@{}", pkg.name, pkg.version))
            .collect()
    } else {
        graph
            .workspaces
            .get(ROOT_WORKSPACE)
            .map(|ws| {
                ws.dependencies
                    .iter()
                    .map(|(name, edge)| {
                        let version = edge
                            .target
                            .as_ref()
                            .and_then(|k| graph.packages.get(k))
                            .map_or(edge.spec.as_str(), |pkg| pkg.version.as_str());
                        format!("{name}@{version}")
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    out.line(format!(
        "{} node_modules ({})",
        root.display(),
        graph.packages.len()
    ));
    print_tree(&lines, out);
    Ok(())
}

/// Print the global link registry.
pub fn ls_links(out: &Output) -> Result<(), PkgError> {
    let registry = LinkRegistry::default_location();
    let links = registry.list()?;
    out.line(format!("{} ({})", registry.dir().display(), links.len()));
    let lines: Vec<String> = links
        .iter()
        .map(|(name, target)| format!("{name} -> {}", target.display()))
        .collect();
    print_tree(&lines, out);
    Ok(())
}

fn print_tree(lines: &[String], out: &Output) {
    let last = lines.len().saturating_sub(1);
    for (i, line) in lines.iter().enumerate() {
        let branch = if i == last { "└──" } else { "├──" };
        out.line(format!("{branch} {line}"));
    }
}

fn store_dir(config: &Config) -> PathBuf {
    let env = std::env::var_os(CACHE_DIR_ENV).map(PathBuf::from);
    resolve_cache_dir(env, config.install.cache.dir.as_deref())
}

/// Print where packages are cached.
pub fn cache_dir(config: &Config, out: &Output) -> Result<(), PkgError> {
    out.line(store_dir(config).display());
    Ok(())
}

/// Empty the content store.
pub fn cache_rm(config: &Config, out: &Output) -> Result<(), PkgError> {
    let store = ContentStore::new(store_dir(config));
    let removed = store.clear()?;
    out.line(format!(
        "Cleared {} from {}",
        plural(removed, "cached package"),
        store.root().display()
    ));
    Ok(())
}
