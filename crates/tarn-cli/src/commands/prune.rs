//! `tarn prune`.

use super::{plural, Output};
use tarn_core::pkg::workspaces::find_workspace_root;
use tarn_core::pkg::{prune, PkgError, PruneOptions};
use tarn_core::Config;

pub fn run(config: &Config, production: bool, dry_run: bool, out: &Output) -> Result<(), PkgError> {
    let root = find_workspace_root(&config.cwd).unwrap_or_else(|| config.cwd.clone());
    let report = prune(
        &root,
        PruneOptions {
            production,
            dry_run,
        },
    )?;

    if report.is_empty() {
        out.line("Checked node_modules (no changes)");
        return Ok(());
    }

    let verbose = config.verbosity > 0;
    for pkg in &report.removed {
        if verbose {
            let shown = pkg.path.strip_prefix(&root).unwrap_or(&pkg.path);
            out.line(format!(" - {} ({})", pkg.name, shown.display()));
        } else {
            out.line(format!(" - {}", pkg.name));
        }
    }
    if verbose {
        for bin in &report.removed_bins {
            let shown = bin.strip_prefix(&root).unwrap_or(bin);
            out.line(format!(" - {}", shown.display()));
        }
    }

    out.line("");
    let count = plural(report.removed.len(), "package");
    if report.dry_run {
        out.line(format!(" {count} would be removed (dry run)"));
    } else {
        out.line(format!(" {count} removed"));
    }
    Ok(())
}
