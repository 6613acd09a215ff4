//! `tarn install` and the resolve → scan → install → lock pipeline that
//! `add`, `remove` and `link --save` reuse.

use super::{plural, Output};
use std::path::{Path, PathBuf};
use tarn_core::config::Linker;
use tarn_core::pkg::lockfile::{self, LockfileFormat};
use tarn_core::pkg::scanner::{enforce, CommandScanner, SecurityScanner};
use tarn_core::pkg::workspaces::find_workspace_root;
use tarn_core::pkg::{
    Context, ContextOptions, DependencyGraph, InstallOptions, InstallReport, Installer, Platform,
    PkgError, ResolveOutput, Resolver, WorkspaceSet, ROOT_WORKSPACE,
};
use tarn_core::Config;
use tracing::debug;

#[derive(clap::Args, Debug, Clone, Default)]
pub struct InstallArgs {
    /// Resolve and write the lockfile without installing anything
    #[arg(long)]
    pub lockfile_only: bool,

    /// Install optional packages for this CPU ('*' for every CPU)
    #[arg(long, value_name = "ARCH")]
    pub cpu: Vec<String>,

    /// Install optional packages for this OS ('*' for every OS)
    #[arg(long, value_name = "OS")]
    pub os: Vec<String>,

    /// Skip devDependencies
    #[arg(short = 'p', long)]
    pub production: bool,

    /// Use cached registry metadata without checking for updates
    #[arg(long)]
    pub prefer_offline: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub insecure: bool,

    /// Write the text lockfile (bun.lock) instead of bun.lockb
    #[arg(long)]
    pub save_text_lockfile: bool,

    /// node_modules layout: hoisted or isolated
    #[arg(long, value_name = "STRATEGY")]
    pub linker: Option<Linker>,

    /// Show what would be installed without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Also write a yarn.lock
    #[arg(short = 'y', long)]
    pub yarn: bool,

    /// Maximum registry requests in flight at once
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub network_concurrency: Option<u16>,
}

pub async fn run(config: &Config, args: &InstallArgs, out: &Output) -> Result<(), PkgError> {
    let pipeline = Pipeline::open(config, args.clone(), *out)?;
    let resolved = pipeline.resolve().await?;
    pipeline.install(resolved).await.map(|_| ())
}

/// A resolution plus the lockfile format found on disk.
pub struct Resolved {
    pub output: ResolveOutput,
    pub existing: Option<LockfileFormat>,
}

impl Resolved {
    pub fn graph_mut(&mut self) -> &mut DependencyGraph {
        &mut self.output.graph
    }
}

pub struct Pipeline {
    root: PathBuf,
    workspaces: WorkspaceSet,
    ctx: Context,
    args: InstallArgs,
    out: Output,
}

impl Pipeline {
    /// Locate the workspace root above `config.cwd` and build the install context.
    pub fn open(config: &Config, args: InstallArgs, out: Output) -> Result<Self, PkgError> {
        let root = find_workspace_root(&config.cwd)
            .ok_or_else(|| PkgError::package_json_not_found(&config.cwd.join("package.json")))?;
        if args.insecure {
            out.insecure();
        }

        let mut options = ContextOptions::from_env();
        options.prefer_offline = args.prefer_offline;
        options.insecure = args.insecure;
        options.platform = Platform::from_cli(&args.os, &args.cpu)?;

        let ctx = Context::new(&root, config.install.clone(), options)?;
        let workspaces = WorkspaceSet::load(&root)?;
        Ok(Self {
            root,
            workspaces,
            ctx,
            args,
            out,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn workspaces(&self) -> &WorkspaceSet {
        &self.workspaces
    }

    /// Re-read the workspace manifests after editing a `package.json`.
    pub fn reload(&mut self) -> Result<(), PkgError> {
        self.workspaces = WorkspaceSet::load(&self.root)?;
        Ok(())
    }

    pub fn production(&self) -> bool {
        self.args.production || self.ctx.install.production.unwrap_or(false)
    }

    /// Manifest fetches and tarball downloads in flight, from the flag or bunfig.
    fn network_concurrency(&self) -> Option<usize> {
        self.args
            .network_concurrency
            .map(usize::from)
            .or(self.ctx.install.network_concurrency)
            .filter(|n| *n > 0)
    }

    fn linker(&self) -> Linker {
        self.args.linker.or(self.ctx.install.linker).unwrap_or_default()
    }

    fn lockfile_format(&self, existing: Option<LockfileFormat>) -> LockfileFormat {
        if self.args.save_text_lockfile || self.ctx.install.save_text_lockfile == Some(true) {
            LockfileFormat::Text
        } else {
            existing.unwrap_or_default()
        }
    }

    pub async fn resolve(&self) -> Result<Resolved, PkgError> {
        let locked = lockfile::load(&self.root)?;
        let (graph, existing) = match locked {
            Some((graph, format)) => (Some(graph), Some(format)),
            None => (None, None),
        };

        let mut resolver = Resolver::new(&self.ctx, &self.workspaces).with_lockfile(graph.as_ref());
        if let Some(concurrency) = self.network_concurrency() {
            resolver = resolver.with_concurrency(concurrency);
        }
        let output = resolver.resolve().await?;
        for warning in &output.warnings {
            self.out.warn(warning);
        }
        debug!(
            packages = output.graph.packages.len(),
            fetched = output.fetched,
            reused = output.reused,
            "resolved"
        );
        Ok(Resolved { output, existing })
    }

    /// Scan, install and save the lockfile. Nothing is written if the
    /// scanner reports a fatal advisory; the lockfile is only written after
    /// every package was linked.
    pub async fn install(&self, resolved: Resolved) -> Result<InstallReport, PkgError> {
        let Resolved { output, existing } = resolved;
        let ResolveOutput {
            mut graph, prefetched, ..
        } = output;

        let mut options = InstallOptions {
            linker: self.linker(),
            production: self.production(),
            dry_run: self.args.dry_run,
            ..InstallOptions::default()
        };
        if let Some(concurrency) = self.network_concurrency() {
            options.concurrency = concurrency;
        }
        let installer = Installer::new(&self.ctx, &graph, options).with_prefetched(prefetched);
        self.scan(&installer).await?;

        let mut report = if self.args.lockfile_only {
            InstallReport {
                computed_integrity: installer.prefetched_integrity(),
                ..InstallReport::default()
            }
        } else {
            installer.run().await?
        };
        drop(installer);
        let filled = report.backfill_integrity(&mut graph);
        if filled > 0 {
            debug!(filled, "recorded computed integrity");
        }

        if self.args.lockfile_only {
            self.save_lockfile(&graph, existing)?;
            return Ok(report);
        }

        if !report.is_success() {
            let mut failures = std::mem::take(&mut report.failures);
            let first = failures.remove(0);
            for err in &failures {
                self.out.fail(err.message());
            }
            return Err(first);
        }

        self.summarize(&graph, &report);
        if !self.args.dry_run {
            self.save_lockfile(&graph, existing)?;
        }
        Ok(report)
    }

    async fn scan(&self, installer: &Installer<'_>) -> Result<(), PkgError> {
        let Some(program) = self.ctx.install.security.scanner.as_deref() else {
            return Ok(());
        };
        let program = Path::new(program);
        let program = if program.components().count() > 1 && program.is_relative() {
            self.root.join(program)
        } else {
            program.to_path_buf()
        };

        let packages = installer.scan_list();
        debug!(scanner = %program.display(), packages = packages.len(), "running security scanner");
        let advisories = CommandScanner::new(program).scan(&packages).await?;
        for advisory in enforce(advisories)? {
            self.out.warn(format!("security advisory: {advisory}"));
        }
        Ok(())
    }

    fn save_lockfile(
        &self,
        graph: &DependencyGraph,
        existing: Option<LockfileFormat>,
    ) -> Result<(), PkgError> {
        let declares_nothing = graph.workspaces.values().all(|ws| ws.dependencies.is_empty());
        if declares_nothing && existing.is_none() {
            return Ok(());
        }

        let changed = lockfile::save(&self.root, graph, self.lockfile_format(existing))?;
        if self.args.yarn {
            lockfile::save_yarn(&self.root, graph)?;
        }
        if changed {
            self.out.status("Saved lockfile");
        }
        Ok(())
    }

    fn summarize(&self, graph: &DependencyGraph, report: &InstallReport) {
        if let Some(root) = graph.workspaces.get(ROOT_WORKSPACE) {
            for (name, edge) in &root.dependencies {
                let Some(pkg) = edge
                    .target
                    .as_ref()
                    .filter(|k| report.installed.contains(*k))
                    .and_then(|k| graph.packages.get(k))
                else {
                    continue;
                };
                let version = if pkg.version.is_empty() { &edge.spec } else { &pkg.version };
                self.out.line(format!(" + {name}@{version}"));
            }
        }

        if self.args.dry_run {
            self.out.line("");
            let count = plural(report.installed.len(), "package");
            self.out.line(format!(" {count} would be installed"));
        } else if report.changed() {
            self.out.line("");
            self.out.line(format!(" {} installed", plural(report.installed.len(), "package")));
        } else {
            self.out.line(format!(
                "Checked {} across {} (no changes)",
                plural(report.unchanged, "install"),
                plural(graph.packages.len(), "package")
            ));
        }
    }
}
