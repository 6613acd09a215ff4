//! `tarn add`.
//!
//! Requests are written to `package.json` first so the normal install
//! pipeline picks them up. If anything fails, the original file is put back.

use super::install::{InstallArgs, Pipeline};
use super::{package_dir, Output};
use std::fs;
use std::path::Path;
use tarn_core::pkg::manifest::{add_dependency, DependencySection};
use tarn_core::pkg::spec::TarballSource;
use tarn_core::pkg::tarball::read_package_json_from_tarball;
use tarn_core::pkg::{git, Context, DependencyRequest, PackageManifest, PkgError, Specifier};
use tarn_core::Config;
use tarn_util::fs::atomic_write;
use tracing::warn;

#[derive(clap::Args, Debug, Clone)]
pub struct AddArgs {
    /// Packages to add: name, name@range, or a git/tarball/path source
    #[arg(required = true, value_name = "SPEC")]
    pub specs: Vec<String>,

    /// Add to devDependencies
    #[arg(short = 'd', long = "dev", short_alias = 'D', alias = "save-dev")]
    pub dev: bool,

    /// Add to optionalDependencies
    #[arg(long)]
    pub optional: bool,

    /// Save the exact resolved version instead of a ^range
    #[arg(short = 'E', long)]
    pub exact: bool,

    #[command(flatten)]
    pub install: InstallArgs,
}

/// A request with its dependency name known.
struct Addition {
    name: String,
    request: DependencyRequest,
}

pub async fn run(config: &Config, args: &AddArgs, out: &Output) -> Result<(), PkgError> {
    let requests = args
        .specs
        .iter()
        .map(|s| DependencyRequest::parse(s))
        .collect::<Result<Vec<_>, _>>()?;

    let dir = package_dir(&config.cwd)?;
    let manifest_path = dir.join("package.json");
    let original = fs::read(&manifest_path).map_err(|e| {
        PkgError::package_json_invalid(format!("failed to read {}: {e}", manifest_path.display()))
    })?;

    let result = add_and_install(config, args, out, &dir, requests).await;
    if result.is_err() {
        if let Err(e) = atomic_write(&manifest_path, &original) {
            warn!(path = %manifest_path.display(), error = %e, "failed to restore package.json");
        }
    }
    result
}

async fn add_and_install(
    config: &Config,
    args: &AddArgs,
    out: &Output,
    dir: &Path,
    requests: Vec<DependencyRequest>,
) -> Result<(), PkgError> {
    let mut pipeline = Pipeline::open(config, args.install.clone(), *out)?;
    let manifest_path = dir.join("package.json");
    let section = if args.optional {
        DependencySection::OptionalDependencies
    } else if args.dev {
        DependencySection::DevDependencies
    } else {
        DependencySection::Dependencies
    };

    let mut additions = Vec::with_capacity(requests.len());
    for request in requests {
        let name = match &request.name {
            Some(name) => name.clone(),
            None => source_name(pipeline.context(), dir, &request).await?,
        };
        let spec = if request.is_bare() {
            "latest".to_string()
        } else {
            request.raw_spec.clone()
        };
        add_dependency(&manifest_path, section, &name, &spec)?;
        additions.push(Addition { name, request });
    }

    pipeline.reload()?;
    let member = pipeline
        .workspaces()
        .members
        .values()
        .find(|m| same_dir(&m.dir, dir))
        .map(|m| m.path.clone())
        .unwrap_or_default();

    let mut resolved = pipeline.resolve().await?;

    // Bare names become ^<resolved>; --exact pins registry requests.
    for addition in &additions {
        let pins = args.exact && is_registry(&addition.request.spec);
        if !addition.request.is_bare() && !pins {
            continue;
        }
        let graph = resolved.graph_mut();
        let version = graph
            .workspaces
            .get(&member)
            .and_then(|ws| ws.dependencies.get(&addition.name))
            .and_then(|edge| edge.target.as_ref())
            .and_then(|key| graph.packages.get(key))
            .map(|pkg| pkg.version.clone());
        let Some(version) = version else {
            continue;
        };

        let spec = if args.exact {
            version
        } else {
            format!("^{version}")
        };
        add_dependency(&manifest_path, section, &addition.name, &spec)?;
        if let Some(edge) = graph
            .workspaces
            .get_mut(&member)
            .and_then(|ws| ws.dependencies.get_mut(&addition.name))
        {
            edge.spec = spec;
        }
    }

    pipeline.install(resolved).await?;
    Ok(())
}

fn is_registry(spec: &Specifier) -> bool {
    matches!(spec, Specifier::SemverRange(_) | Specifier::DistTag(_))
}

fn same_dir(a: &Path, b: &Path) -> bool {
    let canon = |p: &Path| dunce::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    canon(a) == canon(b)
}

/// Read the package name from a nameless source (path, tarball or git).
async fn source_name(
    ctx: &Context,
    dir: &Path,
    request: &DependencyRequest,
) -> Result<String, PkgError> {
    let failed = |detail: Option<String>| {
        PkgError::resolve_failed(match detail {
            Some(detail) => format!("{} failed to resolve: {detail}", request.raw_spec),
            None => format!("{} failed to resolve", request.raw_spec),
        })
    };

    let manifest = match &request.spec {
        Specifier::LocalFolder(path) => {
            PackageManifest::read(&dir.join(path).join("package.json")).map_err(|_| failed(None))?
        }
        Specifier::Tarball(TarballSource::Path(path)) => {
            let bytes = fs::read(dir.join(path)).map_err(|_| failed(None))?;
            read_package_json_from_tarball(&bytes)
                .map_err(|e| failed(Some(e.message().to_string())))?
        }
        Specifier::Tarball(TarballSource::Url(url)) => {
            let bytes = ctx.registry.fetch_tarball(url).await?;
            read_package_json_from_tarball(&bytes)
                .map_err(|e| failed(Some(e.message().to_string())))?
        }
        Specifier::GitUrl(source) => {
            git::clone_at(&ctx.store, &source.url, source.committish.as_deref())
                .await?
                .manifest
        }
        Specifier::GithubRepo {
            owner,
            repo,
            committish,
        } => {
            let url = format!("https://github.com/{owner}/{repo}.git");
            git::clone_at(&ctx.store, &url, committish.as_deref()).await?.manifest
        }
        _ => {
            return Err(PkgError::invalid_specifier(
                &request.raw_spec,
                "a package name is required",
            ))
        }
    };

    if manifest.name.is_empty() {
        return Err(failed(Some("package.json has no \"name\"".to_string())));
    }
    Ok(manifest.name)
}
