#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use commands::add::AddArgs;
use commands::install::InstallArgs;
use commands::remove::RemoveArgs;
use commands::Output;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;
use tarn_core::pkg::workspaces::find_workspace_root;
use tarn_core::Config;

#[derive(Parser, Debug)]
#[command(name = "tarn")]
#[command(author, version, about = "A fast npm-compatible package manager", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v INFO, -vv DEBUG, -vvv TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors
    #[arg(long, global = true)]
    silent: bool,

    /// Write logs to stderr as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install the project's dependencies
    #[command(visible_alias = "i")]
    Install(InstallArgs),

    /// Add dependencies to package.json and install them
    #[command(visible_alias = "a")]
    Add(AddArgs),

    /// Remove dependencies from package.json
    #[command(visible_alias = "rm")]
    Remove(RemoveArgs),

    /// Register the current package, or link a registered package into this project
    Link {
        /// Registered package to link (omit to register the current package)
        package: Option<String>,

        /// Add `link:<name>` to package.json dependencies
        #[arg(long)]
        save: bool,
    },

    /// Unregister the current package, or remove a linked package from node_modules
    Unlink {
        /// Linked package to remove (omit to unregister the current package)
        package: Option<String>,
    },

    /// Remove packages from node_modules that nothing depends on
    Prune {
        /// Treat devDependencies as extraneous
        #[arg(long)]
        production: bool,

        /// Report what would be removed without removing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Package manager utilities
    Pm {
        #[command(subcommand)]
        pm_cmd: PmCommands,
    },
}

#[derive(clap::Subcommand, Debug)]
enum PmCommands {
    /// List installed dependencies from the lockfile
    Ls {
        /// List every package, not only direct dependencies
        #[arg(long, conflicts_with = "link")]
        all: bool,

        /// List packages registered with `tarn link`
        #[arg(long)]
        link: bool,
    },

    /// Print the content store location
    Cache {
        #[command(subcommand)]
        cache_cmd: Option<PmCacheCommands>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum PmCacheCommands {
    /// Delete everything in the content store
    Rm,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json);

    let cwd = match cli.cwd {
        Some(path) => path,
        None => std::env::current_dir().into_diagnostic()?,
    };
    let cwd = dunce::canonicalize(&cwd).unwrap_or(cwd);
    let out = Output::new(cli.silent);

    // bunfig.toml lives next to the workspace root.
    let install = match find_workspace_root(&cwd) {
        Some(root) => match Config::load_install_config(&root) {
            Ok(install) => install,
            Err(err) => {
                out.fail(&err.to_string());
                std::process::exit(1);
            }
        },
        None => tarn_core::InstallConfig::default(),
    };
    let config = Config::new(cwd)
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.log_json)
        .with_install(install);

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let span = tracing::info_span!("cmd", cwd = %config.cwd.display());
    let _guard = span.enter();

    let result = runtime.block_on(async {
        match &cli.command {
            Commands::Install(args) => commands::install::run(&config, args, &out).await,
            Commands::Add(args) => commands::add::run(&config, args, &out).await,
            Commands::Remove(args) => commands::remove::run(&config, args, &out).await,
            Commands::Link { package, save } => {
                commands::link::link(&config, package.as_deref(), *save, &out).await
            }
            Commands::Unlink { package } => {
                commands::link::unlink(&config, package.as_deref(), &out)
            }
            Commands::Prune {
                production,
                dry_run,
            } => commands::prune::run(&config, *production, *dry_run, &out),
            Commands::Pm { pm_cmd } => match pm_cmd {
                PmCommands::Ls { link: true, .. } => commands::pm::ls_links(&out),
                PmCommands::Ls { all, .. } => commands::pm::ls(&config, *all, &out),
                PmCommands::Cache { cache_cmd: None } => commands::pm::cache_dir(&config, &out),
                PmCommands::Cache {
                    cache_cmd: Some(PmCacheCommands::Rm),
                } => commands::pm::cache_rm(&config, &out),
            },
        }
    });

    if let Err(err) = result {
        out.fail(err.message());
        std::process::exit(1);
    }
    Ok(())
}
