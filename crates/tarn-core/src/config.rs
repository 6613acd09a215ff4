use crate::error::Error;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Name of the per-project configuration file.
pub const CONFIG_FILE_NAME: &str = "bunfig.toml";

/// Runtime configuration for the tarn CLI.
#[derive(Debug, Clone)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = WARN, 1 = INFO, 2 = DEBUG, 3+ = TRACE).
    pub verbosity: u8,

    /// Settings from the `[install]` table of `bunfig.toml`.
    pub install: InstallConfig,
}

/// Node modules layout strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linker {
    #[default]
    Hoisted,
    Isolated,
}

impl Linker {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hoisted => "hoisted",
            Self::Isolated => "isolated",
        }
    }
}

impl std::str::FromStr for Linker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hoisted" => Ok(Self::Hoisted),
            "isolated" => Ok(Self::Isolated),
            other => Err(format!("unknown linker '{other}' (expected hoisted or isolated)")),
        }
    }
}

/// `[install]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallConfig {
    /// Default registry URL.
    pub registry: Option<String>,
    pub linker: Option<Linker>,
    pub save_text_lockfile: Option<bool>,
    pub production: Option<bool>,
    pub prefer_offline: Option<bool>,
    /// Registry requests in flight at once.
    pub network_concurrency: Option<usize>,
    pub cache: CacheConfig,
    pub security: SecurityConfig,
}

/// `[install.cache]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: Option<PathBuf>,
}

/// `[install.security]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Path to an executable implementing the scanner protocol.
    pub scanner: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    install: InstallConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
            install: InstallConfig::default(),
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Load `bunfig.toml` from `dir` if present.
    ///
    /// Relative paths inside the file are resolved against `dir`.
    pub fn load_install_config(dir: &Path) -> Result<InstallConfig, Error> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(InstallConfig::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
            path: path.clone(),
            source,
        })?;
        let mut install = parse_install_config(&content)
            .map_err(|source| Error::ConfigParse { path, source })?;

        if let Some(cache_dir) = install.cache.dir.take() {
            install.cache.dir = Some(if cache_dir.is_relative() {
                dir.join(cache_dir)
            } else {
                cache_dir
            });
        }

        Ok(install)
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Set install settings.
    #[must_use]
    pub fn with_install(mut self, install: InstallConfig) -> Self {
        self.install = install;
        self
    }
}

/// Parse the `[install]` table out of a `bunfig.toml` document.
pub fn parse_install_config(content: &str) -> Result<InstallConfig, toml::de::Error> {
    let file: ConfigFile = toml::from_str(content)?;
    Ok(file.install)
}
