use std::path::{Path, PathBuf};

/// Environment variable overriding the content store location.
pub const CACHE_DIR_ENV: &str = "BUN_INSTALL_CACHE_DIR";

/// Find the project root by walking up from `cwd` looking for `package.json`.
#[must_use]
pub fn project_root(cwd: &Path) -> Option<PathBuf> {
    let mut current = cwd.to_path_buf();

    loop {
        if current.join("package.json").is_file() {
            return Some(current);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Default location of the content store.
///
/// - Linux: `$XDG_CACHE_HOME/tarn/install` or `~/.cache/tarn/install`
/// - macOS: `~/Library/Caches/tarn/install`
/// - Windows: `%LOCALAPPDATA%\tarn\install`
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    let base = dirs_next::cache_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".tarn-cache"),
                |p| p.join(".cache").join("tarn"),
            )
        },
        |p| p.join("tarn"),
    );

    base.join("install")
}

/// Persistent data directory (global link registry).
///
/// - Linux: `$XDG_DATA_HOME/tarn` or `~/.local/share/tarn`
/// - macOS: `~/Library/Application Support/tarn`
/// - Windows: `%LOCALAPPDATA%\tarn`
#[must_use]
pub fn data_dir() -> PathBuf {
    dirs_next::data_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".tarn-data"),
                |p| p.join(".local").join("share").join("tarn"),
            )
        },
        |p| p.join("tarn"),
    )
}

/// Content store location: `BUN_INSTALL_CACHE_DIR`, then the configured
/// directory, then the platform default.
#[must_use]
pub fn resolve_cache_dir(env_override: Option<PathBuf>, configured: Option<&Path>) -> PathBuf {
    env_override
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| configured.map(Path::to_path_buf))
        .unwrap_or_else(default_cache_dir)
}
