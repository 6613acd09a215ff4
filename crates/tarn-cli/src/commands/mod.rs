//! Command implementations.

pub mod add;
pub mod install;
pub mod link;
pub mod pm;
pub mod prune;
pub mod remove;

use std::fmt::Display;
use std::path::{Path, PathBuf};
use tarn_core::paths::project_root;
use tarn_core::pkg::PkgError;

/// Human-facing output. Results go to stdout, status lines and problems to
/// stderr. `--silent` keeps only errors and the `--insecure` warning.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    silent: bool,
}

impl Output {
    pub fn new(silent: bool) -> Self {
        Self { silent }
    }

    pub fn line(&self, text: impl Display) {
        if !self.silent {
            println!("{text}");
        }
    }

    /// Status line on stderr, e.g. `Saved lockfile`.
    pub fn status(&self, text: impl Display) {
        if !self.silent {
            eprintln!("{text}");
        }
    }

    pub fn warn(&self, text: impl Display) {
        if !self.silent {
            eprintln!("warn: {text}");
        }
    }

    pub fn fail(&self, message: &str) {
        eprintln!("error: {message}");
    }

    pub fn insecure(&self) {
        eprintln!(
            "warn: --insecure disables TLS certificate verification; \
             registry responses cannot be trusted"
        );
    }
}

/// Directory of the nearest `package.json` at or above `cwd`.
pub fn package_dir(cwd: &Path) -> Result<PathBuf, PkgError> {
    project_root(cwd).ok_or_else(|| PkgError::package_json_not_found(&cwd.join("package.json")))
}

/// `"1 package"`, `"3 packages"`.
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "package"), "1 package");
        assert_eq!(plural(0, "package"), "0 packages");
        assert_eq!(plural(12, "install"), "12 installs");
    }
}
