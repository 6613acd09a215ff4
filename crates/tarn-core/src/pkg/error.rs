//! Package manager error types.

use std::fmt;
use std::io;
use std::path::Path;

/// Package manager error codes.
pub mod codes {
    pub const INVALID_SPECIFIER: &str = "INVALID_SPECIFIER";
    pub const PACKAGE_NOT_FOUND: &str = "PACKAGE_NOT_FOUND";
    pub const INVALID_PLATFORM: &str = "INVALID_PLATFORM";
    pub const INTEGRITY_CHECK_FAILED: &str = "INTEGRITY_CHECK_FAILED";
    pub const RESOLVE_FAILED: &str = "RESOLVE_FAILED";
    pub const SECURITY_ADVISORY_FATAL: &str = "SECURITY_ADVISORY_FATAL";
    pub const FILE_NOT_FOUND: &str = "FILE_NOT_FOUND";
    pub const VERSION_CONFLICT: &str = "VERSION_CONFLICT";

    pub const REGISTRY_ERROR: &str = "REGISTRY_ERROR";
    pub const DOWNLOAD_FAILED: &str = "DOWNLOAD_FAILED";
    pub const EXTRACT_FAILED: &str = "EXTRACT_FAILED";
    pub const LINK_FAILED: &str = "LINK_FAILED";
    pub const CACHE_ERROR: &str = "CACHE_ERROR";
    pub const LOCKFILE_INVALID: &str = "LOCKFILE_INVALID";
    pub const PACKAGE_JSON_NOT_FOUND: &str = "PACKAGE_JSON_NOT_FOUND";
    pub const PACKAGE_JSON_INVALID: &str = "PACKAGE_JSON_INVALID";
    pub const SCANNER_FAILED: &str = "SCANNER_FAILED";
}

/// Package manager error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgError {
    code: &'static str,
    message: String,
}

impl PkgError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn invalid_specifier(spec: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            codes::INVALID_SPECIFIER,
            format!("invalid specifier \"{spec}\": {reason}"),
        )
    }

    /// Registry answered 404 for a package name.
    #[must_use]
    pub fn not_found(name: &str, url: &str) -> Self {
        Self::new(
            codes::PACKAGE_NOT_FOUND,
            format!("package \"{name}\" not found {url} 404"),
        )
    }

    /// No published version satisfies a request.
    #[must_use]
    pub fn no_matching_version(name: &str, spec: &str) -> Self {
        Self::new(
            codes::PACKAGE_NOT_FOUND,
            format!("{name}@{spec} failed to resolve"),
        )
    }

    pub fn invalid_platform(msg: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PLATFORM, msg)
    }

    #[must_use]
    pub fn integrity_mismatch(package: &str, expected: &str, actual: &str) -> Self {
        Self::new(
            codes::INTEGRITY_CHECK_FAILED,
            format!("Integrity check failed for {package} (expected {expected}, got {actual})"),
        )
    }

    pub fn resolve_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::RESOLVE_FAILED, msg)
    }

    pub fn security_fatal(msg: impl Into<String>) -> Self {
        Self::new(codes::SECURITY_ADVISORY_FATAL, msg)
    }

    pub fn file_not_found(msg: impl Into<String>) -> Self {
        Self::new(codes::FILE_NOT_FOUND, msg)
    }

    pub fn version_conflict(msg: impl Into<String>) -> Self {
        Self::new(codes::VERSION_CONFLICT, msg)
    }

    pub fn registry(msg: impl Into<String>) -> Self {
        Self::new(codes::REGISTRY_ERROR, msg)
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::DOWNLOAD_FAILED, msg)
    }

    pub fn extract_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::EXTRACT_FAILED, msg)
    }

    pub fn link_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::LINK_FAILED, msg)
    }

    pub fn cache_error(msg: impl Into<String>) -> Self {
        Self::new(codes::CACHE_ERROR, msg)
    }

    pub fn lockfile_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::LOCKFILE_INVALID, msg)
    }

    #[must_use]
    pub fn package_json_not_found(path: &Path) -> Self {
        Self::new(
            codes::PACKAGE_JSON_NOT_FOUND,
            format!("package.json not found: {}", path.display()),
        )
    }

    pub fn package_json_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PACKAGE_JSON_INVALID, msg)
    }

    pub fn scanner_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::SCANNER_FAILED, msg)
    }
}

impl fmt::Display for PkgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PkgError {}

impl From<io::Error> for PkgError {
    fn from(e: io::Error) -> Self {
        Self::new(codes::CACHE_ERROR, e.to_string())
    }
}

impl From<reqwest::Error> for PkgError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::new(codes::REGISTRY_ERROR, format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::new(codes::REGISTRY_ERROR, format!("Connection failed: {e}"))
        } else {
            Self::new(codes::REGISTRY_ERROR, e.to_string())
        }
    }
}

impl From<serde_json::Error> for PkgError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(codes::REGISTRY_ERROR, format!("Invalid JSON: {e}"))
    }
}
