//! Subresource-integrity strings (`sha512-<base64>`).
//!
//! Hashes are computed over the tarball bytes as served, matching the
//! registry's `dist.integrity`. A tarball downloaded from a URL and the same
//! file read from disk therefore hash identically.

use super::error::PkgError;
use std::fmt;
use tarn_util::hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha512,
    /// Legacy or unsupported (`sha1-`, `sha256-`, ...); never verified.
    Unknown,
}

/// A parsed integrity value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Integrity {
    algorithm: Algorithm,
    raw: String,
}

impl Integrity {
    /// Parse an SRI string. Empty input means "unknown" and yields `None`.
    ///
    /// When several hashes are listed, the first sha512 one is used.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let sha512 = raw
            .split_whitespace()
            .find(|h| h.starts_with("sha512-"));
        Some(match sha512 {
            Some(h) => Self {
                algorithm: Algorithm::Sha512,
                raw: h.to_string(),
            },
            None => Self {
                algorithm: Algorithm::Unknown,
                raw: raw.to_string(),
            },
        })
    }

    /// Hash `bytes` with sha512.
    #[must_use]
    pub fn compute(bytes: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::Sha512,
            raw: hash::sha512_sri(bytes),
        }
    }

    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Check `bytes` against this hash. Unknown algorithms pass.
    ///
    /// # Errors
    /// Returns `INTEGRITY_CHECK_FAILED` on mismatch.
    pub fn verify(&self, package: &str, bytes: &[u8]) -> Result<(), PkgError> {
        if self.algorithm == Algorithm::Unknown {
            return Ok(());
        }
        let actual = hash::sha512_sri(bytes);
        if actual == self.raw {
            Ok(())
        } else {
            Err(PkgError::integrity_mismatch(package, &self.raw, &actual))
        }
    }
}

impl fmt::Display for Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
