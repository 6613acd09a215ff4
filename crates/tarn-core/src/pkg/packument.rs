//! Registry package documents ("packuments").

use super::error::PkgError;
use super::manifest::{lenient_string_map, PackageManifest};
use super::spec::Specifier;
use super::version::{pick_version, VersionRange};
use serde::Deserialize;
use std::collections::BTreeMap;

/// The registry's document for one package name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Packument {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "dist-tags", default, deserialize_with = "lenient_string_map")]
    pub dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: BTreeMap<String, PackageManifest>,
}

impl Packument {
    /// Parse a packument body.
    ///
    /// # Errors
    /// Returns `REGISTRY_ERROR` if the body is not a packument.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PkgError> {
        serde_json::from_slice(bytes)
            .map_err(|e| PkgError::registry(format!("invalid package metadata: {e}")))
    }

    /// The `latest` dist-tag.
    #[must_use]
    pub fn latest(&self) -> Option<&str> {
        self.dist_tags.get("latest").map(String::as_str)
    }

    /// Choose the version entry satisfying a registry specifier.
    ///
    /// `display` is the request as the user wrote it, used in error messages.
    ///
    /// # Errors
    /// Returns `PACKAGE_NOT_FOUND` when nothing matches.
    pub fn select(&self, spec: &Specifier, display: &str) -> Result<&PackageManifest, PkgError> {
        let version = match spec {
            Specifier::SemverRange(range) => {
                let range = VersionRange::parse(range)?;
                pick_version(self.versions.keys().map(String::as_str), &range, self.latest())
            }
            Specifier::DistTag(tag) => self.dist_tags.get(tag).cloned(),
            Specifier::NpmAlias { spec, .. } => return self.select(spec, display),
            other => {
                return Err(PkgError::resolve_failed(format!(
                    "{display} is not a registry specifier ({other:?})"
                )))
            }
        };

        version
            .and_then(|v| self.versions.get(&v))
            .ok_or_else(|| PkgError::no_matching_version(&self.name, display))
    }

    /// Whether `version` is published and satisfies `range`.
    #[must_use]
    pub fn has_satisfying(&self, version: &str, range: &VersionRange) -> bool {
        self.versions.contains_key(version)
            && semver::Version::parse(version).is_ok_and(|v| range.matches(&v))
    }
}
