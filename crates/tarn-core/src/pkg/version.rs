//! npm version ranges on top of `semver`.
//!
//! Rust's `semver` crate speaks Cargo's dialect, so npm ranges are rewritten
//! before parsing:
//! - bare versions mean "exactly" (`1.2.3` → `=1.2.3`, `1.2` → `=1.2`)
//! - hyphen ranges: `1.0.0 - 2.0.0` → `>=1.0.0, <=2.0.0`
//! - space-separated comparators: `>= 2.1.2 < 3` → `>=2.1.2, <3`
//! - `||` alternatives are kept as separate requirements

use super::error::PkgError;
use semver::{Version, VersionReq};
use std::fmt;

/// A parsed npm version range (one or more `||` alternatives).
#[derive(Debug, Clone)]
pub struct VersionRange {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    /// Parse an npm range.
    ///
    /// # Errors
    /// Returns `INVALID_SPECIFIER` if any alternative cannot be parsed.
    pub fn parse(raw: &str) -> Result<Self, PkgError> {
        let trimmed = raw.trim();
        let mut alternatives = Vec::new();

        for alt in trimmed.split("||") {
            let req = parse_alternative(alt.trim())
                .map_err(|e| PkgError::invalid_specifier(raw, e))?;
            alternatives.push(req);
        }

        Ok(Self {
            raw: trimmed.to_string(),
            alternatives,
        })
    }

    /// The range as written.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether `version` satisfies any alternative.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// Whether the range is the unconstrained `*`.
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.alternatives.iter().any(|r| *r == VersionReq::STAR)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for VersionRange {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for VersionRange {}

/// Check whether a version string satisfies a range string.
///
/// Unparseable inputs never satisfy.
#[must_use]
pub fn version_satisfies(version: &str, range: &str) -> bool {
    let Ok(version) = Version::parse(version) else {
        return false;
    };
    VersionRange::parse(range).is_ok_and(|r| r.matches(&version))
}

/// Pick the version to install for `range` out of the published `versions`.
///
/// Prefers `latest` when it satisfies the range (npm behavior), otherwise the
/// highest satisfying version.
#[must_use]
pub fn pick_version<'a, I>(
    versions: I,
    range: &VersionRange,
    latest: Option<&str>,
) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    if let Some(latest) = latest.and_then(|l| Version::parse(l).ok()) {
        if range.matches(&latest) {
            return Some(latest.to_string());
        }
    }

    let mut parsed: Vec<Version> = versions
        .into_iter()
        .filter_map(|v| Version::parse(v).ok())
        .filter(|v| range.matches(v))
        .collect();
    parsed.sort();
    parsed.pop().map(|v| v.to_string())
}

fn parse_alternative(alt: &str) -> Result<VersionReq, semver::Error> {
    if alt.is_empty() || alt == "*" || alt.eq_ignore_ascii_case("x") {
        return Ok(VersionReq::STAR);
    }

    if let Some((start, end)) = parse_hyphen_range(alt) {
        return VersionReq::parse(&format!(
            ">={}, <={}",
            strip_v(&start),
            strip_v(&end)
        ));
    }

    let converted = join_comparators(alt)
        .iter()
        .map(|c| normalize_comparator(c))
        .collect::<Vec<_>>()
        .join(", ");

    VersionReq::parse(&converted).or_else(|e| {
        // Last resort: x-ranges semver cannot express directly (`1.x.x`).
        VersionReq::parse(&convert_x_range(alt)).map_err(|_| e)
    })
}

/// Parse a hyphen range like "1.0.0 - 2.0.0".
fn parse_hyphen_range(range: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = range.split(" - ").collect();
    if parts.len() == 2 {
        let start = parts[0].trim();
        let end = parts[1].trim();
        if !start.is_empty() && !end.is_empty() {
            return Some((start.to_string(), end.to_string()));
        }
    }
    None
}

/// Split on whitespace, re-attaching operators written apart from their version.
///
/// `">= 2.1.2 < 3.0.0"` → `[">=2.1.2", "<3.0.0"]`
fn join_comparators(range: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut pending_op = String::new();

    for token in range.split_whitespace() {
        if token_has_version(token) {
            out.push(format!("{pending_op}{token}"));
            pending_op.clear();
        } else {
            pending_op.push_str(token);
        }
    }

    if !pending_op.is_empty() {
        out.push(pending_op);
    }
    out
}

/// Check if a token contains a version number (has digits or a wildcard).
fn token_has_version(token: &str) -> bool {
    token
        .chars()
        .any(|c| c.is_ascii_digit() || c == '*' || c == 'x' || c == 'X')
}

fn normalize_comparator(token: &str) -> String {
    let op_len = token
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^'))
        .unwrap_or(token.len());
    let (op, version) = token.split_at(op_len);
    let version = strip_v(version);

    if op.is_empty() && !version.contains(['x', 'X', '*']) {
        format!("={version}")
    } else {
        format!("{op}{version}")
    }
}

fn strip_v(version: &str) -> &str {
    version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version)
}

/// Convert an x-range to a comparator pair.
fn convert_x_range(range: &str) -> String {
    let parts: Vec<&str> = range.trim().split('.').collect();
    let is_wild = |p: &str| matches!(p, "x" | "X" | "*");

    match parts.as_slice() {
        [major, rest @ ..] if !rest.is_empty() && rest.iter().all(|p| is_wild(p)) => {
            if let Ok(m) = major.parse::<u64>() {
                return format!(">={m}.0.0, <{}.0.0", m + 1);
            }
        }
        [major, minor, patch] if is_wild(patch) => {
            if let (Ok(m), Ok(n)) = (major.parse::<u64>(), minor.parse::<u64>()) {
                return format!(">={m}.{n}.0, <{m}.{}.0", n + 1);
            }
        }
        _ => {}
    }

    range.replace(['x', 'X'], "0")
}
