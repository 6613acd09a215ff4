//! `os` / `cpu` platform filtering.

use super::error::PkgError;

/// Values npm recognizes in a package's `os` field.
pub const KNOWN_OS: &[&str] = &[
    "aix", "android", "darwin", "freebsd", "linux", "openbsd", "sunos", "win32", "netbsd",
];

/// Values npm recognizes in a package's `cpu` field.
pub const KNOWN_CPU: &[&str] = &[
    "arm", "arm64", "ia32", "mips", "mipsel", "ppc", "ppc64", "riscv64", "s390", "s390x", "x64",
    "loong64",
];

/// The set of values to install for along one axis (os or cpu).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSet {
    /// Every package matches (`--cpu '*'`).
    Any,
    /// Match if any listed value matches.
    OneOf(Vec<String>),
}

impl TargetSet {
    /// Build from CLI values. Empty uses `host`; a `*` overrides everything.
    ///
    /// # Errors
    /// Returns `INVALID_PLATFORM` for values outside `known`.
    pub fn from_cli(
        values: &[String],
        known: &[&str],
        host: &str,
        axis: &str,
    ) -> Result<Self, PkgError> {
        if values.is_empty() {
            return Ok(Self::OneOf(vec![host.to_string()]));
        }
        if values.iter().any(|v| v == "*") {
            return Ok(Self::Any);
        }
        for value in values {
            if !known.contains(&value.as_str()) {
                return Err(PkgError::invalid_platform(format!(
                    "invalid {axis} \"{value}\" (expected one of: {})",
                    known.join(", ")
                )));
            }
        }
        Ok(Self::OneOf(values.to_vec()))
    }
}

/// The platform packages are installed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: TargetSet,
    pub cpu: TargetSet,
}

impl Platform {
    /// The machine tarn is running on.
    #[must_use]
    pub fn host() -> Self {
        Self {
            os: TargetSet::OneOf(vec![host_os().to_string()]),
            cpu: TargetSet::OneOf(vec![host_cpu().to_string()]),
        }
    }

    /// Every package installs. Used to lay out lockfiles independently of the host.
    #[must_use]
    pub fn any() -> Self {
        Self {
            os: TargetSet::Any,
            cpu: TargetSet::Any,
        }
    }

    /// Build from `--os` / `--cpu` values.
    ///
    /// # Errors
    /// Returns `INVALID_PLATFORM` for unknown values.
    pub fn from_cli(os: &[String], cpu: &[String]) -> Result<Self, PkgError> {
        Ok(Self {
            os: TargetSet::from_cli(os, KNOWN_OS, host_os(), "os")?,
            cpu: TargetSet::from_cli(cpu, KNOWN_CPU, host_cpu(), "cpu")?,
        })
    }

    /// Whether a package declaring `os` and `cpu` installs on this platform.
    #[must_use]
    pub fn allows(&self, os: &[String], cpu: &[String]) -> bool {
        allows(os, &self.os) && allows(cpu, &self.cpu)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::host()
    }
}

/// Evaluate one axis of a package constraint against the target set.
///
/// Entries prefixed with `!` exclude; `*` matches unconditionally.
#[must_use]
pub fn allows(constraint: &[String], target: &TargetSet) -> bool {
    if constraint.is_empty() || constraint.iter().any(|c| c == "*") {
        return true;
    }
    let TargetSet::OneOf(values) = target else {
        return true;
    };

    let (negated, positive): (Vec<&String>, Vec<&String>) =
        constraint.iter().partition(|c| c.starts_with('!'));

    values.iter().any(|v| {
        let included = positive.is_empty() || positive.iter().any(|p| *p == v);
        let excluded = negated.iter().any(|n| &n[1..] == v.as_str());
        included && !excluded
    })
}

/// npm's name for the host OS.
#[must_use]
pub fn host_os() -> &'static str {
    node_os(std::env::consts::OS)
}

/// npm's name for the host CPU.
#[must_use]
pub fn host_cpu() -> &'static str {
    node_cpu(std::env::consts::ARCH)
}

/// Map a Rust `target_os` to Node's `process.platform`.
fn node_os(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        "windows" => "win32",
        "solaris" | "illumos" => "sunos",
        other => other,
    }
}

/// Map a Rust `target_arch` to Node's `process.arch`.
fn node_cpu(arch: &str) -> &str {
    match arch {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" => "ia32",
        "powerpc64" => "ppc64",
        "powerpc" => "ppc",
        "loongarch64" => "loong64",
        other => other,
    }
}
