//! Dependency specifier parsing.
//!
//! A specifier is the right-hand side of a `package.json` dependency entry:
//! - `^1.2.0`, `1.2.3`, `>=1 <2` (ranges)
//! - `latest`, `beta` (dist-tags)
//! - `npm:other@^1` (aliases)
//! - `git+ssh://git@host/path.git#ref`, `git@host:path`, `github:owner/repo`, `owner/repo`
//! - `https://host/pkg.tgz`, `file:./pkg.tgz` (tarballs)
//! - `file:../dir`, `../dir` (folders)
//! - `link:name`, `workspace:*`

use super::error::PkgError;
use super::version::VersionRange;
use std::path::PathBuf;
use url::Url;

/// A parsed dependency specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Specifier {
    /// An npm semver range.
    SemverRange(String),
    /// A registry dist-tag.
    DistTag(String),
    /// `npm:<name>@<spec>`: install `name` under a different key.
    NpmAlias { name: String, spec: Box<Specifier> },
    /// Any git remote other than the GitHub shorthand.
    GitUrl(GitSource),
    /// `github:owner/repo` or `owner/repo`.
    GithubRepo {
        owner: String,
        repo: String,
        committish: Option<String>,
    },
    /// A tarball fetched from a URL or read from disk.
    Tarball(TarballSource),
    /// A local directory containing a `package.json`.
    LocalFolder(PathBuf),
    /// `link:<name>`: a package registered with `tarn link`.
    Link(String),
    /// `workspace:<range>`: a member of the current workspace.
    Workspace(String),
}

/// A git remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSource {
    /// URL handed to `git clone`.
    pub url: String,
    pub host: String,
    pub path: String,
    pub committish: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TarballSource {
    Url(String),
    Path(PathBuf),
}

impl Specifier {
    /// Parse a specifier string. Pure; no I/O.
    ///
    /// # Errors
    /// Returns `INVALID_SPECIFIER` for malformed input.
    pub fn parse(raw: &str) -> Result<Self, PkgError> {
        let s = raw.trim();

        if s.is_empty() {
            return Ok(Self::SemverRange("*".to_string()));
        }

        if let Some(rest) = s.strip_prefix("npm:") {
            return parse_alias(raw, rest);
        }

        if let Some(rest) = s.strip_prefix("workspace:") {
            let range = if rest.is_empty() { "*" } else { rest };
            return Ok(Self::Workspace(range.to_string()));
        }

        if let Some(rest) = s.strip_prefix("link:") {
            if rest.is_empty() {
                return Err(PkgError::invalid_specifier(raw, "missing link name"));
            }
            return Ok(Self::Link(rest.to_string()));
        }

        if s.starts_with("file://") {
            // URL semantics: `file://host/path` keeps only `/path`.
            let url = Url::parse(s).map_err(|e| PkgError::invalid_specifier(raw, e))?;
            return Ok(local_path(PathBuf::from(url.path())));
        }

        if let Some(rest) = s.strip_prefix("file:") {
            if rest.is_empty() {
                return Err(PkgError::invalid_specifier(raw, "missing path"));
            }
            return Ok(local_path(PathBuf::from(rest)));
        }

        if s.starts_with("http://") || s.starts_with("https://") {
            let (base, _) = split_committish(s);
            if base.ends_with(".git") {
                return parse_git_url(raw, s);
            }
            return Ok(Self::Tarball(TarballSource::Url(s.to_string())));
        }

        if ["git+", "git://", "ssh://"].iter().any(|p| s.starts_with(p)) {
            return parse_git_url(raw, s);
        }

        if let Some(rest) = s.strip_prefix("github:") {
            return parse_github(raw, rest);
        }

        for (prefix, host) in [("gitlab:", "gitlab.com"), ("bitbucket:", "bitbucket.org")] {
            if let Some(rest) = s.strip_prefix(prefix) {
                let (path, committish) = split_committish(rest);
                if path.split('/').filter(|p| !p.is_empty()).count() != 2 {
                    return Err(PkgError::invalid_specifier(raw, "expected owner/repo"));
                }
                let path = path.trim_end_matches(".git");
                return Ok(Self::GitUrl(GitSource {
                    url: format!("https://{host}/{path}.git"),
                    host: host.to_string(),
                    path: path.to_string(),
                    committish,
                }));
            }
        }

        if is_path_like(s) {
            return Ok(local_path(PathBuf::from(s)));
        }

        if let Some(source) = parse_scp(raw, s)? {
            return Ok(Self::GitUrl(source));
        }

        if is_github_shorthand(s) {
            return parse_github(raw, s);
        }

        if VersionRange::parse(s).is_ok() {
            return Ok(Self::SemverRange(s.to_string()));
        }

        if is_valid_tag(s) {
            return Ok(Self::DistTag(s.to_string()));
        }

        Err(PkgError::invalid_specifier(
            raw,
            "not a version range, tag, URL or path",
        ))
    }

    /// Whether this specifier is satisfied from the npm registry.
    #[must_use]
    pub fn is_registry(&self) -> bool {
        match self {
            Self::SemverRange(_) | Self::DistTag(_) => true,
            Self::NpmAlias { spec, .. } => spec.is_registry(),
            _ => false,
        }
    }
}

fn parse_alias(raw: &str, rest: &str) -> Result<Specifier, PkgError> {
    let (name, inner) = split_name_and_spec(rest);
    validate_package_name(name).map_err(|reason| PkgError::invalid_specifier(raw, reason))?;

    let spec = match inner {
        Some(inner) => Specifier::parse(inner)?,
        None => Specifier::DistTag("latest".to_string()),
    };
    if !spec.is_registry() {
        return Err(PkgError::invalid_specifier(
            raw,
            "npm: aliases must point at a registry version",
        ));
    }

    Ok(Specifier::NpmAlias {
        name: name.to_string(),
        spec: Box::new(spec),
    })
}

fn parse_git_url(raw: &str, s: &str) -> Result<Specifier, PkgError> {
    let (base, committish) = split_committish(s);
    let clone = base.strip_prefix("git+").unwrap_or(base);

    if let Ok(url) = Url::parse(clone) {
        if let Some(host) = url.host_str() {
            let path = url.path().trim_start_matches('/').to_string();
            if path.is_empty() {
                return Err(PkgError::invalid_specifier(raw, "empty repository path"));
            }
            return Ok(Specifier::GitUrl(GitSource {
                url: clone.to_string(),
                host: host.to_string(),
                path,
                committish,
            }));
        }
    }

    // `git+ssh://git@host:owner/repo.git` mixes URL and SCP syntax.
    let after_scheme = clone.split_once("://").map_or(clone, |(_, rest)| rest);
    match parse_scp(raw, after_scheme)? {
        Some(mut source) => {
            source.committish = committish;
            Ok(Specifier::GitUrl(source))
        }
        None => Err(PkgError::invalid_specifier(raw, "unparseable git URL")),
    }
}

/// Parse `user@host:path[#ref]`. Returns `None` when `s` is not SCP-shaped.
fn parse_scp(raw: &str, s: &str) -> Result<Option<GitSource>, PkgError> {
    if s.contains("://") {
        return Ok(None);
    }
    let Some((user_host, rest)) = s.split_once(':') else {
        return Ok(None);
    };
    let Some((user, host)) = user_host.split_once('@') else {
        return Ok(None);
    };
    if user.is_empty() || host.is_empty() || user_host.contains('/') {
        return Ok(None);
    }

    let (path, committish) = split_committish(rest);
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return Err(PkgError::invalid_specifier(raw, "empty repository path"));
    }

    Ok(Some(GitSource {
        url: format!("{user}@{host}:{path}"),
        host: host.to_string(),
        path: path.to_string(),
        committish,
    }))
}

fn parse_github(raw: &str, s: &str) -> Result<Specifier, PkgError> {
    let (path, committish) = split_committish(s);
    let mut parts = path.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty() => {
            Ok(Specifier::GithubRepo {
                owner: owner.to_string(),
                repo: repo.trim_end_matches(".git").to_string(),
                committish,
            })
        }
        _ => Err(PkgError::invalid_specifier(raw, "expected owner/repo")),
    }
}

fn local_path(path: PathBuf) -> Specifier {
    if is_tarball_path(&path.to_string_lossy()) {
        Specifier::Tarball(TarballSource::Path(path))
    } else {
        Specifier::LocalFolder(path)
    }
}

fn split_committish(s: &str) -> (&str, Option<String>) {
    match s.split_once('#') {
        Some((base, c)) if !c.is_empty() => (base, Some(c.to_string())),
        Some((base, _)) => (base, None),
        None => (s, None),
    }
}

fn is_path_like(s: &str) -> bool {
    s == "."
        || s == ".."
        || s.starts_with("./")
        || s.starts_with("../")
        || s.starts_with('/')
        || s.starts_with("~/")
}

/// Whether a path or URL names a tarball.
#[must_use]
pub fn is_tarball_path(s: &str) -> bool {
    s.ends_with(".tgz") || s.ends_with(".tar.gz") || s.ends_with(".tar")
}

fn is_github_shorthand(s: &str) -> bool {
    let (path, _) = split_committish(s);
    if path.starts_with('@') || path.starts_with('.') || path.contains(':') {
        return false;
    }
    let mut parts = path.split('/');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(owner), Some(repo), None)
            if !owner.is_empty() && !repo.is_empty()
                && owner
                    .chars()
                    .chain(repo.chars())
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    )
}

fn is_valid_tag(s: &str) -> bool {
    !s.starts_with('.')
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Split `name@spec` at the version delimiter, skipping a leading scope `@`.
fn split_name_and_spec(input: &str) -> (&str, Option<&str>) {
    let search_from = usize::from(input.starts_with('@'));
    match input[search_from..].find('@') {
        Some(pos) => {
            let at = pos + search_from;
            let spec = &input[at + 1..];
            (&input[..at], (!spec.is_empty()).then_some(spec))
        }
        None => (input, None),
    }
}

/// Validate an npm package name (`name` or `@scope/name`).
pub fn validate_package_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("empty package name".to_string());
    }
    if name.len() > 214 {
        return Err(format!("package name '{name}' is longer than 214 characters"));
    }

    let bare = if let Some(scoped) = name.strip_prefix('@') {
        match scoped.split_once('/') {
            Some((scope, bare)) if !scope.is_empty() && !bare.is_empty() => {
                check_name_chars(scope, name)?;
                bare
            }
            _ => return Err(format!("invalid scoped package name '{name}'")),
        }
    } else {
        name
    };

    if bare.starts_with('.') || bare.starts_with('_') {
        return Err(format!("package name '{name}' cannot start with '.' or '_'"));
    }
    check_name_chars(bare, name)
}

fn check_name_chars(part: &str, name: &str) -> Result<(), String> {
    match part
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '~')))
    {
        Some(c) => Err(format!("invalid character '{c}' in package name '{name}'")),
        None => Ok(()),
    }
}

/// A dependency requested on the command line (`tarn add <request>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRequest {
    /// Dependency key; `None` when it must be read from the fetched package.
    pub name: Option<String>,
    pub spec: Specifier,
    /// The specifier text as given (empty for bare names).
    pub raw_spec: String,
}

impl DependencyRequest {
    /// Parse `name`, `name@spec`, `@scope/name@spec`, or a bare URL/path.
    ///
    /// # Errors
    /// Returns `INVALID_SPECIFIER` for malformed input.
    pub fn parse(input: &str) -> Result<Self, PkgError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PkgError::invalid_specifier(input, "empty"));
        }

        if is_unnamed_source(input) {
            return Ok(Self {
                name: None,
                spec: Specifier::parse(input)?,
                raw_spec: input.to_string(),
            });
        }

        let (name, spec) = split_name_and_spec(input);

        match spec {
            // `git@github.com:owner/repo` has the shape `name@spec` but is a remote.
            Some(spec) if looks_like_scp_tail(spec) => Ok(Self {
                name: None,
                spec: Specifier::parse(input)?,
                raw_spec: input.to_string(),
            }),
            Some(spec) => {
                validate_package_name(name)
                    .map_err(|reason| PkgError::invalid_specifier(input, reason))?;
                Ok(Self {
                    name: Some(name.to_string()),
                    spec: Specifier::parse(spec)?,
                    raw_spec: spec.to_string(),
                })
            }
            None if !name.starts_with('@') && is_github_shorthand(name) => Ok(Self {
                name: None,
                spec: Specifier::parse(name)?,
                raw_spec: name.to_string(),
            }),
            None => {
                validate_package_name(name)
                    .map_err(|reason| PkgError::invalid_specifier(input, reason))?;
                Ok(Self {
                    name: Some(name.to_string()),
                    spec: Specifier::DistTag("latest".to_string()),
                    raw_spec: String::new(),
                })
            }
        }
    }

    /// Whether no specifier was given (`tarn add react`).
    #[must_use]
    pub fn is_bare(&self) -> bool {
        self.raw_spec.is_empty()
    }
}

fn is_unnamed_source(s: &str) -> bool {
    const PREFIXES: &[&str] = &[
        "http://", "https://", "git+", "git://", "ssh://", "file:", "github:", "gitlab:",
        "bitbucket:",
    ];
    PREFIXES.iter().any(|p| s.starts_with(p)) || is_path_like(s)
}

fn looks_like_scp_tail(spec: &str) -> bool {
    const NAMED_PREFIXES: &[&str] = &[
        "npm:", "file:", "link:", "workspace:", "github:", "gitlab:", "bitbucket:", "http:",
        "https:", "git+", "git:", "ssh:",
    ];
    if NAMED_PREFIXES.iter().any(|p| spec.starts_with(p)) {
        return false;
    }
    spec.split_once(':')
        .is_some_and(|(host, _)| !host.is_empty() && !host.contains('/'))
}
