//! `.npmrc` parsing.
//!
//! Recognized keys:
//! - `registry=URL` (default registry)
//! - `@scope:registry=URL` (scoped registries)
//! - `//host[:port]/path/:_authToken=TOKEN` with `${ENV_VAR}` expansion
//! - `strict-ssl=false`

use std::collections::HashMap;
use std::path::Path;
use url::Url;

/// Parsed `.npmrc` configuration.
#[derive(Debug, Clone, Default)]
pub struct NpmrcConfig {
    /// Default registry.
    pub registry: Option<Url>,
    /// Scope → registry URL mapping (e.g., `@myorg` → `https://npm.pkg.github.com/`).
    pub scoped_registries: HashMap<String, Url>,
    /// `host[:port][/path]` → auth token.
    pub auth_tokens: HashMap<String, String>,
    /// `strict-ssl`; `Some(false)` disables certificate checks.
    pub strict_ssl: Option<bool>,
}

impl NpmrcConfig {
    /// Token configured for the registry serving `url`, trying the longest
    /// path prefix first.
    #[must_use]
    pub fn token_for(&self, url: &Url) -> Option<&str> {
        let host = auth_host(url)?;
        let mut path = url.path().trim_end_matches('/').to_string();

        loop {
            let key = format!("{host}{path}");
            if let Some(token) = self.auth_tokens.get(&key) {
                return Some(token);
            }
            match path.rfind('/') {
                Some(pos) => path.truncate(pos),
                None => return None,
            }
        }
    }
}

fn auth_host(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn registry_url(value: &str) -> Option<Url> {
    let value = value.trim();
    if value.ends_with('/') {
        Url::parse(value).ok()
    } else {
        Url::parse(&format!("{value}/")).ok()
    }
}

/// Parse a single `.npmrc` file's content.
///
/// Ignores comments (`#`, `;`), blank lines and unknown keys.
#[must_use]
pub fn parse_npmrc(content: &str) -> NpmrcConfig {
    let mut config = NpmrcConfig::default();

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"');

        if key.starts_with('@') {
            if let Some((scope, "registry")) = key.split_once(':') {
                if let Some(url) = registry_url(value) {
                    config.scoped_registries.insert(scope.to_string(), url);
                }
            }
            continue;
        }

        if let Some(rest) = key.strip_prefix("//") {
            if let Some(host_part) = rest.strip_suffix(":_authToken") {
                let token = expand_env_vars(value);
                if !token.is_empty() {
                    config
                        .auth_tokens
                        .insert(host_part.trim_end_matches('/').to_string(), token);
                }
            }
            continue;
        }

        match key {
            "registry" => config.registry = registry_url(value),
            "strict-ssl" => config.strict_ssl = value.parse().ok(),
            _ => {}
        }
    }

    config
}

/// Load and merge `.npmrc` files from the project directory up to the root,
/// then `$HOME/.npmrc`. The nearest file wins.
#[must_use]
pub fn load_npmrc_files(project_dir: &Path) -> NpmrcConfig {
    let mut merged = NpmrcConfig::default();

    let mut dir = Some(project_dir.to_path_buf());
    while let Some(d) = dir {
        merge_file(&mut merged, &d.join(".npmrc"));
        dir = d.parent().map(Path::to_path_buf);
    }

    if let Some(home) = dirs_next::home_dir() {
        merge_file(&mut merged, &home.join(".npmrc"));
    }

    merged
}

fn merge_file(target: &mut NpmrcConfig, path: &Path) {
    if !path.is_file() {
        return;
    }
    match std::fs::read_to_string(path) {
        Ok(content) => merge_config(target, parse_npmrc(&content)),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to read .npmrc"),
    }
}

/// Merge `source` into `target`, keeping existing entries (first wins).
fn merge_config(target: &mut NpmrcConfig, source: NpmrcConfig) {
    if target.registry.is_none() {
        target.registry = source.registry;
    }
    if target.strict_ssl.is_none() {
        target.strict_ssl = source.strict_ssl;
    }
    for (scope, url) in source.scoped_registries {
        target.scoped_registries.entry(scope).or_insert(url);
    }
    for (host, token) in source.auth_tokens {
        target.auth_tokens.entry(host).or_insert(token);
    }
}

/// Expand `${ENV_VAR}` patterns. Unset variables expand to nothing.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
            if let Ok(val) = std::env::var(&var_name) {
                result.push_str(&val);
            }
        } else {
            result.push(ch);
        }
    }

    result
}
