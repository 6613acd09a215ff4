//! `package.json` model and editing.

use super::error::PkgError;
use super::graph::EdgeKind;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// A package manifest: a project's `package.json` or one version entry of a packument.
///
/// Fields with an unexpected shape are ignored rather than rejected; registries
/// serve plenty of hand-edited metadata.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, deserialize_with = "lenient_string_map")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "lenient_string_map")]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "lenient_string_map")]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "lenient_string_map")]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "lenient_peer_meta")]
    pub peer_dependencies_meta: BTreeMap<String, PeerMeta>,
    #[serde(default)]
    pub bin: Option<Value>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub os: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub cpu: Vec<String>,
    #[serde(default)]
    pub workspaces: Option<Value>,
    #[serde(default)]
    pub dist: Option<Dist>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeerMeta {
    #[serde(default)]
    pub optional: bool,
}

/// `dist` block of a registry version entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Dist {
    #[serde(default)]
    pub tarball: String,
    pub integrity: Option<String>,
    pub shasum: Option<String>,
}

/// A dependency declared in a manifest, after section precedence is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredDependency {
    pub name: String,
    pub spec: String,
    pub kind: EdgeKind,
}

impl PackageManifest {
    /// Read a `package.json` from disk.
    ///
    /// # Errors
    /// `PACKAGE_JSON_NOT_FOUND` if missing, `PACKAGE_JSON_INVALID` if unparseable.
    pub fn read(path: &Path) -> Result<Self, PkgError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PkgError::package_json_not_found(path));
            }
            Err(e) => {
                return Err(PkgError::package_json_invalid(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        Self::from_slice(&bytes).map_err(|e| {
            PkgError::package_json_invalid(format!("{}: {}", path.display(), e.message()))
        })
    }

    /// Parse manifest JSON.
    ///
    /// # Errors
    /// `PACKAGE_JSON_INVALID` if the bytes are not a JSON object.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PkgError> {
        serde_json::from_slice(bytes)
            .map_err(|e| PkgError::package_json_invalid(format!("invalid JSON: {e}")))
    }

    /// Dependencies to resolve for this manifest.
    ///
    /// A name declared in several sections keeps one entry:
    /// optionalDependencies > dependencies > devDependencies > peerDependencies.
    /// Optional peers are skipped.
    #[must_use]
    pub fn declared_dependencies(&self, include_dev: bool) -> Vec<DeclaredDependency> {
        let mut merged: BTreeMap<&str, (&str, EdgeKind)> = BTreeMap::new();

        for (name, spec) in &self.peer_dependencies {
            let optional = self
                .peer_dependencies_meta
                .get(name)
                .is_some_and(|m| m.optional);
            if !optional {
                merged.insert(name.as_str(), (spec.as_str(), EdgeKind::Peer));
            }
        }
        if include_dev {
            for (name, spec) in &self.dev_dependencies {
                merged.insert(name.as_str(), (spec.as_str(), EdgeKind::Dev));
            }
        }
        for (name, spec) in &self.dependencies {
            merged.insert(name.as_str(), (spec.as_str(), EdgeKind::Prod));
        }
        for (name, spec) in &self.optional_dependencies {
            merged.insert(name.as_str(), (spec.as_str(), EdgeKind::Optional));
        }

        merged
            .into_iter()
            .map(|(name, (spec, kind))| DeclaredDependency {
                name: name.to_string(),
                spec: spec.to_string(),
                kind,
            })
            .collect()
    }

    /// Whether the manifest declares anything to install.
    #[must_use]
    pub fn has_dependencies(&self) -> bool {
        !(self.dependencies.is_empty()
            && self.dev_dependencies.is_empty()
            && self.optional_dependencies.is_empty()
            && self.peer_dependencies.is_empty())
    }

    /// `bin` entries, with the string form keyed by the unscoped package name.
    #[must_use]
    pub fn bin_entries(&self) -> BTreeMap<String, String> {
        match &self.bin {
            Some(Value::String(path)) if !self.name.is_empty() => {
                let bin_name = self.name.rsplit('/').next().unwrap_or(&self.name);
                BTreeMap::from([(bin_name.to_string(), path.clone())])
            }
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|p| (k.clone(), p.to_string())))
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    /// `workspaces` globs (array form or `{ "packages": [...] }`).
    #[must_use]
    pub fn workspace_patterns(&self) -> Vec<String> {
        let list = match &self.workspaces {
            Some(Value::Array(arr)) => arr,
            Some(Value::Object(obj)) => match obj.get("packages") {
                Some(Value::Array(arr)) => arr,
                _ => return Vec::new(),
            },
            _ => return Vec::new(),
        };
        list.iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect()
    }
}

pub(crate) fn lenient_string_map<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Object(map)) => map
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect(),
        _ => BTreeMap::new(),
    })
}

fn lenient_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => vec![s],
        Some(Value::Array(arr)) => arr
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_peer_meta<'de, D>(deserializer: D) -> Result<BTreeMap<String, PeerMeta>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Object(map)) => map
            .into_iter()
            .filter_map(|(k, v)| serde_json::from_value(v).ok().map(|m| (k, m)))
            .collect(),
        _ => BTreeMap::new(),
    })
}

/// Dependency sections of `package.json` that `add` writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencySection {
    Dependencies,
    DevDependencies,
    OptionalDependencies,
    PeerDependencies,
}

impl DependencySection {
    pub const ALL: [Self; 4] = [
        Self::Dependencies,
        Self::DevDependencies,
        Self::OptionalDependencies,
        Self::PeerDependencies,
    ];

    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Dependencies => "dependencies",
            Self::DevDependencies => "devDependencies",
            Self::OptionalDependencies => "optionalDependencies",
            Self::PeerDependencies => "peerDependencies",
        }
    }
}

fn read_json_object(path: &Path) -> Result<serde_json::Map<String, Value>, PkgError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PkgError::package_json_not_found(path));
        }
        Err(e) => return Err(PkgError::package_json_invalid(format!("failed to read: {e}"))),
    };
    match serde_json::from_str(&content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(PkgError::package_json_invalid(
            "package.json must be a JSON object",
        )),
        Err(e) => Err(PkgError::package_json_invalid(format!("invalid JSON: {e}"))),
    }
}

fn write_json_object(path: &Path, root: serde_json::Map<String, Value>) -> Result<(), PkgError> {
    let mut out = serde_json::to_string_pretty(&Value::Object(root))?;
    out.push('\n');
    tarn_util::fs::atomic_write(path, out.as_bytes())?;
    Ok(())
}

/// Insert or update `name` in `section` of the `package.json` at `path`.
///
/// The name is removed from the other install sections so it is declared once.
/// Existing key order is kept; new entries are appended.
///
/// # Errors
/// Returns an error if the file cannot be read, parsed, or written.
pub fn add_dependency(
    path: &Path,
    section: DependencySection,
    name: &str,
    spec: &str,
) -> Result<(), PkgError> {
    let mut root = read_json_object(path)?;

    for other in DependencySection::ALL {
        if other != section && other != DependencySection::PeerDependencies {
            remove_from_section(&mut root, other.key(), name);
        }
    }

    let entry = root
        .entry(section.key())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(deps) = entry {
        deps.insert(name.to_string(), Value::String(spec.to_string()));
    }

    write_json_object(path, root)
}

/// Remove `name` from every dependency section.
///
/// Returns whether anything was removed. Sections left empty are deleted.
///
/// # Errors
/// Returns an error if the file cannot be read, parsed, or written.
pub fn remove_dependency(path: &Path, name: &str) -> Result<bool, PkgError> {
    let mut root = read_json_object(path)?;

    let mut removed = false;
    for section in DependencySection::ALL {
        removed |= remove_from_section(&mut root, section.key(), name);
    }

    if removed {
        write_json_object(path, root)?;
    }
    Ok(removed)
}

fn remove_from_section(
    root: &mut serde_json::Map<String, Value>,
    section: &str,
    name: &str,
) -> bool {
    let Some(Value::Object(deps)) = root.get_mut(section) else {
        return false;
    };
    let removed = deps.shift_remove(name).is_some();
    if removed && deps.is_empty() {
        root.shift_remove(section);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_package_json(dir: &Path, content: &str) -> std::path::PathBuf {
        let path = dir.join("package.json");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_precedence_optional_over_prod_over_dev_over_peer() {
        let manifest = PackageManifest::from_slice(
            br#"{
                "name": "root",
                "dependencies": { "baz": "0.0.3", "a": "1" },
                "optionalDependencies": { "baz": "0.0.5" },
                "devDependencies": { "a": "2", "b": "3" },
                "peerDependencies": { "b": "4", "c": "5" }
            }"#,
        )
        .unwrap();

        let deps = manifest.declared_dependencies(true);
        let find = |n: &str| deps.iter().find(|d| d.name == n).unwrap();

        assert_eq!(deps.len(), 4);
        assert_eq!((find("baz").spec.as_str(), find("baz").kind), ("0.0.5", EdgeKind::Optional));
        assert_eq!((find("a").spec.as_str(), find("a").kind), ("1", EdgeKind::Prod));
        assert_eq!((find("b").spec.as_str(), find("b").kind), ("3", EdgeKind::Dev));
        assert_eq!((find("c").spec.as_str(), find("c").kind), ("5", EdgeKind::Peer));
    }

    #[test]
    fn test_dev_excluded_when_requested() {
        let manifest =
            PackageManifest::from_slice(br#"{"devDependencies": {"b": "1"}, "peerDependencies": {"b": "2"}}"#)
                .unwrap();
        let deps = manifest.declared_dependencies(false);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].kind, EdgeKind::Peer);
    }

    #[test]
    fn test_optional_peers_skipped() {
        let manifest = PackageManifest::from_slice(
            br#"{
                "peerDependencies": { "react": "^18", "vue": "^3" },
                "peerDependenciesMeta": { "vue": { "optional": true } }
            }"#,
        )
        .unwrap();
        let deps = manifest.declared_dependencies(false);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "react");
    }

    #[test]
    fn test_lenient_fields() {
        let manifest = PackageManifest::from_slice(
            br#"{
                "name": "x",
                "dependencies": { "good": "^1", "bad": 123 },
                "os": "linux",
                "cpu": ["x64", 7],
                "bin": "./cli.js"
            }"#,
        )
        .unwrap();
        assert_eq!(manifest.dependencies.len(), 1);
        assert_eq!(manifest.os, vec!["linux"]);
        assert_eq!(manifest.cpu, vec!["x64"]);
        assert_eq!(manifest.bin_entries().get("x").map(String::as_str), Some("./cli.js"));
    }

    #[test]
    fn test_scoped_bin_string() {
        let manifest =
            PackageManifest::from_slice(br#"{"name": "@scope/tool", "bin": "bin/tool.js"}"#).unwrap();
        assert!(manifest.bin_entries().contains_key("tool"));
    }

    #[test]
    fn test_workspace_patterns() {
        let arr = PackageManifest::from_slice(br#"{"workspaces": ["packages/*"]}"#).unwrap();
        assert_eq!(arr.workspace_patterns(), vec!["packages/*"]);

        let obj =
            PackageManifest::from_slice(br#"{"workspaces": {"packages": ["apps/*"]}}"#).unwrap();
        assert_eq!(obj.workspace_patterns(), vec!["apps/*"]);
    }

    #[test]
    fn test_read_missing_and_invalid() {
        let dir = tempdir().unwrap();
        let err = PackageManifest::read(&dir.path().join("package.json")).unwrap_err();
        assert_eq!(err.code(), super::super::error::codes::PACKAGE_JSON_NOT_FOUND);

        let path = write_package_json(dir.path(), "not json {{{");
        let err = PackageManifest::read(&path).unwrap_err();
        assert_eq!(err.code(), super::super::error::codes::PACKAGE_JSON_INVALID);
    }

    #[test]
    fn test_add_dependency_preserves_order() {
        let dir = tempdir().unwrap();
        let path = write_package_json(
            dir.path(),
            r#"{"name": "app", "version": "1.0.0", "dependencies": {"z": "1", "a": "2"}}"#,
        );

        add_dependency(&path, DependencySection::Dependencies, "m", "^3.0.0").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let value: Value = serde_json::from_str(&content).unwrap();
        let keys: Vec<&String> = value["dependencies"].as_object().unwrap().keys().collect();
        assert_eq!(keys, ["z", "a", "m"]);
        let top: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(top, ["name", "version", "dependencies"]);
        assert!(content.ends_with("}\n"));
    }

    #[test]
    fn test_add_dev_moves_from_dependencies() {
        let dir = tempdir().unwrap();
        let path = write_package_json(dir.path(), r#"{"dependencies": {"a": "1"}}"#);

        add_dependency(&path, DependencySection::DevDependencies, "a", "^1").unwrap();

        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(value.get("dependencies").is_none());
        assert_eq!(value["devDependencies"]["a"], "^1");
    }

    #[test]
    fn test_remove_last_dependency_drops_section() {
        let dir = tempdir().unwrap();
        let path = write_package_json(
            dir.path(),
            r#"{"name": "app", "dependencies": {"a": "1"}, "devDependencies": {"b": "1"}}"#,
        );

        assert!(remove_dependency(&path, "a").unwrap());
        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(value.get("dependencies").is_none());
        assert_eq!(value["devDependencies"]["b"], "1");

        assert!(!remove_dependency(&path, "missing").unwrap());
    }
}
