//! `bun.lock`: the human-diffable text lockfile.
//!
//! ```text
//! {
//!   "lockfileVersion": 1,
//!   "configVersion": 1,
//!   "workspaces": {
//!     "": { "name": "app", "dependencies": { "a": "^1.0.0", }, },
//!   },
//!   "packages": {
//!     "a": ["a@1.0.0", "<tarball>", { "dependencies": { "b": "^2" } }, "sha512-..."],
//!     "a/b": ["b@2.0.0", "<tarball>", {}, "sha512-..."],
//!   }
//! }
//! ```
//!
//! Package keys are hoisted tree paths, so edges are not stored: they are
//! recovered on decode by resolving each dependency name from its package's
//! position, the way node would.

use crate::pkg::error::PkgError;
use crate::pkg::graph::{
    DependencyGraph, Edge, EdgeKind, PackageKey, Resolution, ResolvedPackage, WorkspaceEntry,
    ROOT_WORKSPACE,
};
use crate::pkg::hoist::{join_path, split_path, HoistPlan, TreePath};
use crate::pkg::platform::Platform;
use crate::pkg::spec::{is_tarball_path, Specifier};
use crate::pkg::version::{version_satisfies, VersionRange};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub const LOCKFILE_VERSION: u64 = 1;
pub const CONFIG_VERSION: u64 = 1;

const SECTIONS: [(&str, EdgeKind); 4] = [
    ("dependencies", EdgeKind::Prod),
    ("devDependencies", EdgeKind::Dev),
    ("optionalDependencies", EdgeKind::Optional),
    ("peerDependencies", EdgeKind::Peer),
];

/// Render `graph` as a text lockfile.
#[must_use]
pub fn encode(graph: &DependencyGraph) -> String {
    let keep = graph.reachable(&Platform::any(), false);
    let plan = HoistPlan::plan(graph, &keep, false);

    let mut out = String::new();
    out.push_str("{\n");
    let _ = writeln!(out, "  \"lockfileVersion\": {LOCKFILE_VERSION},");
    let _ = writeln!(out, "  \"configVersion\": {CONFIG_VERSION},");

    out.push_str("  \"workspaces\": {\n");
    for (path, ws) in &graph.workspaces {
        let _ = writeln!(out, "    {}: {{", quote(path));
        let _ = writeln!(out, "      \"name\": {},", quote(&ws.name));
        if let Some(version) = &ws.version {
            let _ = writeln!(out, "      \"version\": {},", quote(version));
        }
        for (section, deps) in group_by_section(&ws.dependencies) {
            let _ = writeln!(out, "      {}: {{", quote(section));
            for (name, spec) in deps {
                let _ = writeln!(out, "        {}: {},", quote(name), quote(spec));
            }
            out.push_str("      },\n");
        }
        out.push_str("    },\n");
    }
    out.push_str("  },\n");

    out.push_str("  \"packages\": {\n");
    let mut first = true;
    for (path, key) in plan.slots() {
        let Some(pkg) = graph.packages.get(key) else {
            continue;
        };
        if !first && path.len() == 1 {
            out.push('\n');
        }
        first = false;
        let _ = writeln!(out, "    {}: {},", quote(&join_path(path)), package_entry(pkg));
    }
    out.push_str("  }\n}\n");
    out
}

fn package_entry(pkg: &ResolvedPackage) -> String {
    let identity = quote(&pkg.identity());
    let integrity = quote(pkg.integrity.as_deref().unwrap_or(""));
    let meta = package_meta(pkg);
    match &pkg.resolution {
        Resolution::Registry { tarball } => {
            format!("[{identity}, {}, {meta}, {integrity}]", quote(tarball))
        }
        Resolution::Tarball { .. }
        | Resolution::LocalTarball { .. }
        | Resolution::Github { .. } => {
            format!("[{identity}, {meta}, {integrity}]")
        }
        Resolution::Git { .. } | Resolution::Folder { .. } | Resolution::Link { .. } => {
            format!("[{identity}, {meta}]")
        }
        Resolution::Workspace { .. } if meta == "{}" => format!("[{identity}]"),
        Resolution::Workspace { .. } => format!("[{identity}, {meta}]"),
    }
}

fn package_meta(pkg: &ResolvedPackage) -> String {
    let mut fields = Vec::new();
    if !matches!(
        pkg.resolution,
        Resolution::Registry { .. } | Resolution::Workspace { .. }
    ) {
        fields.push(format!("\"version\": {}", quote(&pkg.version)));
    }
    for (section, deps) in group_by_section(&pkg.dependencies) {
        fields.push(format!("{}: {}", quote(section), inline_map(deps)));
    }
    if !pkg.bin.is_empty() {
        let bin = pkg.bin.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        fields.push(format!("\"bin\": {}", inline_map(bin)));
    }
    for (field, values) in [("os", &pkg.os), ("cpu", &pkg.cpu)] {
        if !values.is_empty() {
            let list: Vec<String> = values.iter().map(|v| quote(v)).collect();
            fields.push(format!("{}: [{}]", quote(field), list.join(", ")));
        }
    }
    if fields.is_empty() {
        "{}".to_string()
    } else {
        format!("{{ {} }}", fields.join(", "))
    }
}

fn group_by_section(deps: &BTreeMap<String, Edge>) -> Vec<(&'static str, BTreeMap<&str, &str>)> {
    let mut grouped: BTreeMap<&'static str, BTreeMap<&str, &str>> = BTreeMap::new();
    for (name, edge) in deps {
        grouped
            .entry(edge.kind.section())
            .or_default()
            .insert(name.as_str(), edge.spec.as_str());
    }
    SECTIONS
        .iter()
        .filter_map(|(section, _)| grouped.remove(section).map(|deps| (*section, deps)))
        .collect()
}

fn inline_map(map: BTreeMap<&str, &str>) -> String {
    let entries: Vec<String> = map
        .into_iter()
        .map(|(k, v)| format!("{}: {}", quote(k), quote(v)))
        .collect();
    format!("{{ {} }}", entries.join(", "))
}

fn quote(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Parse a text lockfile.
///
/// # Errors
/// Returns `LOCKFILE_INVALID` for malformed JSON, an unsupported version, or
/// entries that cannot be interpreted.
pub fn decode(text: &str) -> Result<DependencyGraph, PkgError> {
    let cleaned = strip_jsonc(text);
    let root: Value = serde_json::from_str(&cleaned)
        .map_err(|e| PkgError::lockfile_invalid(format!("bun.lock is not valid JSON: {e}")))?;

    let version = root.get("lockfileVersion").and_then(Value::as_u64);
    if !matches!(version, Some(v) if v <= LOCKFILE_VERSION) {
        return Err(PkgError::lockfile_invalid(format!(
            "unsupported lockfileVersion {}",
            root.get("lockfileVersion").unwrap_or(&Value::Null)
        )));
    }

    let mut graph = DependencyGraph::default();
    let empty = Map::new();

    let workspaces = root.get("workspaces").and_then(Value::as_object).unwrap_or(&empty);
    for (path, value) in workspaces {
        let entry = WorkspaceEntry {
            name: str_field(value, "name").unwrap_or_default(),
            version: str_field(value, "version"),
            dependencies: read_sections(value),
        };
        graph.workspaces.insert(path.clone(), entry);
    }
    graph.workspaces.entry(ROOT_WORKSPACE.to_string()).or_default();

    let mut slots: BTreeMap<TreePath, PackageKey> = BTreeMap::new();
    let packages = root.get("packages").and_then(Value::as_object).unwrap_or(&empty);
    for (key, value) in packages {
        let path = split_path(key);
        let Some(install_name) = path.last() else {
            return Err(PkgError::lockfile_invalid("empty package key"));
        };
        let pkg = read_package(install_name, value, &graph.workspaces)
            .map_err(|msg| PkgError::lockfile_invalid(format!("package \"{key}\": {msg}")))?;
        let pkg_key = pkg.key();
        slots.insert(path, pkg_key.clone());
        graph.packages.entry(pkg_key).or_insert(pkg);
    }

    let plan = HoistPlan::from_slots(slots);
    link_edges(&mut graph, &plan);
    Ok(graph)
}

fn read_sections(value: &Value) -> BTreeMap<String, Edge> {
    let mut deps = BTreeMap::new();
    // Lowest precedence first: a name listed twice keeps its strongest section.
    for section in ["peerDependencies", "devDependencies", "dependencies", "optionalDependencies"] {
        let Some(map) = value.get(section).and_then(Value::as_object) else {
            continue;
        };
        let kind = SECTIONS
            .iter()
            .find_map(|(s, k)| (*s == section).then_some(*k))
            .unwrap_or(EdgeKind::Prod);
        for (name, spec) in map {
            if let Some(spec) = spec.as_str() {
                deps.insert(
                    name.clone(),
                    Edge {
                        spec: spec.to_string(),
                        kind,
                        target: None,
                    },
                );
            }
        }
    }
    deps
}

fn read_package(
    install_name: &str,
    value: &Value,
    workspaces: &BTreeMap<String, WorkspaceEntry>,
) -> Result<ResolvedPackage, String> {
    let items = value.as_array().ok_or("expected an array")?;
    let identity = items
        .first()
        .and_then(Value::as_str)
        .ok_or("missing identity")?;
    let (real_name, fragment) = split_identity(identity).ok_or("malformed identity")?;

    let (resolution, version, meta, integrity) = if let Some(path) =
        fragment.strip_prefix("workspace:")
    {
        let version = workspaces
            .get(path)
            .and_then(|w| w.version.clone())
            .unwrap_or_default();
        (
            Resolution::Workspace {
                path: path.to_string(),
            },
            version,
            items.get(1),
            None,
        )
    } else if let Some(name) = fragment.strip_prefix("link:") {
        (
            Resolution::Link {
                name: name.to_string(),
            },
            meta_version(items.get(1)),
            items.get(1),
            None,
        )
    } else if let Some(path) = fragment.strip_prefix("file:") {
        let resolution = if is_tarball_path(path) {
            Resolution::LocalTarball {
                path: path.to_string(),
            }
        } else {
            Resolution::Folder {
                path: path.to_string(),
            }
        };
        let integrity = matches!(resolution, Resolution::LocalTarball { .. })
            .then(|| items.get(2))
            .flatten();
        (resolution, meta_version(items.get(1)), items.get(1), integrity)
    } else if let Some(rest) = fragment.strip_prefix("git+") {
        let (url, commit) = rest.rsplit_once('#').ok_or("git entry without commit")?;
        (
            Resolution::Git {
                url: url.to_string(),
                commit: commit.to_string(),
            },
            meta_version(items.get(1)),
            items.get(1),
            None,
        )
    } else if let Some(rest) = fragment.strip_prefix("github:") {
        let (repo_path, committish) = rest.rsplit_once('#').ok_or("github entry without ref")?;
        let (owner, repo) = repo_path.split_once('/').ok_or("github entry without repo")?;
        (
            Resolution::Github {
                owner: owner.to_string(),
                repo: repo.to_string(),
                committish: committish.to_string(),
            },
            meta_version(items.get(1)),
            items.get(1),
            items.get(2),
        )
    } else if fragment.starts_with("http://") || fragment.starts_with("https://") {
        (
            Resolution::Tarball {
                url: fragment.to_string(),
            },
            meta_version(items.get(1)),
            items.get(1),
            items.get(2),
        )
    } else {
        let tarball = items.get(1).and_then(Value::as_str).unwrap_or_default();
        (
            Resolution::Registry {
                tarball: tarball.to_string(),
            },
            fragment.to_string(),
            items.get(2),
            items.get(3),
        )
    };

    let meta = meta.unwrap_or(&Value::Null);
    let integrity = integrity
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(String::from);

    Ok(ResolvedPackage {
        name: install_name.to_string(),
        real_name: real_name.to_string(),
        version,
        resolution,
        integrity,
        bin: meta
            .get("bin")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default(),
        os: string_list(meta.get("os")),
        cpu: string_list(meta.get("cpu")),
        dependencies: read_sections(meta),
    })
}

/// `@scope/name@1.0.0` → (`@scope/name`, `1.0.0`).
fn split_identity(identity: &str) -> Option<(&str, &str)> {
    let search_from = usize::from(identity.starts_with('@'));
    let at = identity[search_from..].find('@')? + search_from;
    Some((&identity[..at], &identity[at + 1..]))
}

fn meta_version(meta: Option<&Value>) -> String {
    meta.and_then(|m| str_field(m, "version")).unwrap_or_default()
}

fn str_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(String::from)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

/// Fill in edge targets by resolving names from each node's position.
fn link_edges(graph: &mut DependencyGraph, plan: &HoistPlan) {
    let mut resolved: Vec<(Option<String>, PackageKey, String, PackageKey)> = Vec::new();

    let workspace_slots: BTreeMap<String, TreePath> = plan
        .slots()
        .filter_map(|(path, key)| match &graph.packages.get(key)?.resolution {
            Resolution::Workspace { path: ws } => Some((ws.clone(), path.clone())),
            _ => None,
        })
        .collect();

    for (ws_path, ws) in &graph.workspaces {
        let from = if ws_path == ROOT_WORKSPACE {
            Vec::new()
        } else {
            match workspace_slots.get(ws_path) {
                Some(slot) => slot.clone(),
                None => continue,
            }
        };
        for (name, edge) in &ws.dependencies {
            if let Some(target) = find_target(graph, plan, &from, name, edge) {
                resolved.push((Some(ws_path.clone()), String::new(), name.clone(), target));
            }
        }
    }

    for (path, key) in plan.slots() {
        let Some(pkg) = graph.packages.get(key) else {
            continue;
        };
        if pkg.dependencies.values().all(|e| e.target.is_some()) {
            continue;
        }
        for (name, edge) in &pkg.dependencies {
            if let Some(target) = find_target(graph, plan, path, name, edge) {
                resolved.push((None, key.clone(), name.clone(), target));
            }
        }
    }

    for (workspace, key, name, target) in resolved {
        let is_workspace_target = graph
            .packages
            .get(&target)
            .is_some_and(|p| matches!(p.resolution, Resolution::Workspace { .. }));
        let edges = match &workspace {
            Some(ws) => graph.workspaces.get_mut(ws).map(|w| &mut w.dependencies),
            None => graph.packages.get_mut(&key).map(|p| &mut p.dependencies),
        };
        if let Some(edge) = edges.and_then(|deps| deps.get_mut(&name)) {
            if edge.target.is_none() {
                if workspace.is_some() && edge.kind == EdgeKind::Prod && is_workspace_target {
                    edge.kind = EdgeKind::Workspace;
                }
                edge.target = Some(target);
            }
        }
    }
}

fn find_target(
    graph: &DependencyGraph,
    plan: &HoistPlan,
    from: &[String],
    name: &str,
    edge: &Edge,
) -> Option<PackageKey> {
    let (_, key) = plan.lookup(from, name)?;
    let pkg = graph.packages.get(key)?;
    accepts(&edge.spec, pkg).then(|| key.clone())
}

/// Whether a package found by lookup plausibly satisfies `spec`.
fn accepts(spec: &str, pkg: &ResolvedPackage) -> bool {
    let range_ok = |range: &str| {
        VersionRange::parse(range).is_ok_and(|r| r.is_any())
            || version_satisfies(&pkg.version, range)
    };
    match Specifier::parse(spec) {
        Ok(Specifier::SemverRange(range)) => range_ok(&range),
        Ok(Specifier::NpmAlias { name, spec }) => {
            name == pkg.real_name
                && match *spec {
                    Specifier::SemverRange(range) => range_ok(&range),
                    _ => true,
                }
        }
        Ok(Specifier::Workspace(_)) => matches!(pkg.resolution, Resolution::Workspace { .. }),
        Ok(_) => true,
        Err(_) => false,
    }
}

/// Remove `//` and `/* */` comments and trailing commas outside of strings.
#[must_use]
pub fn strip_jsonc(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            ']' | '}' => {
                let trimmed = out.trim_end_matches(char::is_whitespace).len();
                if out[..trimmed].ends_with(',') {
                    out.truncate(trimmed - 1);
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    out
}
