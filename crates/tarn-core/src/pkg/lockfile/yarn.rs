//! yarn v1 `yarn.lock` writer, for tools that only read yarn lockfiles.

use crate::pkg::graph::{DependencyGraph, EdgeKind, PackageKey, Resolution};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

const HEADER: &str = "# THIS IS AN AUTOGENERATED FILE. DO NOT EDIT THIS FILE DIRECTLY.\n# yarn lockfile v1\n";

/// Render `graph` as a yarn v1 lockfile.
///
/// Each package is written once, keyed by every `name@spec` that resolved to
/// it. Workspace, folder and link packages are omitted.
#[must_use]
pub fn encode(graph: &DependencyGraph) -> String {
    let mut requests: BTreeMap<&PackageKey, BTreeSet<String>> = BTreeMap::new();
    let all_edges = graph
        .workspaces
        .values()
        .map(|w| &w.dependencies)
        .chain(graph.packages.values().map(|p| &p.dependencies));
    for deps in all_edges {
        for (name, edge) in deps {
            if let Some(target) = &edge.target {
                requests
                    .entry(target)
                    .or_default()
                    .insert(format!("{name}@{}", edge.spec));
            }
        }
    }

    let mut entries: Vec<(String, String)> = Vec::new();
    for (key, specs) in requests {
        let Some(pkg) = graph.packages.get(key) else {
            continue;
        };
        let resolved = match &pkg.resolution {
            Resolution::Registry { tarball } | Resolution::Tarball { url: tarball } => {
                tarball.clone()
            }
            Resolution::Github {
                owner,
                repo,
                committish,
            } => format!("https://codeload.github.com/{owner}/{repo}/tar.gz/{committish}"),
            Resolution::Git { url, commit } => format!("{url}#{commit}"),
            Resolution::LocalTarball { path } => format!("file:{path}"),
            Resolution::Folder { .. } | Resolution::Link { .. } | Resolution::Workspace { .. } => {
                continue;
            }
        };

        let header = specs
            .iter()
            .map(|s| maybe_quote(s))
            .collect::<Vec<_>>()
            .join(", ");

        let mut body = String::new();
        let _ = writeln!(body, "{header}:");
        let _ = writeln!(body, "  version {}", quote(&pkg.version));
        let _ = writeln!(body, "  resolved {}", quote(&resolved));
        if let Some(integrity) = &pkg.integrity {
            let _ = writeln!(body, "  integrity {integrity}");
        }
        for (title, optional) in [("dependencies", false), ("optionalDependencies", true)] {
            let deps: Vec<_> = pkg
                .dependencies
                .iter()
                .filter(|(_, e)| {
                    (e.kind == EdgeKind::Optional) == optional && e.kind != EdgeKind::Peer
                })
                .collect();
            if deps.is_empty() {
                continue;
            }
            let _ = writeln!(body, "  {title}:");
            for (name, edge) in deps {
                let _ = writeln!(body, "    {} {}", maybe_quote(name), quote(&edge.spec));
            }
        }
        entries.push((header, body));
    }
    entries.sort();

    let mut out = String::from(HEADER);
    for (_, body) in entries {
        out.push_str("\n\n");
        out.push_str(body.trim_end());
    }
    out.push('\n');
    out
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// yarn quotes keys that would not parse as bare words.
fn maybe_quote(s: &str) -> String {
    let needs_quotes = s.starts_with("true")
        || s.starts_with("false")
        || !s.starts_with(|c: char| c.is_ascii_alphabetic())
        || s.contains(|c: char| {
            matches!(c, ':' | ' ' | '\t' | '\n' | '\\' | '"' | ',' | '[' | ']')
        });
    if needs_quotes {
        quote(s)
    } else {
        s.to_string()
    }
}
