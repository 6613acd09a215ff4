//! Hoisted `node_modules` layout planning.
//!
//! A plan maps tree paths to packages. A tree path is the list of install
//! names from the project root: `["a"]` is `node_modules/a`, `["a", "b"]` is
//! `node_modules/a/node_modules/b`. The same paths, joined with `/`, key the
//! `packages` table of the text lockfile.

use super::graph::{DependencyGraph, Edge, PackageKey, Resolution, ROOT_WORKSPACE};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// A path in the hoisted tree.
pub type TreePath = Vec<String>;

/// Where every package lands in a hoisted tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HoistPlan {
    slots: BTreeMap<TreePath, PackageKey>,
}

impl HoistPlan {
    /// Plan the layout of `keep` (usually [`DependencyGraph::reachable`]).
    ///
    /// Workspace members always sit at the top level. Every other package is
    /// placed at the shallowest slot that is free, is visible from the
    /// dependent, and does not shadow a lookup made by an already placed
    /// package. Traversal is breadth-first in key order, so the same graph
    /// always yields the same plan.
    #[must_use]
    pub fn plan(graph: &DependencyGraph, keep: &BTreeSet<PackageKey>, production: bool) -> Self {
        let mut planner = Planner {
            graph,
            keep,
            production,
            plan: Self::default(),
            needs: HashMap::new(),
            queue: VecDeque::new(),
        };
        planner.run();
        planner.plan
    }

    /// Build a plan from explicit slots (decoded lockfiles, tests).
    #[must_use]
    pub fn from_slots(slots: BTreeMap<TreePath, PackageKey>) -> Self {
        Self { slots }
    }

    /// Slots in path order: parents always precede their children.
    pub fn slots(&self) -> impl Iterator<Item = (&TreePath, &PackageKey)> {
        self.slots.iter()
    }

    #[must_use]
    pub fn get(&self, path: &[String]) -> Option<&PackageKey> {
        self.slots.get(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Resolve `name` the way node does, starting inside the package at `from`
    /// (`[]` for the project root).
    #[must_use]
    pub fn lookup(&self, from: &[String], name: &str) -> Option<(TreePath, &PackageKey)> {
        (0..=from.len()).rev().find_map(|depth| {
            let mut path = from[..depth].to_vec();
            path.push(name.to_string());
            self.slots.get(&path).map(|key| (path, key))
        })
    }
}

/// Join a tree path into a lockfile key: `a/node_modules/@s/b` is `a/@s/b`.
#[must_use]
pub fn join_path(path: &[String]) -> String {
    path.join("/")
}

/// Split a lockfile key into a tree path, keeping `@scope/name` together.
#[must_use]
pub fn split_path(key: &str) -> TreePath {
    let mut out = Vec::new();
    let mut parts = key.split('/').filter(|p| !p.is_empty());
    while let Some(part) = parts.next() {
        if part.starts_with('@') {
            match parts.next() {
                Some(rest) => out.push(format!("{part}/{rest}")),
                None => out.push(part.to_string()),
            }
        } else {
            out.push(part.to_string());
        }
    }
    out
}

/// Dependencies of a node: workspace members take theirs from the workspace table.
pub(crate) fn dependencies_of<'g>(
    graph: &'g DependencyGraph,
    key: &str,
) -> Option<&'g BTreeMap<String, Edge>> {
    let pkg = graph.packages.get(key)?;
    match &pkg.resolution {
        Resolution::Workspace { path } => graph.workspaces.get(path).map(|w| &w.dependencies),
        Resolution::Link { .. } => None,
        _ => Some(&pkg.dependencies),
    }
}

struct Planner<'g> {
    graph: &'g DependencyGraph,
    keep: &'g BTreeSet<PackageKey>,
    production: bool,
    plan: HoistPlan,
    /// name → placed nodes that depend on it, with the key they expect.
    needs: HashMap<String, Vec<(TreePath, PackageKey)>>,
    queue: VecDeque<TreePath>,
}

impl Planner<'_> {
    fn run(&mut self) {
        let graph = self.graph;

        // Workspace members are linked at the top level first.
        for (path, ws) in &graph.workspaces {
            if path == ROOT_WORKSPACE {
                continue;
            }
            let key = format!("{}@workspace:{path}", ws.name);
            if graph.packages.contains_key(&key) {
                let slot = vec![ws.name.clone()];
                if !self.plan.slots.contains_key(&slot) {
                    self.plan.slots.insert(slot.clone(), key);
                    self.queue.push_back(slot);
                }
            }
        }

        if let Some(root) = graph.workspaces.get(ROOT_WORKSPACE) {
            let edges = self.wanted_edges(&root.dependencies, true);
            self.place_all(&[], &edges);
        }

        while let Some(path) = self.queue.pop_front() {
            let Some(key) = self.plan.slots.get(&path).cloned() else {
                continue;
            };
            let is_workspace = graph
                .packages
                .get(&key)
                .is_some_and(|p| matches!(p.resolution, Resolution::Workspace { .. }));
            let Some(deps) = dependencies_of(graph, &key) else {
                continue;
            };
            let edges = self.wanted_edges(deps, is_workspace);
            self.place_all(&path, &edges);
        }
    }

    fn wanted_edges(
        &self,
        deps: &BTreeMap<String, Edge>,
        is_workspace: bool,
    ) -> Vec<(String, PackageKey)> {
        deps.iter()
            .filter(|(_, e)| !(self.production && is_workspace && !e.kind.is_production()))
            .filter_map(|(name, e)| {
                let target = e.target.as_ref()?;
                self.keep.contains(target).then(|| (name.clone(), target.clone()))
            })
            .collect()
    }

    fn place_all(&mut self, from: &[String], edges: &[(String, PackageKey)]) {
        for (name, key) in edges {
            self.needs
                .entry(name.clone())
                .or_default()
                .push((from.to_vec(), key.clone()));
        }
        for (name, key) in edges {
            self.place(from, name, key);
        }
    }

    fn place(&mut self, from: &[String], name: &str, key: &PackageKey) {
        let found = self.plan.lookup(from, name).map(|(p, k)| (p, k.clone()));
        let floor = match &found {
            Some((_, existing)) if existing == key => return,
            // Must go strictly below the conflicting slot's parent.
            Some((path, _)) => path.len(),
            None => 0,
        };

        // A package cannot be nested inside itself.
        if (1..=from.len()).any(|d| self.plan.slots.get(&from[..d]) == Some(key)) {
            tracing::debug!(package = %key, "skipping cyclic placement");
            return;
        }

        for depth in floor..=from.len() {
            let parent = &from[..depth];
            let mut slot = parent.to_vec();
            slot.push(name.to_string());
            if self.plan.slots.contains_key(&slot) || self.would_shadow(parent, name, key) {
                continue;
            }
            self.plan.slots.insert(slot.clone(), key.clone());
            self.queue.push_back(slot);
            return;
        }

        tracing::debug!(package = %key, from = %join_path(from), "no slot available");
    }

    /// Whether putting `key` at `parent/name` changes what an already placed
    /// package under `parent` resolves `name` to.
    fn would_shadow(&self, parent: &[String], name: &str, key: &PackageKey) -> bool {
        let Some(dependents) = self.needs.get(name) else {
            return false;
        };
        dependents.iter().any(|(path, expected)| {
            if expected == key || !path.starts_with(parent) {
                return false;
            }
            match self.plan.lookup(path, name) {
                Some((found, _)) => found.len() <= parent.len(),
                None => false,
            }
        })
    }
}
