//! TG-011: Dependency graph — ordering, levels, closures, subgraphs.
//!
//! Built once through `GraphBuilder`, then immutable. Nodes are module IDs;
//! `dependencies[a]` holds what `a` needs, `dependents[a]` what needs `a`.
//! Parallel `Dependency` records collapse into one adjacency edge but are all
//! kept for diagnostics. Every ordering tie is broken by ascending ID.

use super::discovery::normalize_path;
use super::error::{ExtractionError, GraphError};
use super::types::{Dependency, GraphStats};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::debug;

type Adjacency = FxHashMap<String, BTreeSet<String>>;

// ============================================================================
// Builder
// ============================================================================

/// Collects nodes and edges, then freezes them into a `DependencyGraph`.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    nodes: BTreeSet<String>,
    edges: Vec<Dependency>,
    libraries: FxHashMap<String, Vec<PathBuf>>,
    errors: Vec<ExtractionError>,
}

impl GraphBuilder {
    /// Start from the full node set. Edges may only connect these IDs.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            nodes: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn dependency(mut self, dependency: Dependency) -> Self {
        self.edges.push(dependency);
        self
    }

    pub fn dependencies(mut self, dependencies: impl IntoIterator<Item = Dependency>) -> Self {
        self.edges.extend(dependencies);
        self
    }

    /// Library inclusion targets per module, for library-aware change impact.
    pub fn libraries(mut self, libraries: impl IntoIterator<Item = (String, Vec<PathBuf>)>) -> Self {
        for (id, paths) in libraries {
            self.libraries.entry(id).or_default().extend(paths);
        }
        self
    }

    /// Extraction warnings to carry along for reporting.
    pub fn errors(mut self, errors: impl IntoIterator<Item = ExtractionError>) -> Self {
        self.errors.extend(errors);
        self
    }

    pub fn build(self) -> DependencyGraph {
        let mut graph = DependencyGraph {
            nodes: self.nodes.iter().cloned().collect(),
            errors: self.errors,
            ..DependencyGraph::default()
        };
        for id in &self.nodes {
            graph.dependencies.insert(id.clone(), BTreeSet::new());
            graph.dependents.insert(id.clone(), BTreeSet::new());
        }

        for edge in self.edges {
            let unknown = [&edge.to, &edge.from]
                .into_iter()
                .find(|id| !self.nodes.contains(id.as_str()));
            if let Some(unknown) = unknown {
                debug!(from = %edge.from, to = %edge.to, "edge to unknown module dropped");
                graph.errors.push(ExtractionError::UnknownNode {
                    module: edge.from.clone(),
                    target: unknown.clone(),
                });
                continue;
            }
            if let Some(deps) = graph.dependencies.get_mut(&edge.from) {
                deps.insert(edge.to.clone());
            }
            if let Some(dependents) = graph.dependents.get_mut(&edge.to) {
                dependents.insert(edge.from.clone());
            }
            graph.edges.push(edge);
        }

        for (id, paths) in self.libraries {
            if self.nodes.contains(&id) {
                let mut paths: Vec<PathBuf> = paths.iter().map(|p| normalize_path(p)).collect();
                paths.sort();
                paths.dedup();
                graph.libraries.insert(id, paths);
            }
        }

        graph
    }
}

// ============================================================================
// Graph
// ============================================================================

/// Immutable module dependency graph.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    dependencies: Adjacency,
    dependents: Adjacency,
    edges: Vec<Dependency>,
    libraries: FxHashMap<String, Vec<PathBuf>>,
    errors: Vec<ExtractionError>,
}

impl DependencyGraph {
    /// All node IDs, sorted.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn contains(&self, id: &str) -> bool {
        self.dependencies.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of distinct (from, to) pairs.
    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(BTreeSet::len).sum()
    }

    /// Every dependency record that made it into the graph.
    pub fn edges(&self) -> &[Dependency] {
        &self.edges
    }

    /// Extraction and construction warnings.
    pub fn errors(&self) -> &[ExtractionError] {
        &self.errors
    }

    /// Library inclusion targets of a module.
    pub fn library_sources(&self, id: &str) -> &[PathBuf] {
        self.libraries.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Direct dependencies, sorted. Empty for unknown IDs.
    pub fn dependencies(&self, id: &str) -> Vec<String> {
        neighbours(&self.dependencies, id)
    }

    /// Direct dependents, sorted. Empty for unknown IDs.
    pub fn dependents(&self, id: &str) -> Vec<String> {
        neighbours(&self.dependents, id)
    }

    /// Everything `id` transitively depends on, excluding `id`.
    pub fn all_dependencies(&self, id: &str) -> BTreeSet<String> {
        reachable(&self.dependencies, id)
    }

    /// Everything that transitively depends on `id`, excluding `id`.
    pub fn all_dependents(&self, id: &str) -> BTreeSet<String> {
        reachable(&self.dependents, id)
    }

    // ------------------------------------------------------------------------
    // Cycles and ordering
    // ------------------------------------------------------------------------

    /// Cycles closed by back edges of a depth-first walk.
    ///
    /// Every strongly connected component with a cycle yields at least one
    /// entry, but this is not every elementary cycle: a cycle re-entering a
    /// node the walk already finished is not listed on its own. Each cycle is
    /// rotated to start at its smallest ID; the list is sorted.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut on_stack: FxHashSet<&str> = FxHashSet::default();
        let mut path: Vec<&str> = Vec::new();
        let mut cycles: BTreeSet<Vec<String>> = BTreeSet::new();

        for node in &self.nodes {
            if !visited.contains(node.as_str()) {
                self.dfs_cycles(node, &mut visited, &mut on_stack, &mut path, &mut cycles);
            }
        }

        cycles.into_iter().collect()
    }

    fn dfs_cycles<'g>(
        &'g self,
        node: &'g str,
        visited: &mut FxHashSet<&'g str>,
        on_stack: &mut FxHashSet<&'g str>,
        path: &mut Vec<&'g str>,
        cycles: &mut BTreeSet<Vec<String>>,
    ) {
        visited.insert(node);
        on_stack.insert(node);
        path.push(node);

        if let Some(deps) = self.dependencies.get(node) {
            for dep in deps {
                let dep = dep.as_str();
                if !visited.contains(dep) {
                    self.dfs_cycles(dep, visited, on_stack, path, cycles);
                } else if on_stack.contains(dep) {
                    if let Some(start) = path.iter().position(|n| *n == dep) {
                        cycles.insert(canonical_cycle(&path[start..]));
                    }
                }
            }
        }

        path.pop();
        on_stack.remove(node);
    }

    /// Kahn's algorithm; the smallest ready ID always goes next.
    pub fn topological_sort(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree = self.in_degrees();
        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(current) = ready.pop_first() {
            order.push(current.to_string());
            for dependent in &self.dependents[current] {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(self.cycle_error(&order));
        }
        Ok(order)
    }

    /// Groups of modules that can run in parallel, in dependency order.
    ///
    /// Level `n` holds every module whose dependencies all sit in levels
    /// below `n`. IDs are sorted within a level.
    pub fn execution_levels(&self) -> Result<Vec<Vec<String>>, GraphError> {
        let mut in_degree = self.in_degrees();
        let mut current: Vec<&str> = self
            .nodes
            .iter()
            .map(String::as_str)
            .filter(|id| in_degree[id] == 0)
            .collect();

        let mut levels = Vec::new();
        let mut placed = Vec::with_capacity(self.nodes.len());
        while !current.is_empty() {
            let mut next = BTreeSet::new();
            for id in &current {
                for dependent in &self.dependents[*id] {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.insert(dependent.as_str());
                        }
                    }
                }
            }
            let level: Vec<String> = current.iter().map(|id| id.to_string()).collect();
            placed.extend(level.iter().cloned());
            levels.push(level);
            current = next.into_iter().collect();
        }

        if placed.len() != self.nodes.len() {
            return Err(self.cycle_error(&placed));
        }
        Ok(levels)
    }

    fn in_degrees(&self) -> FxHashMap<&str, usize> {
        self.nodes
            .iter()
            .map(|id| (id.as_str(), self.dependencies[id].len()))
            .collect()
    }

    /// Names the modules on cycles, or everything left unordered if the walk found none.
    fn cycle_error(&self, ordered: &[String]) -> GraphError {
        let mut members: BTreeSet<String> = self.detect_cycles().into_iter().flatten().collect();
        if members.is_empty() {
            let done: FxHashSet<&str> = ordered.iter().map(String::as_str).collect();
            members = self
                .nodes
                .iter()
                .filter(|id| !done.contains(id.as_str()))
                .cloned()
                .collect();
        }
        GraphError::CyclicGraph {
            members: members.into_iter().collect(),
        }
    }

    // ------------------------------------------------------------------------
    // Change impact
    // ------------------------------------------------------------------------

    /// Changed modules plus everything that transitively depends on them.
    ///
    /// IDs that are not nodes are ignored.
    pub fn affected_modules<I, S>(&self, changed: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut affected = BTreeSet::new();
        for id in changed {
            let id = id.as_ref();
            if !self.contains(id) || affected.contains(id) {
                continue;
            }
            affected.insert(id.to_string());
            affected.extend(self.all_dependents(id));
        }
        affected
    }

    /// Like `affected_modules`, but modules including a changed library also count as changed.
    ///
    /// A library path hits a module when it equals, contains or is contained
    /// by one of the module's inclusion targets.
    pub fn affected_modules_with_libraries<I, S, L, P>(&self, changed: I, changed_libraries: L) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        L: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let libraries: Vec<PathBuf> = changed_libraries
            .into_iter()
            .map(|p| normalize_path(p.as_ref()))
            .collect();

        let mut seeds: BTreeSet<String> = changed.into_iter().map(|s| s.as_ref().to_string()).collect();
        for (id, targets) in &self.libraries {
            let hit = targets.iter().any(|target| {
                libraries
                    .iter()
                    .any(|lib| target.starts_with(lib) || lib.starts_with(target))
            });
            if hit {
                debug!(module = %id, "includes a changed library");
                seeds.insert(id.clone());
            }
        }

        self.affected_modules(&seeds)
    }

    /// A new graph over `ids` keeping only edges with both ends inside.
    pub fn subgraph<I, S>(&self, ids: I) -> DependencyGraph
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keep: BTreeSet<String> = ids
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .filter(|id| self.contains(id))
            .collect();

        let edges = self
            .edges
            .iter()
            .filter(|e| keep.contains(&e.from) && keep.contains(&e.to))
            .cloned();
        let libraries = self
            .libraries
            .iter()
            .filter(|(id, _)| keep.contains(*id))
            .map(|(id, paths)| (id.clone(), paths.clone()));
        let errors = self
            .errors
            .iter()
            .filter(|e| keep.contains(e.module()))
            .cloned();

        GraphBuilder::new(keep.iter().cloned())
            .dependencies(edges)
            .libraries(libraries)
            .errors(errors)
            .build()
    }

    // ------------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------------

    pub fn stats(&self) -> GraphStats {
        let cycles = self.detect_cycles();
        let mut memo: FxHashMap<&str, usize> = FxHashMap::default();
        let mut in_progress: FxHashSet<&str> = FxHashSet::default();
        let depths: Vec<usize> = self
            .nodes
            .iter()
            .map(|id| self.depth(id, &mut memo, &mut in_progress))
            .collect();

        let max_depth = depths.iter().copied().max().unwrap_or(0);
        let average_depth = if depths.is_empty() {
            0.0
        } else {
            depths.iter().sum::<usize>() as f64 / depths.len() as f64
        };

        GraphStats {
            total_modules: self.nodes.len(),
            total_edges: self.edge_count(),
            root_modules: self.dependencies.values().filter(|d| d.is_empty()).count(),
            leaf_modules: self.dependents.values().filter(|d| d.is_empty()).count(),
            max_depth,
            average_depth,
            has_cycles: !cycles.is_empty(),
            cycle_count: cycles.len(),
        }
    }

    /// Longest path from a root to `id`. Back edges count as roots.
    fn depth<'g>(
        &'g self,
        id: &'g str,
        memo: &mut FxHashMap<&'g str, usize>,
        in_progress: &mut FxHashSet<&'g str>,
    ) -> usize {
        if let Some(&depth) = memo.get(id) {
            return depth;
        }
        if !in_progress.insert(id) {
            return 0;
        }
        let depth = self.dependencies[id]
            .iter()
            .map(|dep| self.depth(dep, memo, in_progress) + 1)
            .max()
            .unwrap_or(0);
        in_progress.remove(id);
        memo.insert(id, depth);
        depth
    }
}

fn neighbours(adjacency: &Adjacency, id: &str) -> Vec<String> {
    adjacency
        .get(id)
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default()
}

/// Breadth-first reachability, excluding the start even when it sits on a cycle.
fn reachable(adjacency: &Adjacency, start: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([start]);
    while let Some(current) = queue.pop_front() {
        let Some(next) = adjacency.get(current) else {
            continue;
        };
        for id in next {
            if id != start && seen.insert(id.clone()) {
                queue.push_back(id.as_str());
            }
        }
    }
    seen
}

fn canonical_cycle(members: &[&str]) -> Vec<String> {
    let start = members
        .iter()
        .enumerate()
        .min_by_key(|(_, id)| **id)
        .map_or(0, |(i, _)| i);
    members[start..]
        .iter()
        .chain(&members[..start])
        .map(|id| id.to_string())
        .collect()
}
