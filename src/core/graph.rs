//! core::graph
//!
//! Stack dependency graph representation and operations.
//!
//! # Architecture
//!
//! The dependency graph is a DAG where:
//! - Nodes are stacks in the assembly
//! - Edges point from a dependent stack to the stack it depends on
//! - A stack may depend on any number of other stacks
//!
//! # Invariants
//!
//! - Graph must be acyclic
//! - Every edge endpoint is a known node

use super::types::StackId;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// The stack dependency graph.
#[derive(Debug, Default, Clone)]
pub struct StackGraph {
    /// Nodes in insertion order
    nodes: Vec<StackId>,
    /// Dependencies for each stack (what it needs deployed first)
    dependencies: HashMap<StackId, BTreeSet<StackId>>,
    /// Cached dependents (derived from dependencies)
    dependents: HashMap<StackId, BTreeSet<StackId>>,
}

impl StackGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Adding an existing node is a no-op.
    pub fn add_node(&mut self, id: StackId) {
        if !self.dependencies.contains_key(&id) {
            self.dependencies.insert(id.clone(), BTreeSet::new());
            self.nodes.push(id);
        }
    }

    /// Record that `dependent` depends on `dependency`.
    ///
    /// Both endpoints are added as nodes if missing.
    pub fn add_edge(&mut self, dependent: StackId, dependency: StackId) {
        self.add_node(dependent.clone());
        self.add_node(dependency.clone());
        self.dependents
            .entry(dependency.clone())
            .or_default()
            .insert(dependent.clone());
        if let Some(deps) = self.dependencies.get_mut(&dependent) {
            deps.insert(dependency);
        }
    }

    /// Whether the graph contains a node.
    pub fn contains(&self, id: &StackId) -> bool {
        self.dependencies.contains_key(id)
    }

    /// Direct dependencies of a stack.
    pub fn dependencies(&self, id: &StackId) -> impl Iterator<Item = &StackId> {
        self.dependencies.get(id).into_iter().flatten()
    }

    /// Direct dependents of a stack.
    pub fn dependents(&self, id: &StackId) -> impl Iterator<Item = &StackId> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// All nodes in insertion order.
    pub fn stacks(&self) -> impl Iterator<Item = &StackId> {
        self.nodes.iter()
    }

    /// Check if the graph contains cycles.
    ///
    /// Returns `Some(stack)` for a stack that lies on a cycle.
    pub fn find_cycle(&self) -> Option<StackId> {
        let mut visited = HashSet::new();
        let mut path = HashSet::new();

        for id in &self.nodes {
            if let Some(found) = self.cycle_from(id, &mut visited, &mut path) {
                return Some(found);
            }
        }
        None
    }

    fn cycle_from(
        &self,
        id: &StackId,
        visited: &mut HashSet<StackId>,
        path: &mut HashSet<StackId>,
    ) -> Option<StackId> {
        if path.contains(id) {
            return Some(id.clone());
        }
        if visited.contains(id) {
            return None;
        }

        visited.insert(id.clone());
        path.insert(id.clone());

        for dep in self.dependencies(id) {
            if let Some(found) = self.cycle_from(dep, visited, path) {
                return Some(found);
            }
        }

        path.remove(id);
        None
    }

    /// All transitive dependencies of a stack (not including itself).
    pub fn upstream(&self, id: &StackId) -> HashSet<StackId> {
        self.closure(id, |g, n| g.dependencies(n).cloned().collect())
    }

    /// All transitive dependents of a stack (not including itself).
    pub fn downstream(&self, id: &StackId) -> HashSet<StackId> {
        self.closure(id, |g, n| g.dependents(n).cloned().collect())
    }

    fn closure<F>(&self, id: &StackId, next: F) -> HashSet<StackId>
    where
        F: Fn(&Self, &StackId) -> Vec<StackId>,
    {
        let mut result = HashSet::new();
        let mut queue: VecDeque<StackId> = next(self, id).into();

        while let Some(current) = queue.pop_front() {
            if result.insert(current.clone()) {
                queue.extend(next(self, &current));
            }
        }

        result
    }

    /// Compute a dependency-respecting order.
    ///
    /// Every stack appears after all of its dependencies. Among stacks that
    /// are ready at the same time, insertion order is kept, so the result is
    /// deterministic. Stacks on a cycle are omitted; callers check
    /// [`find_cycle`](Self::find_cycle) first.
    pub fn topological_order(&self) -> Vec<StackId> {
        let mut remaining: HashMap<&StackId, usize> = self
            .nodes
            .iter()
            .map(|id| (id, self.dependencies.get(id).map_or(0, BTreeSet::len)))
            .collect();
        let mut done: HashSet<&StackId> = HashSet::new();
        let mut order = Vec::with_capacity(self.nodes.len());

        loop {
            let ready: Vec<&StackId> = self
                .nodes
                .iter()
                .filter(|id| !done.contains(id) && remaining.get(id) == Some(&0))
                .collect();
            if ready.is_empty() {
                break;
            }
            for id in ready {
                done.insert(id);
                order.push(id.clone());
                for dependent in self.dependents(id) {
                    if let Some(count) = remaining.get_mut(dependent) {
                        *count = count.saturating_sub(1);
                    }
                }
            }
        }

        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> StackId {
        StackId::new(s).unwrap()
    }

    #[test]
    fn empty_graph_has_no_cycles() {
        let graph = StackGraph::new();
        assert!(graph.find_cycle().is_none());
        assert!(graph.topological_order().is_empty());
    }

    #[test]
    fn detects_cycle() {
        let mut graph = StackGraph::new();
        graph.add_edge(id("a"), id("b"));
        graph.add_edge(id("b"), id("c"));
        graph.add_edge(id("c"), id("a"));
        assert!(graph.find_cycle().is_some());
    }

    #[test]
    fn diamond_has_no_cycle() {
        let mut graph = StackGraph::new();
        graph.add_edge(id("app"), id("net"));
        graph.add_edge(id("app"), id("db"));
        graph.add_edge(id("db"), id("net"));
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn upstream_is_transitive() {
        let mut graph = StackGraph::new();
        graph.add_edge(id("app"), id("db"));
        graph.add_edge(id("db"), id("net"));
        graph.add_node(id("other"));

        let up = graph.upstream(&id("app"));
        assert_eq!(up.len(), 2);
        assert!(up.contains(&id("db")));
        assert!(up.contains(&id("net")));
        assert!(graph.upstream(&id("other")).is_empty());
    }

    #[test]
    fn downstream_is_transitive() {
        let mut graph = StackGraph::new();
        graph.add_edge(id("app"), id("db"));
        graph.add_edge(id("db"), id("net"));

        let down = graph.downstream(&id("net"));
        assert!(down.contains(&id("db")));
        assert!(down.contains(&id("app")));
        assert!(graph.downstream(&id("app")).is_empty());
    }

    #[test]
    fn topological_order_puts_dependencies_first() {
        let mut graph = StackGraph::new();
        graph.add_node(id("app"));
        graph.add_edge(id("app"), id("db"));
        graph.add_edge(id("db"), id("net"));

        let order = graph.topological_order();
        let pos = |s: &str| order.iter().position(|x| x == &id(s)).unwrap();
        assert!(pos("net") < pos("db"));
        assert!(pos("db") < pos("app"));
    }

    #[test]
    fn topological_order_keeps_insertion_order_for_independent_stacks() {
        let mut graph = StackGraph::new();
        graph.add_node(id("zeta"));
        graph.add_node(id("alpha"));
        graph.add_node(id("mid"));

        assert_eq!(graph.topological_order(), vec![id("zeta"), id("alpha"), id("mid")]);
    }
}
