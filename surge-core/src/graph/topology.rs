//! Derivation Ordering
//!
//! Decides which derived signals must recompute after a write, and in what
//! order, so that every derived signal sees fully-updated inputs.
//!
//! # Algorithm
//!
//! 1. When a source node changes, mark every transitive dependent
//!    "maybe dirty" (BFS over dependent edges).
//! 2. Sort the visited nodes topologically (Kahn's algorithm restricted to
//!    the visited set), so dependencies come before dependents.
//! 3. Mark the source's direct dependents "dirty".
//! 4. The caller walks the order: a dirty node recomputes, and if its value
//!    actually changed, its own direct dependents become dirty. Maybe-dirty
//!    nodes whose inputs never changed are simply marked clean.
//!
//! Recomputation stays with the caller; this type only owns the edges and
//! the dirty bookkeeping.

use std::collections::{HashMap, HashSet, VecDeque};

use super::node::{DirtyState, Node, NodeId};

/// The derivation graph of one signal store.
#[derive(Debug, Default)]
pub struct DerivationGraph {
    nodes: HashMap<NodeId, Node>,
    by_name: HashMap<String, NodeId>,
}

impl DerivationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source node.
    pub fn add_source(&mut self, name: &str) -> NodeId {
        self.insert(Node::source(name))
    }

    /// Add a derived node reading from `dependencies`.
    ///
    /// Unknown dependency IDs are ignored; the store validates names before
    /// calling this.
    pub fn add_derived(&mut self, name: &str, dependencies: &[NodeId]) -> NodeId {
        let id = self.insert(Node::derived(name));
        for &dependency in dependencies {
            self.add_edge(dependency, id);
        }
        id
    }

    fn insert(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.by_name.insert(node.name().to_string(), id);
        self.nodes.insert(id, node);
        id
    }

    /// Add a dependency edge: `dependent` reads from `dependency`.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if !self.nodes.contains_key(&dependency) || !self.nodes.contains_key(&dependent) {
            return;
        }
        if let Some(node) = self.nodes.get_mut(&dependency) {
            node.add_dependent(dependent);
        }
        if let Some(node) = self.nodes.get_mut(&dependent) {
            node.add_dependency(dependency);
        }
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Mark a source node as changed and propagate dirty flags.
    ///
    /// Returns every transitive dependent in topological order. Direct
    /// dependents of `source_id` come back dirty, the rest maybe dirty.
    pub fn mark_changed(&mut self, source_id: NodeId) -> Vec<NodeId> {
        let mut visited = HashSet::new();
        let mut to_process = Vec::new();
        let mut queue = VecDeque::new();

        if let Some(source) = self.nodes.get(&source_id) {
            queue.extend(source.dependents().iter().copied());
        }

        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.mark_maybe_dirty();
                to_process.push(node_id);
                queue.extend(node.dependents().iter().copied());
            }
        }

        self.mark_dependents_dirty(source_id);
        self.topological_sort(to_process)
    }

    /// Mark the direct dependents of `node_id` dirty.
    pub fn mark_dependents_dirty(&mut self, node_id: NodeId) {
        let dependents: Vec<NodeId> = match self.nodes.get(&node_id) {
            Some(node) => node.dependents().iter().copied().collect(),
            None => return,
        };
        for dependent in dependents {
            if let Some(node) = self.nodes.get_mut(&dependent) {
                node.mark_dirty();
            }
        }
    }

    /// Return the node's current dirty state and mark it clean.
    pub fn settle(&mut self, node_id: NodeId) -> DirtyState {
        match self.nodes.get_mut(&node_id) {
            Some(node) => {
                let state = node.dirty_state();
                node.mark_clean();
                state
            }
            None => DirtyState::Clean,
        }
    }

    /// Order `nodes` so dependencies come before dependents.
    fn topological_sort(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        // In-degrees only count edges within the node set.
        for &node_id in &nodes {
            if let Some(node) = self.nodes.get(&node_id) {
                let degree = node
                    .dependencies()
                    .iter()
                    .filter(|d| node_set.contains(d))
                    .count();
                in_degree.insert(node_id, degree);
                if degree == 0 {
                    queue.push_back(node_id);
                }
            }
        }

        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);

            if let Some(node) = self.nodes.get(&node_id) {
                for dependent_id in node.dependents() {
                    if let Some(degree) = in_degree.get_mut(dependent_id) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(*dependent_id);
                        }
                    }
                }
            }
        }

        result
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Drop every node and edge.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.by_name.clear();
    }
}
