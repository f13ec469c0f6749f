//! Dependency graph construction and ordering
//!
//! One node per descriptor, one edge per detected reference plus the
//! explicit `depends_on` hints. Edges point from dependency to dependent, so
//! a topological walk yields a valid apply order and its reverse a valid
//! destroy order.

use crate::error::{GraphError, Result};
use crate::model::Stack;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Why an edge exists, kept for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Inferred from a reference in an attribute value
    Reference,
    /// Declared through `depends_on`
    Explicit,
}

/// Directed acyclic graph over a stack's descriptors
#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<String, EdgeKind>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Build the graph for a stack.
    ///
    /// Fails with [`GraphError::DanglingReference`] when an attribute points
    /// at an undeclared resource and with [`GraphError::Cycle`] (naming the
    /// full cycle) when the declarations are not acyclic.
    pub fn build(stack: &Stack) -> Result<Self> {
        stack.validate()?;

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        // Nodes are inserted in declaration order; petgraph hands out
        // ascending indices, which later doubles as the deterministic
        // tie-break key.
        for descriptor in stack.iter() {
            let node = graph.add_node(descriptor.id.clone());
            index.insert(descriptor.id.clone(), node);
        }

        for descriptor in stack.iter() {
            let dependent = index[&descriptor.id];

            for (attribute, reference) in descriptor.references() {
                let Some(&dependency) = index.get(&reference.target) else {
                    return Err(GraphError::DanglingReference {
                        resource: descriptor.id.clone(),
                        attribute: attribute.to_string(),
                        target: reference.target.clone(),
                    });
                };
                if graph.find_edge(dependency, dependent).is_none() {
                    graph.add_edge(dependency, dependent, EdgeKind::Reference);
                }
            }

            for dependency_id in &descriptor.depends_on {
                let dependency = index[dependency_id];
                if graph.find_edge(dependency, dependent).is_none() {
                    graph.add_edge(dependency, dependent, EdgeKind::Explicit);
                }
            }
        }

        let built = Self { graph, index };
        if let Some(path) = built.find_cycle() {
            return Err(GraphError::Cycle { path });
        }
        Ok(built)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Resource ids in declaration order
    pub fn ids(&self) -> Vec<String> {
        self.graph.node_weights().cloned().collect()
    }

    /// Direct dependencies of a resource (its producers)
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        let mut deps: Vec<String> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .map(|n| self.graph[n].clone())
            .collect();
        deps.sort_by_key(|id| self.index[id].index());
        deps
    }

    /// Everything that transitively depends on a resource (its consumers)
    pub fn transitive_dependents_of(&self, id: &str) -> HashSet<String> {
        let mut dependents = HashSet::new();
        let Some(&start) = self.index.get(id) else {
            return dependents;
        };
        let mut frontier = vec![start];
        while let Some(node) = frontier.pop() {
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if dependents.insert(self.graph[next].clone()) {
                    frontier.push(next);
                }
            }
        }
        dependents
    }

    /// Topological apply order: producers before consumers.
    ///
    /// Kahn's algorithm with the ready set keyed by declaration index, so
    /// independent resources always come out in the order they were
    /// declared. petgraph's own `toposort` leaves tie order unspecified.
    pub fn apply_order(&self) -> Vec<String> {
        let mut indegree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| {
                (
                    n,
                    self.graph.neighbors_directed(n, Direction::Incoming).count(),
                )
            })
            .collect();

        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(node, _)| node.index())
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(&position) = ready.iter().next() {
            ready.remove(&position);
            let node = NodeIndex::new(position);
            order.push(self.graph[node].clone());

            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                let degree = indegree.get_mut(&next).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(next.index());
                }
            }
        }
        order
    }

    /// Reverse dependency order: consumers before producers
    pub fn destroy_order(&self) -> Vec<String> {
        let mut order = self.apply_order();
        order.reverse();
        order
    }

    /// Depth-first search for a back-edge; returns the full cycle path with
    /// the entry node repeated at the end (`a -> b -> a`).
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        let mut marks = vec![Mark::White; self.graph.node_count()];
        let mut trail: Vec<NodeIndex> = Vec::new();

        fn visit(
            graph: &DiGraph<String, EdgeKind>,
            node: NodeIndex,
            marks: &mut Vec<Mark>,
            trail: &mut Vec<NodeIndex>,
        ) -> Option<Vec<NodeIndex>> {
            marks[node.index()] = Mark::Grey;
            trail.push(node);

            for next in graph.neighbors_directed(node, Direction::Outgoing) {
                match marks[next.index()] {
                    Mark::Grey => {
                        // Back-edge: the cycle is the trail from `next` down
                        // to the current node, closed by `next` again.
                        let start = trail.iter().position(|&n| n == next).unwrap();
                        let mut cycle: Vec<NodeIndex> = trail[start..].to_vec();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    Mark::White => {
                        if let Some(cycle) = visit(graph, next, marks, trail) {
                            return Some(cycle);
                        }
                    }
                    Mark::Black => {}
                }
            }

            trail.pop();
            marks[node.index()] = Mark::Black;
            None
        }

        for node in self.graph.node_indices() {
            if marks[node.index()] == Mark::White {
                if let Some(cycle) = visit(&self.graph, node, &mut marks, &mut trail) {
                    return Some(cycle.into_iter().map(|n| self.graph[n].clone()).collect());
                }
            }
        }
        None
    }
}
