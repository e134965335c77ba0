//! Generic directed, edge-labeled graph.
//!
//! A [`Graph`] knows nothing about jobs: nodes are opaque identifiers and
//! each edge is a `(left, right, name)` triple meaning "left depends on right
//! under the name `name`". Graphs are immutable values; every operation that
//! derives a new graph returns a fresh one.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use crate::error::{Result, TaskgraphError};

/// A named edge: `(left, right, name)`, where `left` depends on `right`.
pub type Edge<N> = (N, N, String);

/// An immutable directed graph with named edges.
///
/// Edge endpoints are expected to be members of `nodes`; this is not
/// enforced. Traversals are only meaningful for acyclic graphs and report a
/// [`TaskgraphError::GraphCycle`] otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graph<N: Ord = String> {
    nodes: BTreeSet<N>,
    edges: BTreeSet<Edge<N>>,
}

impl<N: Ord> Default for Graph<N> {
    fn default() -> Self {
        Self {
            nodes: BTreeSet::new(),
            edges: BTreeSet::new(),
        }
    }
}

impl<N> Graph<N>
where
    N: Clone + Ord + fmt::Display,
{
    /// Create a graph from its node and edge sets.
    pub fn new(nodes: BTreeSet<N>, edges: BTreeSet<Edge<N>>) -> Self {
        Self { nodes, edges }
    }

    /// Create an edgeless graph over the given nodes.
    pub fn from_nodes(nodes: impl IntoIterator<Item = N>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
            edges: BTreeSet::new(),
        }
    }

    /// All nodes of the graph.
    pub fn nodes(&self) -> &BTreeSet<N> {
        &self.nodes
    }

    /// All edges of the graph.
    pub fn edges(&self) -> &BTreeSet<Edge<N>> {
        &self.edges
    }

    /// Check whether `node` is part of the graph.
    pub fn contains(&self, node: &N) -> bool {
        self.nodes.contains(node)
    }

    /// Compute the transitive closure of `nodes`.
    ///
    /// With `reverse == false` this follows edges from left to right, i.e. it
    /// collects everything the seed nodes depend on. With `reverse == true`
    /// it collects everything that depends on the seed nodes. The seed nodes
    /// are always part of the result.
    pub fn transitive_closure(&self, nodes: &BTreeSet<N>, reverse: bool) -> Result<Graph<N>> {
        let unknown: Vec<String> = nodes
            .iter()
            .filter(|n| !self.nodes.contains(*n))
            .map(|n| n.to_string())
            .collect();
        if !unknown.is_empty() {
            return Err(TaskgraphError::UnknownNode { nodes: unknown });
        }

        // Edges indexed by the side the closure grows from.
        let mut edges_from: BTreeMap<&N, Vec<&Edge<N>>> = BTreeMap::new();
        for edge in &self.edges {
            let source = if reverse { &edge.1 } else { &edge.0 };
            edges_from.entry(source).or_default().push(edge);
        }

        let mut included: BTreeSet<N> = nodes.clone();
        let mut included_edges: BTreeSet<Edge<N>> = BTreeSet::new();
        let mut queue: VecDeque<&N> = nodes.iter().collect();

        while let Some(node) = queue.pop_front() {
            let Some(edges) = edges_from.get(node) else {
                continue;
            };
            for &edge in edges {
                let other = if reverse { &edge.0 } else { &edge.1 };
                included_edges.insert(edge.clone());
                if included.insert(other.clone()) {
                    queue.push_back(other);
                }
            }
        }

        Ok(Graph::new(included, included_edges))
    }

    /// Visit nodes dependency-first.
    ///
    /// A node is yielded only after every node it has an edge to.
    pub fn visit_postorder(&self) -> Visit<'_, N> {
        Visit::new(self, false)
    }

    /// Visit nodes dependent-first.
    ///
    /// A node is yielded only after every node that has an edge to it.
    pub fn visit_preorder(&self) -> Visit<'_, N> {
        Visit::new(self, true)
    }

    /// Map each node to the set of nodes it depends on.
    pub fn links_dict(&self) -> BTreeMap<N, BTreeSet<N>> {
        let mut links: BTreeMap<N, BTreeSet<N>> =
            self.nodes.iter().map(|n| (n.clone(), BTreeSet::new())).collect();
        for (left, right, _) in &self.edges {
            links.entry(left.clone()).or_default().insert(right.clone());
        }
        links
    }

    /// Map each node to the set of nodes that depend on it.
    pub fn reverse_links_dict(&self) -> BTreeMap<N, BTreeSet<N>> {
        let mut links: BTreeMap<N, BTreeSet<N>> =
            self.nodes.iter().map(|n| (n.clone(), BTreeSet::new())).collect();
        for (left, right, _) in &self.edges {
            links.entry(right.clone()).or_default().insert(left.clone());
        }
        links
    }

    /// Map each node to its dependencies keyed by edge name.
    pub fn named_links_dict(&self) -> BTreeMap<N, BTreeMap<String, N>> {
        let mut links: BTreeMap<N, BTreeMap<String, N>> =
            self.nodes.iter().map(|n| (n.clone(), BTreeMap::new())).collect();
        for (left, right, name) in &self.edges {
            links
                .entry(left.clone())
                .or_default()
                .insert(name.clone(), right.clone());
        }
        links
    }
}

/// Lazy topological traversal produced by [`Graph::visit_postorder`] and
/// [`Graph::visit_preorder`].
///
/// Simultaneously ready nodes are yielded in node order. If the graph has a
/// cycle, the traversal yields a single [`TaskgraphError::GraphCycle`] naming
/// the nodes that could not be visited, then ends.
pub struct Visit<'a, N: Ord> {
    /// Number of not-yet-visited prerequisites per pending node.
    pending: BTreeMap<&'a N, usize>,
    /// Nodes to notify when a node is visited.
    unlocks: BTreeMap<&'a N, BTreeSet<&'a N>>,
    /// Nodes whose prerequisites have all been visited.
    ready: BTreeSet<&'a N>,
    done: bool,
}

impl<'a, N> Visit<'a, N>
where
    N: Ord,
{
    fn new(graph: &'a Graph<N>, dependents_first: bool) -> Self {
        let mut prerequisites: BTreeMap<&'a N, BTreeSet<&'a N>> =
            graph.nodes.iter().map(|n| (n, BTreeSet::new())).collect();
        let mut unlocks: BTreeMap<&'a N, BTreeSet<&'a N>> = BTreeMap::new();

        for (left, right, _) in &graph.edges {
            // Postorder waits on dependencies, preorder waits on dependents.
            let (waiter, prerequisite) = if dependents_first {
                (right, left)
            } else {
                (left, right)
            };
            prerequisites.entry(waiter).or_default().insert(prerequisite);
            unlocks.entry(prerequisite).or_default().insert(waiter);
        }

        let mut pending = BTreeMap::new();
        let mut ready = BTreeSet::new();
        for (node, prereqs) in prerequisites {
            if prereqs.is_empty() {
                ready.insert(node);
            } else {
                pending.insert(node, prereqs.len());
            }
        }

        Self {
            pending,
            unlocks,
            ready,
            done: false,
        }
    }
}

impl<'a, N> Iterator for Visit<'a, N>
where
    N: Ord + fmt::Display,
{
    type Item = Result<&'a N>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let Some(node) = self.ready.pop_first() else {
            self.done = true;
            if self.pending.is_empty() {
                return None;
            }
            let nodes = self.pending.keys().map(|n| n.to_string()).collect();
            return Some(Err(TaskgraphError::GraphCycle { nodes }));
        };

        if let Some(waiters) = self.unlocks.remove(node) {
            for waiter in waiters {
                if let Some(count) = self.pending.get_mut(waiter) {
                    *count -= 1;
                    if *count == 0 {
                        self.pending.remove(waiter);
                        self.ready.insert(waiter);
                    }
                }
            }
        }

        Some(Ok(node))
    }
}
