// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! A small, domain-agnostic DAG used for both the class-inheritance graph
//! (cycle detection only) and the step graph (topological scheduling).

use petgraph::{
    prelude::DiGraph,
    visit::{Dfs, Topo, Walker},
};

use self::subgraph::subgraph;

mod subgraph;

pub type NodeIndex = petgraph::prelude::NodeIndex<u32>;

#[derive(Debug, Clone)]
pub struct Dag<N>(DiGraph<N, (), u32>);

impl<N> Default for Dag<N> {
    fn default() -> Self {
        Self(DiGraph::default())
    }
}

impl<N> Dag<N>
where
    N: Clone + PartialEq,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds node N to the graph and returns the index. If N already exists,
    /// returns the index of that node instead of inserting a duplicate.
    pub fn add_node_or_get_index(&mut self, node: N) -> NodeIndex {
        if let Some(index) = self.get_index(&node) {
            index
        } else {
            self.0.add_node(node)
        }
    }

    pub fn node_exists(&self, node: &N) -> bool {
        self.get_index(node).is_some()
    }

    pub fn remove_node(&mut self, node: &N) -> Option<N> {
        if let Some(index) = self.get_index(node) {
            self.0.remove_node(index)
        } else {
            None
        }
    }

    pub fn node_count(&self) -> usize {
        self.0.node_count()
    }

    /// Add an edge from `a` to `b`. Returns `false` (and adds nothing) if
    /// doing so would introduce a cycle or the edge already exists.
    pub fn add_edge(&mut self, a: NodeIndex, b: NodeIndex) -> bool {
        let a_node = &self.0[a];

        // prevent cycle (b already reaches a)
        if self.dfs(b).any(|n| n == a_node) {
            return false;
        }

        if self.0.find_edge(a, b).is_some() {
            return false;
        }

        self.0.add_edge(a, b, ());
        true
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = &'_ N> {
        self.0.node_indices().map(|i| &self.0[i])
    }

    /// Direct predecessors of `node` (its declared inputs).
    pub fn predecessors(&self, node: &N) -> Vec<&'_ N> {
        let Some(index) = self.get_index(node) else {
            return vec![];
        };
        self.0
            .neighbors_directed(index, petgraph::Direction::Incoming)
            .map(|i| &self.0[i])
            .collect()
    }

    /// Direct successors of `node` (things depending on it).
    pub fn successors(&self, node: &N) -> Vec<&'_ N> {
        let Some(index) = self.get_index(node) else {
            return vec![];
        };
        self.0
            .neighbors_directed(index, petgraph::Direction::Outgoing)
            .map(|i| &self.0[i])
            .collect()
    }

    pub fn dfs(&self, start: NodeIndex) -> impl Iterator<Item = &'_ N> {
        let dfs = Dfs::new(&self.0, start);
        dfs.iter(&self.0).map(|i| &self.0[i])
    }

    /// Perform a topological sort. Panics if the graph is cyclic — callers
    /// are expected to have validated acyclicity via [`Dag::add_edge`]'s
    /// refusal to create cycles in the first place.
    pub fn topo(&self) -> impl Iterator<Item = &'_ N> {
        let topo = Topo::new(&self.0);
        topo.iter(&self.0).map(|i| &self.0[i])
    }

    pub fn transpose(&self) -> Self {
        let mut transposed = self.0.clone();
        transposed.reverse();
        Self(transposed)
    }

    pub fn subgraph(&self, starting_nodes: &[N]) -> Self {
        Self(subgraph(&self.0, starting_nodes))
    }

    pub fn get_index(&self, node: &N) -> Option<NodeIndex> {
        self.0.node_indices().find(|i| self.0[*i] == *node)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_cycles() {
        let mut dag: Dag<&str> = Dag::new();
        let a = dag.add_node_or_get_index("a");
        let b = dag.add_node_or_get_index("b");
        assert!(dag.add_edge(a, b));
        assert!(!dag.add_edge(b, a));
    }

    #[test]
    fn dedupes_nodes() {
        let mut dag: Dag<&str> = Dag::new();
        let a1 = dag.add_node_or_get_index("a");
        let a2 = dag.add_node_or_get_index("a");
        assert_eq!(a1, a2);
        assert_eq!(dag.node_count(), 1);
    }

    #[test]
    fn topo_respects_edges() {
        let mut dag: Dag<i32> = Dag::new();
        let a = dag.add_node_or_get_index(1);
        let b = dag.add_node_or_get_index(2);
        let c = dag.add_node_or_get_index(3);
        dag.add_edge(a, b);
        dag.add_edge(b, c);

        let order: Vec<i32> = dag.topo().copied().collect();
        let pos = |n: i32| order.iter().position(|x| *x == n).unwrap();
        assert!(pos(1) < pos(2));
        assert!(pos(2) < pos(3));
    }

    #[test]
    fn predecessors_and_successors() {
        let mut dag: Dag<i32> = Dag::new();
        let a = dag.add_node_or_get_index(1);
        let b = dag.add_node_or_get_index(2);
        dag.add_edge(a, b);

        assert_eq!(dag.predecessors(&2), vec![&1]);
        assert_eq!(dag.successors(&1), vec![&2]);
    }
}
