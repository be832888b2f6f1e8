//! Dependency DAG over node names
//!
//! Edges point from a dependency to its dependent: `role -> function`
//! means the function's configuration needs an attribute of the role.

use crate::error::GraphError;
use crate::types::NodeName;
use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::fmt::Write as _;

/// Directed dependency graph with deterministic ordering.
///
/// Node indices follow insertion order, which the builder keeps equal to
/// declaration order; every ordering query breaks ties by that index.
#[derive(Debug, Clone, Default)]
pub struct DependencyDag {
    inner: DiGraph<NodeName, ()>,
    index: HashMap<NodeName, NodeIndex>,
}

impl DependencyDag {
    /// Empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; adding an existing name is a no-op
    pub fn add_node(&mut self, name: NodeName) -> NodeIndex {
        if let Some(&idx) = self.index.get(&name) {
            return idx;
        }
        let idx = self.inner.add_node(name.clone());
        self.index.insert(name, idx);
        idx
    }

    /// Record that `dependent` needs `dependency`
    ///
    /// # Errors
    /// [`GraphError::DanglingReference`] if either endpoint is unknown.
    pub fn add_edge(&mut self, dependency: &NodeName, dependent: &NodeName) -> Result<(), GraphError> {
        let to = self.lookup(dependent, dependent)?;
        let from = self.lookup(dependency, dependent)?;
        self.inner.update_edge(from, to, ());
        Ok(())
    }

    fn lookup(&self, name: &NodeName, referrer: &NodeName) -> Result<NodeIndex, GraphError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::DanglingReference {
                referrer: referrer.to_string(),
                reference: name.clone(),
            })
    }

    /// Number of nodes
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    /// Number of distinct dependency edges
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Whether `name` is part of the graph
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Whether any dependency cycle exists
    #[must_use]
    pub fn is_cyclic(&self) -> bool {
        is_cyclic_directed(&self.inner)
    }

    /// Members of one cycle, if any, in declaration order
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<NodeName>> {
        tarjan_scc(&self.inner)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.inner.contains_edge(scc[0], scc[0])
            })
            .map(|mut scc| {
                scc.sort();
                scc.into_iter().map(|idx| self.inner[idx].clone()).collect::<Vec<_>>()
            })
            .min_by_key(|members| members.first().and_then(|n| self.index.get(n).copied()))
    }

    /// Topological order; ties are broken by declaration order
    ///
    /// # Errors
    /// [`GraphError::CycleDetected`] naming the members of a cycle.
    pub fn topological_order(&self) -> Result<Vec<NodeName>, GraphError> {
        let mut in_degree: Vec<usize> = self
            .inner
            .node_indices()
            .map(|idx| self.inner.neighbors_directed(idx, Direction::Incoming).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
            .inner
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(self.inner.node_count());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(self.inner[idx].clone());
            for next in self.inner.neighbors_directed(idx, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() == self.inner.node_count() {
            Ok(order)
        } else {
            Err(GraphError::CycleDetected {
                cycle: self.find_cycle().unwrap_or_default(),
            })
        }
    }

    /// Nodes grouped into waves: every node's dependencies lie in earlier waves.
    ///
    /// Nodes within one wave are independent and may be applied concurrently.
    ///
    /// # Errors
    /// [`GraphError::CycleDetected`] if the graph is cyclic.
    pub fn levels(&self) -> Result<Vec<Vec<NodeName>>, GraphError> {
        let order = self.topological_order()?;
        let mut depth: HashMap<&NodeName, usize> = HashMap::with_capacity(order.len());
        let mut levels: Vec<Vec<NodeName>> = Vec::new();

        for name in &order {
            let idx = self.index[name];
            let level = self
                .inner
                .neighbors_directed(idx, Direction::Incoming)
                .map(|dep| depth[&self.inner[dep]] + 1)
                .max()
                .unwrap_or(0);
            depth.insert(name, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(name.clone());
        }

        Ok(levels)
    }

    /// Direct dependencies of `name`, in declaration order
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Vec<NodeName> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Direct dependents of `name`, in declaration order
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<NodeName> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Every node that transitively depends on `name`
    #[must_use]
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<NodeName> {
        let mut seen = BTreeSet::new();
        let mut stack = self.dependents_of(name);
        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                stack.extend(self.dependents_of(next.as_str()));
            }
        }
        seen
    }

    /// Nodes with no dependencies
    #[must_use]
    pub fn entry_nodes(&self) -> Vec<NodeName> {
        self.inner
            .node_indices()
            .filter(|&idx| self.inner.neighbors_directed(idx, Direction::Incoming).next().is_none())
            .map(|idx| self.inner[idx].clone())
            .collect()
    }

    /// Nodes nothing depends on
    #[must_use]
    pub fn exit_nodes(&self) -> Vec<NodeName> {
        self.inner
            .node_indices()
            .filter(|&idx| self.inner.neighbors_directed(idx, Direction::Outgoing).next().is_none())
            .map(|idx| self.inner[idx].clone())
            .collect()
    }

    /// Graphviz rendering, edges drawn dependency -> dependent
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph deployment {\n    rankdir=LR;\n");
        for idx in self.inner.node_indices() {
            let _ = writeln!(dot, "    \"{}\";", self.inner[idx]);
        }
        for edge in self.inner.raw_edges() {
            let _ = writeln!(
                dot,
                "    \"{}\" -> \"{}\";",
                self.inner[edge.source()],
                self.inner[edge.target()]
            );
        }
        dot.push_str("}\n");
        dot
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<NodeName> {
        let Some(&idx) = self.index.get(name) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.inner.neighbors_directed(idx, direction).collect();
        found.sort();
        found.into_iter().map(|n| self.inner[n].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> NodeName {
        NodeName::new(s).unwrap()
    }

    fn chain(names: &[&str]) -> DependencyDag {
        let mut dag = DependencyDag::new();
        for n in names {
            dag.add_node(name(n));
        }
        for pair in names.windows(2) {
            dag.add_edge(&name(pair[0]), &name(pair[1])).unwrap();
        }
        dag
    }

    #[test]
    fn topological_order_follows_edges() {
        let dag = chain(&["a", "b", "c"]);
        let order: Vec<_> = dag.topological_order().unwrap();
        assert_eq!(order, vec![name("a"), name("b"), name("c")]);
        assert!(!dag.is_cyclic());
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut dag = DependencyDag::new();
        for n in ["api", "role", "stage"] {
            dag.add_node(name(n));
        }
        dag.add_edge(&name("api"), &name("stage")).unwrap();
        let order = dag.topological_order().unwrap();
        assert_eq!(order, vec![name("api"), name("role"), name("stage")]);
    }

    #[test]
    fn rejects_cycle_with_members() {
        let mut dag = chain(&["a", "b", "c"]);
        dag.add_edge(&name("c"), &name("a")).unwrap();
        assert!(dag.is_cyclic());
        match dag.topological_order() {
            Err(GraphError::CycleDetected { cycle }) => {
                assert_eq!(cycle, vec![name("a"), name("b"), name("c")]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut dag = DependencyDag::new();
        dag.add_node(name("x"));
        dag.add_edge(&name("x"), &name("x")).unwrap();
        assert_eq!(dag.find_cycle(), Some(vec![name("x")]));
    }

    #[test]
    fn edge_to_unknown_node_is_dangling() {
        let mut dag = DependencyDag::new();
        dag.add_node(name("function"));
        let err = dag.add_edge(&name("lambdaRol"), &name("function")).unwrap_err();
        assert!(err.is_dangling());
    }

    #[test]
    fn duplicate_edges_collapse() {
        let mut dag = chain(&["a", "b"]);
        dag.add_edge(&name("a"), &name("b")).unwrap();
        assert_eq!(dag.edge_count(), 1);
    }

    #[test]
    fn levels_group_independent_nodes() {
        let mut dag = DependencyDag::new();
        for n in ["role", "api", "function", "stage"] {
            dag.add_node(name(n));
        }
        dag.add_edge(&name("role"), &name("function")).unwrap();
        dag.add_edge(&name("api"), &name("stage")).unwrap();
        let levels = dag.levels().unwrap();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0], vec![name("role"), name("api")]);
        assert_eq!(levels[1], vec![name("function"), name("stage")]);
    }

    #[test]
    fn transitive_dependents_walk_the_graph() {
        let dag = chain(&["a", "b", "c"]);
        let deps = dag.transitive_dependents("a");
        assert_eq!(deps, BTreeSet::from([name("b"), name("c")]));
        assert!(dag.transitive_dependents("c").is_empty());
        assert_eq!(dag.entry_nodes(), vec![name("a")]);
        assert_eq!(dag.exit_nodes(), vec![name("c")]);
    }

    #[test]
    fn dot_lists_nodes_and_edges() {
        let dot = chain(&["a", "b"]).to_dot();
        assert!(dot.contains("\"a\" -> \"b\";"));
        assert!(dot.starts_with("digraph deployment {"));
    }
}
