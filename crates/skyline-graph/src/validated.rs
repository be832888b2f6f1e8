//! Sealed, validated deployment graph
//!
//! A [`ValidatedGraph`] can only be produced by
//! [`GraphBuilder::build`](crate::GraphBuilder::build); holding one proves
//! that every reference resolves and the graph is acyclic.

use crate::builder::NodeDecl;
use crate::dag::DependencyDag;
use crate::output::Output;
use crate::types::NodeName;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::BTreeSet;

/// Deployment graph that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedGraph {
    stack: String,
    nodes: IndexMap<NodeName, NodeDecl>,
    exports: IndexMap<String, Output<Value>>,
    dag: DependencyDag,
    order: Vec<NodeName>,
    levels: Vec<Vec<NodeName>>,
}

impl ValidatedGraph {
    pub(crate) fn new(
        stack: String,
        nodes: IndexMap<NodeName, NodeDecl>,
        exports: IndexMap<String, Output<Value>>,
        dag: DependencyDag,
        order: Vec<NodeName>,
        levels: Vec<Vec<NodeName>>,
    ) -> Self {
        Self {
            stack,
            nodes,
            exports,
            dag,
            order,
            levels,
        }
    }

    /// Stack name
    #[inline]
    #[must_use]
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Number of nodes
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of dependency edges
    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.dag.edge_count()
    }

    /// Whether a node with this name exists
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Declaration of one node
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeDecl> {
        self.nodes.get(name)
    }

    /// All nodes in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeDecl> + '_ {
        self.nodes.values()
    }

    /// Every node after all of its dependencies; ties follow declaration order
    #[inline]
    #[must_use]
    pub fn topological_order(&self) -> &[NodeName] {
        &self.order
    }

    /// Waves of mutually independent nodes
    #[inline]
    #[must_use]
    pub fn levels(&self) -> &[Vec<NodeName>] {
        &self.levels
    }

    /// Direct dependencies of a node
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Vec<NodeName> {
        self.dag.dependencies_of(name)
    }

    /// Direct dependents of a node
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<NodeName> {
        self.dag.dependents_of(name)
    }

    /// Nodes that transitively depend on `name`
    #[must_use]
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<NodeName> {
        self.dag.transitive_dependents(name)
    }

    /// Exported values in declaration order
    pub fn exports(&self) -> impl Iterator<Item = (&str, &Output<Value>)> + '_ {
        self.exports.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Graphviz rendering of the dependency graph
    #[must_use]
    pub fn to_dot(&self) -> String {
        self.dag.to_dot()
    }
}
