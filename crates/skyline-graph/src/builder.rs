//! Graph Builder
//!
//! The explicit declaration context: every resource constructor receives a
//! `&mut GraphBuilder` and registers its node here. Nothing is registered in
//! global state, so graphs are constructible and testable in isolation.
//!
//! Declaration performs no side effects. [`GraphBuilder::build`] checks that
//! every reference resolves to a declared node and that the graph is
//! acyclic, then seals it into a [`ValidatedGraph`].

use crate::dag::DependencyDag;
use crate::error::GraphError;
use crate::output::Output;
use crate::properties::Properties;
use crate::types::{NodeName, ResourceType};
use crate::validated::ValidatedGraph;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

/// Extra declaration options
#[derive(Debug, Clone, Default)]
pub struct DeclareOptions {
    /// Nodes that must be applied first even though no property references them
    pub depends_on: Vec<NodeName>,
    /// Delete the old resource before creating its replacement, for
    /// resources whose fixed name cannot exist twice
    pub delete_before_replace: bool,
}

impl DeclareOptions {
    /// Add an explicit dependency
    #[must_use]
    pub fn depends_on(mut self, handle: &ResourceHandle) -> Self {
        self.depends_on.push(handle.name().clone());
        self
    }

    /// With delete-then-create replacement
    #[inline]
    #[must_use]
    pub fn with_delete_before_replace(mut self, enabled: bool) -> Self {
        self.delete_before_replace = enabled;
        self
    }
}

/// A declared resource node
#[derive(Debug, Clone)]
pub struct NodeDecl {
    /// Unique name
    pub name: NodeName,
    /// Provider type token
    pub resource_type: ResourceType,
    /// Input properties
    pub properties: Properties,
    /// Dependencies declared through [`DeclareOptions`]
    pub explicit_dependencies: BTreeSet<NodeName>,
    /// Replace by deleting first instead of creating first
    pub delete_before_replace: bool,
}

impl NodeDecl {
    /// Every node this declaration needs resolved first
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<NodeName> {
        let mut deps = self.properties.dependencies();
        deps.extend(self.explicit_dependencies.iter().cloned());
        deps
    }
}

/// Handle to a declared node, used to reference its eventual attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    name: NodeName,
    resource_type: ResourceType,
}

impl ResourceHandle {
    /// Node name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &NodeName {
        &self.name
    }

    /// Provider type token
    #[inline]
    #[must_use]
    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    /// Deferred attribute of this node
    #[must_use]
    pub fn output<T>(&self, attribute: &str) -> Output<T>
    where
        T: DeserializeOwned + 'static,
    {
        Output::attribute(self.name.clone(), attribute)
    }

    /// Provider-assigned id
    #[must_use]
    pub fn id(&self) -> Output<String> {
        self.output("id")
    }
}

/// Builder for deployment graphs
///
/// ```rust
/// use skyline_graph::{GraphBuilder, Output, Properties};
///
/// let mut builder = GraphBuilder::new("dev");
/// let api = builder
///     .declare("httpApi", "aws:apigatewayv2/api:Api", Properties::new()
///         .set("protocolType", Output::<String>::from("HTTP")))
///     .unwrap();
/// builder
///     .declare("stage", "aws:apigatewayv2/stage:Stage", Properties::new()
///         .set("apiId", api.id()))
///     .unwrap();
/// let graph = builder.build().unwrap();
/// assert_eq!(graph.topological_order()[0].as_str(), "httpApi");
/// ```
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    stack: String,
    nodes: IndexMap<NodeName, NodeDecl>,
    exports: IndexMap<String, Output<Value>>,
}

impl GraphBuilder {
    /// Create a builder for the named stack
    #[must_use]
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            nodes: IndexMap::new(),
            exports: IndexMap::new(),
        }
    }

    /// Stack name
    #[inline]
    #[must_use]
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Number of declared nodes
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether a node with this name has been declared
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Declared node by name
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeDecl> {
        self.nodes.get(name)
    }

    /// Declare a resource node
    ///
    /// # Errors
    /// [`GraphError::InvalidName`] or [`GraphError::DuplicateName`].
    pub fn declare(
        &mut self,
        name: &str,
        resource_type: impl Into<ResourceType>,
        properties: Properties,
    ) -> Result<ResourceHandle, GraphError> {
        self.declare_with(name, resource_type, properties, DeclareOptions::default())
    }

    /// Declare a resource node with extra options
    ///
    /// # Errors
    /// [`GraphError::InvalidName`] or [`GraphError::DuplicateName`].
    pub fn declare_with(
        &mut self,
        name: &str,
        resource_type: impl Into<ResourceType>,
        properties: Properties,
        options: DeclareOptions,
    ) -> Result<ResourceHandle, GraphError> {
        let name = NodeName::new(name)?;
        if self.nodes.contains_key(&name) {
            return Err(GraphError::DuplicateName(name));
        }
        let resource_type = resource_type.into();

        tracing::debug!(
            "Declared {} ({}) with {} properties",
            name,
            resource_type,
            properties.len()
        );

        self.nodes.insert(
            name.clone(),
            NodeDecl {
                name: name.clone(),
                resource_type: resource_type.clone(),
                properties,
                explicit_dependencies: options.depends_on.into_iter().collect(),
                delete_before_replace: options.delete_before_replace,
            },
        );
        Ok(ResourceHandle { name, resource_type })
    }

    /// Surface a value to callers of the deployment once it is applied
    ///
    /// # Errors
    /// [`GraphError::DuplicateExport`] if the name is already exported.
    pub fn export<T>(&mut self, name: impl Into<String>, value: Output<T>) -> Result<(), GraphError>
    where
        T: Serialize + 'static,
    {
        let name = name.into();
        if self.exports.contains_key(&name) {
            return Err(GraphError::DuplicateExport(name));
        }
        self.exports.insert(name, value.to_value());
        Ok(())
    }

    /// Validate and seal the graph
    ///
    /// # Errors
    /// - [`GraphError::DanglingReference`] if a node, explicit dependency or
    ///   export references an undeclared node
    /// - [`GraphError::CycleDetected`] if resolution dependencies form a cycle
    pub fn build(self) -> Result<ValidatedGraph, GraphError> {
        let mut dag = DependencyDag::new();
        for name in self.nodes.keys() {
            dag.add_node(name.clone());
        }

        for decl in self.nodes.values() {
            for dependency in decl.dependencies() {
                if !self.nodes.contains_key(&dependency) {
                    return Err(GraphError::DanglingReference {
                        referrer: decl.name.to_string(),
                        reference: dependency,
                    });
                }
                dag.add_edge(&dependency, &decl.name)?;
            }
        }

        for (export, value) in &self.exports {
            if let Some(missing) = value
                .dependencies()
                .iter()
                .find(|dep| !self.nodes.contains_key(*dep))
            {
                return Err(GraphError::DanglingReference {
                    referrer: format!("output {export}"),
                    reference: missing.clone(),
                });
            }
        }

        let order = dag.topological_order()?;
        let levels = dag.levels()?;

        tracing::debug!(
            "Validated stack {}: {} nodes, {} edges, {} waves",
            self.stack,
            dag.node_count(),
            dag.edge_count(),
            levels.len()
        );

        Ok(ValidatedGraph::new(
            self.stack,
            self.nodes,
            self.exports,
            dag,
            order,
            levels,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpolate;

    fn props() -> Properties {
        Properties::new()
    }

    #[test]
    fn declare_assigns_handles() {
        let mut builder = GraphBuilder::new("test");
        let role = builder.declare("lambdaRole", "aws:iam/role:Role", props()).unwrap();
        assert_eq!(role.name().as_str(), "lambdaRole");
        assert_eq!(builder.node_count(), 1);
        assert!(builder.contains("lambdaRole"));
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut builder = GraphBuilder::new("test");
        builder.declare("route", "t", props()).unwrap();
        assert!(matches!(
            builder.declare("route", "t", props()),
            Err(GraphError::DuplicateName(_))
        ));
    }

    #[test]
    fn rejects_invalid_names() {
        let mut builder = GraphBuilder::new("test");
        assert!(matches!(
            builder.declare("", "t", props()),
            Err(GraphError::InvalidName { .. })
        ));
    }

    #[test]
    fn handle_references_become_edges() {
        let mut builder = GraphBuilder::new("test");
        let role = builder.declare("role", "t", props()).unwrap();
        builder
            .declare("function", "t", props().set("role", role.output::<String>("arn")))
            .unwrap();
        let graph = builder.build().unwrap();
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.dependencies_of("function"), vec![role.name().clone()]);
    }

    #[test]
    fn dangling_reference_fails_build() {
        let mut builder = GraphBuilder::new("test");
        builder.declare("role", "t", props()).unwrap();
        let typo = Output::<String>::attribute(NodeName::new("rol").unwrap(), "arn");
        builder.declare("function", "t", props().set("role", typo)).unwrap();
        match builder.build() {
            Err(GraphError::DanglingReference { referrer, reference }) => {
                assert_eq!(referrer, "function");
                assert_eq!(reference.as_str(), "rol");
            }
            other => panic!("expected dangling reference, got {other:?}"),
        }
    }

    #[test]
    fn dangling_explicit_dependency_fails_build() {
        let mut builder = GraphBuilder::new("test");
        let options = DeclareOptions {
            depends_on: vec![NodeName::new("ghost").unwrap()],
            ..DeclareOptions::default()
        };
        builder.declare_with("a", "t", props(), options).unwrap();
        assert!(builder.build().unwrap_err().is_dangling());
    }

    #[test]
    fn dangling_export_fails_build() {
        let mut builder = GraphBuilder::new("test");
        builder
            .export("url", Output::<String>::attribute(NodeName::new("api").unwrap(), "apiEndpoint"))
            .unwrap();
        match builder.build() {
            Err(GraphError::DanglingReference { referrer, .. }) => assert_eq!(referrer, "output url"),
            other => panic!("expected dangling export, got {other:?}"),
        }
    }

    #[test]
    fn forward_references_forming_a_cycle_fail_build() {
        let mut builder = GraphBuilder::new("test");
        let b_id = Output::<String>::attribute(NodeName::new("b").unwrap(), "id");
        let a = builder.declare("a", "t", props().set("peer", b_id)).unwrap();
        builder
            .declare("b", "t", props().set("peer", interpolate!("x/{}", a.id())))
            .unwrap();
        assert!(builder.build().unwrap_err().is_cycle());
    }

    #[test]
    fn forward_reference_without_cycle_is_ordered() {
        let mut builder = GraphBuilder::new("test");
        let later = Output::<String>::attribute(NodeName::new("later").unwrap(), "id");
        builder.declare("early", "t", props().set("ref", later)).unwrap();
        builder.declare("later", "t", props()).unwrap();
        let graph = builder.build().unwrap();
        let order: Vec<_> = graph.topological_order().iter().map(NodeName::as_str).collect();
        assert_eq!(order, ["later", "early"]);
    }

    #[test]
    fn duplicate_export_is_rejected() {
        let mut builder = GraphBuilder::new("test");
        builder.export("url", Output::known(1)).unwrap();
        assert!(matches!(
            builder.export("url", Output::known(2)),
            Err(GraphError::DuplicateExport(_))
        ));
    }
}
