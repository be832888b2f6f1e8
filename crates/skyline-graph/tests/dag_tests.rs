use pretty_assertions::assert_eq;
use proptest::prelude::*;
use skyline_graph::{GraphBuilder, GraphError, NodeName, Output, Properties};
use std::collections::HashMap;

fn node(i: usize) -> String {
    format!("n{i}")
}

/// Declare `count` nodes where each edge `(a, b)` with `a < b` makes `b`
/// reference `a`. Returns the builder and the accepted edges.
fn forward_graph(count: usize, edges: &[(usize, usize)]) -> (GraphBuilder, Vec<(String, String)>) {
    let mut builder = GraphBuilder::new("prop");
    let mut accepted = Vec::new();
    for i in 0..count {
        let mut props = Properties::new();
        for (k, &(a, b)) in edges.iter().enumerate() {
            if b == i && a < b {
                let dep = Output::<String>::attribute(NodeName::new(node(a)).unwrap(), "id");
                props = props.set(format!("ref{k}"), dep);
                accepted.push((node(a), node(b)));
            }
        }
        builder.declare(&node(i), "test:node", props).unwrap();
    }
    (builder, accepted)
}

proptest! {
    #[test]
    fn prop_topological_order_respects_every_edge(
        count in 1..20usize,
        edges in proptest::collection::vec((0..20usize, 0..20usize), 0..60)
    ) {
        let edges: Vec<_> = edges.into_iter().filter(|&(a, b)| a < count && b < count).collect();
        let (builder, accepted) = forward_graph(count, &edges);
        let graph = builder.build().unwrap();

        let position: HashMap<&str, usize> = graph
            .topological_order()
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        prop_assert_eq!(position.len(), count);
        for (from, to) in &accepted {
            prop_assert!(position[from.as_str()] < position[to.as_str()]);
        }
    }

    #[test]
    fn prop_levels_place_dependencies_in_earlier_waves(
        count in 1..15usize,
        edges in proptest::collection::vec((0..15usize, 0..15usize), 0..40)
    ) {
        let edges: Vec<_> = edges.into_iter().filter(|&(a, b)| a < count && b < count).collect();
        let (builder, accepted) = forward_graph(count, &edges);
        let graph = builder.build().unwrap();

        let wave: HashMap<&str, usize> = graph
            .levels()
            .iter()
            .enumerate()
            .flat_map(|(i, level)| level.iter().map(move |n| (n.as_str(), i)))
            .collect();
        for (from, to) in &accepted {
            prop_assert!(wave[from.as_str()] < wave[to.as_str()]);
        }
    }

    #[test]
    fn prop_back_edge_closes_a_cycle(count in 2..12usize) {
        // chain n0 <- n1 <- ... plus n0 referencing the last node
        let mut builder = GraphBuilder::new("prop");
        let last = NodeName::new(node(count - 1)).unwrap();
        for i in 0..count {
            let props = if i == 0 {
                Properties::new().set("back", Output::<String>::attribute(last.clone(), "id"))
            } else {
                Properties::new().set("prev", Output::<String>::attribute(NodeName::new(node(i - 1)).unwrap(), "id"))
            };
            builder.declare(&node(i), "test:node", props).unwrap();
        }
        match builder.build() {
            Err(GraphError::CycleDetected { cycle }) => prop_assert_eq!(cycle.len(), count),
            other => prop_assert!(false, "expected cycle, got {:?}", other),
        }
    }
}

#[test]
fn test_diamond_orders_shared_dependency_first() {
    let mut builder = GraphBuilder::new("test");
    let api = builder.declare("api", "t", Properties::new()).unwrap();
    let stage = builder
        .declare("stage", "t", Properties::new().set("apiId", api.id()))
        .unwrap();
    let route = builder
        .declare("route", "t", Properties::new().set("apiId", api.id()))
        .unwrap();
    builder
        .declare(
            "deployment",
            "t",
            Properties::new()
                .set("stage", stage.id())
                .set("route", route.id()),
        )
        .unwrap();

    let graph = builder.build().unwrap();
    let order: Vec<_> = graph.topological_order().iter().map(NodeName::as_str).collect();
    assert_eq!(order, vec!["api", "stage", "route", "deployment"]);
    assert_eq!(graph.levels().len(), 3);
    assert_eq!(graph.transitive_dependents("api").len(), 3);
}

#[test]
fn test_build_rejects_self_reference() {
    let mut builder = GraphBuilder::new("test");
    let me = Output::<String>::attribute(NodeName::new("loop").unwrap(), "id");
    builder
        .declare("loop", "t", Properties::new().set("me", me))
        .unwrap();
    let err = builder.build().unwrap_err();
    assert_eq!(
        err,
        GraphError::CycleDetected {
            cycle: vec![NodeName::new("loop").unwrap()]
        }
    );
}

#[test]
fn test_exports_resolve_from_graph() {
    let mut builder = GraphBuilder::new("test");
    let api = builder.declare("httpApi", "t", Properties::new()).unwrap();
    builder
        .export("url", api.output::<String>("apiEndpoint"))
        .unwrap();
    let graph = builder.build().unwrap();
    let exports: Vec<_> = graph.exports().map(|(name, _)| name).collect();
    assert_eq!(exports, vec!["url"]);
    assert!(graph.to_dot().contains("\"httpApi\";"));
}
