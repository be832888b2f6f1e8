//! Testing utilities for the Skyline workspace
//!
//! Shared providers and graph fixtures for engine-level tests.

#![allow(missing_docs)]

use parking_lot::Mutex;
use serde_json::{Map, Value};
use skyline_engine::{Provider, ProviderError, ProviderResource};
use skyline_graph::{DeclareOptions, GraphBuilder, NodeName, Output, Properties, ResourceType, ValidatedGraph};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCall {
    pub kind: CallKind,
    pub name: NodeName,
    pub resource_type: ResourceType,
    pub inputs: Map<String, Value>,
}

/// Provider that records every call, assigns `{name}-{n}` ids and can be
/// told to fail named nodes. Outputs echo the inputs plus an `arn`.
#[derive(Debug, Default)]
pub struct RecordingProvider {
    calls: Mutex<Vec<ProviderCall>>,
    failures: Mutex<HashMap<String, ProviderError>>,
    replace_keys: Mutex<HashMap<String, &'static [&'static str]>>,
    counter: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Option<Duration>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep inside every call so concurrent calls overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_replace_keys(self, resource_type: &str, keys: &'static [&'static str]) -> Self {
        self.replace_keys.lock().insert(resource_type.to_owned(), keys);
        self
    }

    pub fn fail(&self, name: &str, error: ProviderError) {
        self.failures.lock().insert(name.to_owned(), error);
    }

    pub fn heal(&self, name: &str) {
        self.failures.lock().remove(name);
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_of(&self, kind: CallKind) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.name.to_string())
            .collect()
    }

    /// Highest number of calls that were running at the same time
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(
        &self,
        kind: CallKind,
        name: &NodeName,
        resource_type: &ResourceType,
        inputs: &Map<String, Value>,
    ) -> Result<u64, ProviderError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().push(ProviderCall {
            kind,
            name: name.clone(),
            resource_type: resource_type.clone(),
            inputs: inputs.clone(),
        });
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.failures.lock().get(name.as_str()) {
            return Err(error.clone());
        }
        Ok(self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait::async_trait]
impl Provider for RecordingProvider {
    async fn create(
        &self,
        name: &NodeName,
        resource_type: &ResourceType,
        inputs: &Map<String, Value>,
    ) -> Result<ProviderResource, ProviderError> {
        let n = self.enter(CallKind::Create, name, resource_type, inputs).await?;
        let mut resource = ProviderResource::new(format!("{name}-{n}"));
        resource.outputs = inputs.clone();
        Ok(resource.with_output("arn", format!("arn:test:{name}-{n}")))
    }

    async fn update(
        &self,
        name: &NodeName,
        resource_type: &ResourceType,
        id: &str,
        _old_inputs: &Map<String, Value>,
        new_inputs: &Map<String, Value>,
    ) -> Result<ProviderResource, ProviderError> {
        self.enter(CallKind::Update, name, resource_type, new_inputs).await?;
        let mut resource = ProviderResource::new(id);
        resource.outputs = new_inputs.clone();
        Ok(resource.with_output("arn", format!("arn:test:{id}")))
    }

    async fn delete(
        &self,
        name: &NodeName,
        resource_type: &ResourceType,
        _id: &str,
    ) -> Result<(), ProviderError> {
        self.enter(CallKind::Delete, name, resource_type, &Map::new())
            .await
            .map(|_| ())
    }

    fn replace_keys(&self, resource_type: &ResourceType) -> &'static [&'static str] {
        self.replace_keys
            .lock()
            .get(resource_type.as_str())
            .copied()
            .unwrap_or(&[])
    }
}

/// Builder for small test graphs where every node exposes `id` and `arn`
pub struct TestGraph {
    builder: GraphBuilder,
}

impl TestGraph {
    pub fn new(stack: &str) -> Self {
        Self {
            builder: GraphBuilder::new(stack),
        }
    }

    /// Declare `name`, referencing the `arn` of every node in `deps`
    pub fn node(self, name: &str, deps: &[&str]) -> Self {
        self.node_with(name, deps, "v1")
    }

    /// Declare `name` with a `version` property
    pub fn node_with(self, name: &str, deps: &[&str], version: &str) -> Self {
        self.node_with_options(name, deps, version, DeclareOptions::default())
    }

    /// Declare `name` with a `version` property and declaration options
    pub fn node_with_options(
        mut self,
        name: &str,
        deps: &[&str],
        version: &str,
        options: DeclareOptions,
    ) -> Self {
        let mut props = Properties::new().set("version", Output::<String>::from(version));
        for dep in deps {
            let dep_name = NodeName::new(*dep).expect("valid test node name");
            props = props.set(format!("{dep}Arn"), Output::<String>::attribute(dep_name, "arn"));
        }
        self.builder
            .declare_with(name, "test:node", props, options)
            .expect("unique test node name");
        self
    }

    pub fn export(mut self, name: &str, node: &str) -> Self {
        let node = NodeName::new(node).expect("valid test node name");
        self.builder
            .export(name, Output::<String>::attribute(node, "arn"))
            .expect("unique export");
        self
    }

    pub fn build(self) -> ValidatedGraph {
        self.builder.build().expect("valid test graph")
    }
}

/// api <- stage, api <- integration <- route, plus an independent role
pub fn create_test_graph() -> ValidatedGraph {
    TestGraph::new("test")
        .node("role", &[])
        .node("api", &[])
        .node("stage", &["api"])
        .node("integration", &["api", "role"])
        .node("route", &["api", "integration"])
        .export("endpoint", "api")
        .build()
}
