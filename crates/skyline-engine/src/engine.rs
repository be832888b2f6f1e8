//! Provisioning engine
//!
//! Reconciles a [`ValidatedGraph`] against a [`StateRecord`] through a
//! [`Provider`]:
//!
//! 1. Waves of the topological order run one after another; nodes inside a
//!    wave are independent and run concurrently up to `parallelism`.
//! 2. A node resolves its inputs against live state only once every
//!    upstream node finished, then diffs them against its recorded inputs.
//! 3. A failing node is reported with the provider message; its dependents
//!    are skipped while independent branches continue.
//! 4. Recorded resources that are no longer declared are deleted last,
//!    dependents first.

use crate::config::SkylineConfig;
use crate::error::{EngineError, NodeFailure, ProviderError, ProviderErrorKind};
use crate::plan::{classify, diff_keys, Plan, Step, StepKind};
use crate::provider::Provider;
use crate::state::{PendingDelete, ResourceState, StateRecord, UpdateInfo, UpdateKind};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use skyline_graph::{AttributeSource, NodeDecl, NodeName, ResolveError, ValidatedGraph};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// What happened to one node during an apply or destroy
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// The planned step completed
    Applied {
        /// Step that was performed
        kind: StepKind,
    },
    /// The node failed; recorded state for it is unchanged unless a
    /// replacement already deleted the old resource
    Failed {
        /// Step that was attempted, if one was decided
        kind: Option<StepKind>,
        /// Cause
        error: NodeFailure,
    },
    /// Not attempted because an upstream node did not succeed
    Skipped {
        /// Nodes that blocked this one
        blocked_by: Vec<NodeName>,
    },
}

impl NodeOutcome {
    /// Whether the node reached its desired state
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    /// Step performed, if the node succeeded
    #[must_use]
    pub fn applied_kind(&self) -> Option<StepKind> {
        match self {
            Self::Applied { kind } => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied { kind } => write!(f, "{kind}"),
            Self::Failed { kind: Some(kind), error } => write!(f, "{kind} failed: {error}"),
            Self::Failed { kind: None, error } => write!(f, "failed: {error}"),
            Self::Skipped { blocked_by } => {
                let names: Vec<&str> = blocked_by.iter().map(NodeName::as_str).collect();
                write!(f, "skipped (blocked by {})", names.join(", "))
            }
        }
    }
}

/// Result of an apply or destroy
#[derive(Debug, Clone)]
pub struct ApplyReport {
    /// Update id, also stamped on journal entries
    pub update_id: Uuid,
    /// Per-node outcomes: declared nodes in topological order, then deletions
    pub outcomes: IndexMap<NodeName, NodeOutcome>,
    /// Stack outputs that resolved
    pub outputs: BTreeMap<String, Value>,
    /// Stack outputs that could not be resolved
    pub unresolved_outputs: Vec<String>,
    /// State after the update, reflecting exactly the progress made
    pub state: StateRecord,
}

impl ApplyReport {
    /// Whether every node succeeded
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcomes.values().all(NodeOutcome::is_success)
    }

    /// Outcome for one node
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&NodeOutcome> {
        self.outcomes.get(name)
    }

    /// Failed nodes with their cause
    pub fn failures(&self) -> impl Iterator<Item = (&NodeName, &NodeFailure)> + '_ {
        self.outcomes.iter().filter_map(|(name, outcome)| match outcome {
            NodeOutcome::Failed { error, .. } => Some((name, error)),
            _ => None,
        })
    }

    /// Skipped nodes
    pub fn skipped(&self) -> impl Iterator<Item = &NodeName> + '_ {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, NodeOutcome::Skipped { .. }))
            .map(|(name, _)| name)
    }

    /// Number of nodes that completed a step of this kind
    #[must_use]
    pub fn count(&self, kind: StepKind) -> usize {
        self.outcomes
            .values()
            .filter(|o| o.applied_kind() == Some(kind))
            .count()
    }

    /// Whether nothing was changed
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.outcomes
            .values()
            .all(|o| o.applied_kind() == Some(StepKind::Same))
    }
}

/// Resolves like the state record, except for nodes the plan changes
///
/// Nodes about to be created or replaced are unknown. Nodes updated in place
/// keep their id and expose their new known inputs; any other attribute of
/// theirs is unknown until the provider reports it.
struct PreviewSource<'a> {
    state: &'a StateRecord,
    pending: &'a HashSet<NodeName>,
    updated: &'a HashMap<NodeName, Map<String, Value>>,
}

impl AttributeSource for PreviewSource<'_> {
    fn attribute(&self, node: &NodeName, attribute: &str) -> Result<Value, ResolveError> {
        let unknown = || ResolveError::Unknown {
            node: node.clone(),
            attribute: attribute.to_owned(),
        };
        if self.pending.contains(node) {
            return Err(unknown());
        }
        if let Some(inputs) = self.updated.get(node) {
            if attribute == "id" {
                return self.state.attribute(node, attribute);
            }
            return inputs.get(attribute).cloned().ok_or_else(unknown);
        }
        self.state.attribute(node, attribute)
    }
}

/// Something to delete once the declared nodes are applied
enum Retiring {
    /// Recorded under a name that is no longer declared
    Orphan(NodeName, Vec<NodeName>),
    /// Superseded by a replacement
    Superseded(PendingDelete),
}

impl Retiring {
    fn name(&self) -> &NodeName {
        match self {
            Self::Orphan(name, _) => name,
            Self::Superseded(pending) => &pending.name,
        }
    }

    fn dependencies(&self) -> &[NodeName] {
        match self {
            Self::Orphan(_, deps) => deps,
            Self::Superseded(pending) => &pending.resource.dependencies,
        }
    }
}

/// Orphans and superseded resources in an order where nothing is deleted
/// while another queued resource still depends on its name
fn retirement_order(state: &StateRecord, graph: Option<&ValidatedGraph>) -> Vec<Retiring> {
    let declared = |name: &NodeName| graph.is_some_and(|g| g.contains(name.as_str()));
    let position: HashMap<&NodeName, usize> = graph
        .map(|g| g.topological_order().iter().enumerate().map(|(i, n)| (n, i)).collect())
        .unwrap_or_default();

    let mut queue: Vec<Retiring> = state
        .deletion_order()
        .into_iter()
        .filter(|name| !declared(name))
        .filter_map(|name| {
            let deps = state.resource(name.as_str())?.dependencies.clone();
            Some(Retiring::Orphan(name, deps))
        })
        .collect();
    let mut superseded = state.pending_deletes.clone();
    superseded.sort_by_key(|p| std::cmp::Reverse(position.get(&p.name).copied()));
    queue.extend(superseded.into_iter().map(Retiring::Superseded));

    let mut ordered = Vec::with_capacity(queue.len());
    while !queue.is_empty() {
        let next = (0..queue.len())
            .find(|&i| {
                let name = queue[i].name();
                !queue
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != i && other.dependencies().contains(name))
            })
            .unwrap_or(0);
        ordered.push(queue.remove(next));
    }
    ordered
}

/// Provisioning engine
pub struct Engine {
    provider: Arc<dyn Provider>,
    parallelism: usize,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create new engine over a provider
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            parallelism: SkylineConfig::default().parallelism,
        }
    }

    /// Create an engine using the configured parallelism
    #[must_use]
    pub fn from_config(provider: Arc<dyn Provider>, config: &SkylineConfig) -> Self {
        Self::new(provider).with_parallelism(config.parallelism)
    }

    /// With maximum concurrent nodes per wave
    #[inline]
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Maximum concurrent nodes per wave
    #[inline]
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Compute the steps an apply would take, without provider calls
    #[must_use]
    pub fn preview(&self, graph: &ValidatedGraph, state: &StateRecord) -> Plan {
        let mut pending: HashSet<NodeName> = HashSet::new();
        let mut updated: HashMap<NodeName, Map<String, Value>> = HashMap::new();
        let mut steps = Vec::with_capacity(graph.node_count());

        for name in graph.topological_order() {
            let Some(decl) = graph.node(name.as_str()) else {
                continue;
            };
            let partial = decl.properties.resolve_partial(&PreviewSource {
                state,
                pending: &pending,
                updated: &updated,
            });

            let (kind, changed) = match state.resource(name.as_str()) {
                None => (StepKind::Create, Vec::new()),
                Some(prior) => {
                    let changed = diff_keys(&prior.inputs, &partial.known);
                    let kind = classify(
                        &changed,
                        self.provider.replace_keys(&decl.resource_type),
                        prior.resource_type != decl.resource_type,
                    );
                    (kind, changed)
                }
            };
            match kind {
                StepKind::Create | StepKind::Replace => {
                    pending.insert(name.clone());
                }
                StepKind::Update => {
                    updated.insert(name.clone(), partial.known.clone());
                }
                StepKind::Same | StepKind::Delete => {}
            }
            steps.push(Step {
                name: name.clone(),
                resource_type: decl.resource_type.clone(),
                kind,
                changed,
                computed: partial.computed,
            });
        }

        for retiring in retirement_order(state, Some(graph)) {
            let step = match retiring {
                Retiring::Orphan(name, _) => state.resource(name.as_str()).map(|resource| Step {
                    resource_type: resource.resource_type.clone(),
                    name,
                    kind: StepKind::Delete,
                    changed: Vec::new(),
                    computed: Vec::new(),
                }),
                Retiring::Superseded(pending) => Some(Step {
                    name: pending.name,
                    resource_type: pending.resource.resource_type,
                    kind: StepKind::Delete,
                    changed: Vec::new(),
                    computed: Vec::new(),
                }),
            };
            steps.extend(step);
        }

        let plan = Plan {
            stack: graph.stack().to_owned(),
            steps,
        };
        tracing::info!("Preview of {}: {}", plan.stack, plan.summary());
        plan
    }

    /// Reconcile the declared graph against recorded state
    ///
    /// # Errors
    /// [`EngineError::StackMismatch`] if the state belongs to another stack,
    /// [`EngineError::JournalIntegrity`] if its journal was tampered with.
    /// Node failures are reported in the returned [`ApplyReport`].
    pub async fn apply(
        &self,
        graph: &ValidatedGraph,
        state: StateRecord,
    ) -> Result<ApplyReport, EngineError> {
        if state.stack != graph.stack() {
            return Err(EngineError::StackMismatch {
                expected: graph.stack().to_owned(),
                found: state.stack,
            });
        }
        state
            .journal
            .verify_integrity()
            .map_err(|sequence| EngineError::JournalIntegrity { sequence })?;

        let update_id = Uuid::new_v4();
        tracing::info!(
            "Applying stack {} (update {}): {} nodes in {} waves",
            graph.stack(),
            update_id,
            graph.node_count(),
            graph.levels().len()
        );

        let shared = Mutex::new(state);
        let mut done: HashMap<NodeName, NodeOutcome> = HashMap::with_capacity(graph.node_count());

        for (index, wave) in graph.levels().iter().enumerate() {
            tracing::debug!("Wave {}: {} nodes", index, wave.len());
            let results: Vec<(NodeName, NodeOutcome)> = stream::iter(
                wave.iter()
                    .filter_map(|name| graph.node(name.as_str()))
                    .map(|decl| self.apply_node(graph, decl, &shared, &done, update_id)),
            )
            .buffer_unordered(self.parallelism)
            .collect()
            .await;
            done.extend(results);
        }

        let mut outcomes = IndexMap::with_capacity(done.len());
        for name in graph.topological_order() {
            if let Some(outcome) = done.remove(name) {
                outcomes.insert(name.clone(), outcome);
            }
        }

        let retiring = retirement_order(&shared.lock(), Some(graph));
        for item in retiring {
            match item {
                Retiring::Orphan(name, _) => {
                    let outcome = self.delete_node(&name, &shared, update_id).await;
                    outcomes.insert(name, outcome);
                }
                Retiring::Superseded(pending) => {
                    let blocked = graph
                        .transitive_dependents(pending.name.as_str())
                        .into_iter()
                        .any(|dep| outcomes.get(&dep).is_some_and(|o| !o.is_success()));
                    if blocked {
                        tracing::warn!(
                            "Keeping superseded {} ({}): dependents did not move off it",
                            pending.name,
                            pending.resource.id
                        );
                        continue;
                    }
                    self.retire_superseded(pending, &shared, &mut outcomes, update_id)
                        .await;
                }
            }
        }

        let mut state = shared.into_inner();
        let mut outputs = BTreeMap::new();
        let mut unresolved_outputs = Vec::new();
        for (export, value) in graph.exports() {
            match value.resolve(&state) {
                Ok(resolved) => {
                    outputs.insert(export.to_owned(), resolved);
                }
                Err(e) => {
                    tracing::warn!("Output {} unresolved: {}", export, e);
                    unresolved_outputs.push(export.to_owned());
                }
            }
        }
        state.outputs.clone_from(&outputs);

        let report = finish(update_id, UpdateKind::Apply, outcomes, state, outputs, unresolved_outputs);
        tracing::info!(
            "Update {} finished: {} created, {} updated, {} replaced, {} deleted, {} failed",
            update_id,
            report.count(StepKind::Create),
            report.count(StepKind::Update),
            report.count(StepKind::Replace),
            report.count(StepKind::Delete),
            report.failures().count()
        );
        Ok(report)
    }

    /// Delete every recorded resource, dependents first
    ///
    /// # Errors
    /// [`EngineError::JournalIntegrity`] if the journal was tampered with.
    pub async fn destroy(&self, state: StateRecord) -> Result<ApplyReport, EngineError> {
        state
            .journal
            .verify_integrity()
            .map_err(|sequence| EngineError::JournalIntegrity { sequence })?;

        let update_id = Uuid::new_v4();
        tracing::info!("Destroying stack {} (update {}): {} resources", state.stack, update_id, state.len());

        let order = retirement_order(&state, None);
        let shared = Mutex::new(state);
        let mut outcomes = IndexMap::with_capacity(order.len());
        for item in order {
            match item {
                Retiring::Orphan(name, _) => {
                    let outcome = self.delete_node(&name, &shared, update_id).await;
                    outcomes.insert(name, outcome);
                }
                Retiring::Superseded(pending) => {
                    self.retire_superseded(pending, &shared, &mut outcomes, update_id)
                        .await;
                }
            }
        }

        let mut state = shared.into_inner();
        state.outputs.clear();
        Ok(finish(update_id, UpdateKind::Destroy, outcomes, state, BTreeMap::new(), Vec::new()))
    }

    async fn apply_node(
        &self,
        graph: &ValidatedGraph,
        decl: &NodeDecl,
        state: &Mutex<StateRecord>,
        done: &HashMap<NodeName, NodeOutcome>,
        update_id: Uuid,
    ) -> (NodeName, NodeOutcome) {
        let name = &decl.name;
        let blocked_by: Vec<NodeName> = graph
            .dependencies_of(name.as_str())
            .into_iter()
            .filter(|dep| done.get(dep).is_some_and(|o| !o.is_success()))
            .collect();
        if !blocked_by.is_empty() {
            tracing::warn!("Skipping {}: upstream nodes did not succeed", name);
            return (name.clone(), NodeOutcome::Skipped { blocked_by });
        }

        let resolved = {
            let guard = state.lock();
            decl.properties
                .resolve(&*guard)
                .map(|inputs| (inputs, guard.resource(name.as_str()).cloned()))
        };
        let (inputs, prior) = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!("Failed to resolve inputs of {}: {}", name, e);
                let outcome = NodeOutcome::Failed {
                    kind: None,
                    error: e.into(),
                };
                return (name.clone(), outcome);
            }
        };

        let kind = match &prior {
            None => StepKind::Create,
            Some(prior) => classify(
                &diff_keys(&prior.inputs, &inputs),
                self.provider.replace_keys(&decl.resource_type),
                prior.resource_type != decl.resource_type,
            ),
        };
        let dependencies: Vec<NodeName> = decl.dependencies().into_iter().collect();

        let result = match (kind, prior) {
            (StepKind::Same, _) => {
                if let Some(resource) = state.lock().resources.get_mut(name) {
                    resource.dependencies = dependencies;
                }
                Ok(())
            }
            (StepKind::Update, Some(prior)) => {
                self.update_resource(decl, &prior, inputs, dependencies, state, update_id)
                    .await
            }
            (StepKind::Replace, Some(prior)) if decl.delete_before_replace => {
                match self.delete_resource(name, &prior, state, update_id).await {
                    Ok(()) => {
                        self.create_resource(decl, inputs, dependencies, state, update_id)
                            .await
                    }
                    Err(e) => Err(e),
                }
            }
            (StepKind::Replace, Some(prior)) => {
                let created = self
                    .create_resource(decl, inputs, dependencies, state, update_id)
                    .await;
                if created.is_ok() {
                    tracing::info!("Replaced {}: {} awaits deletion", name, prior.id);
                    state.lock().retire(name.clone(), prior);
                }
                created
            }
            _ => {
                self.create_resource(decl, inputs, dependencies, state, update_id)
                    .await
            }
        };

        let outcome = match result {
            Ok(()) => NodeOutcome::Applied { kind },
            Err(e) => {
                tracing::error!("Failed to {} {}: {}", kind, name, e);
                NodeOutcome::Failed {
                    kind: Some(kind),
                    error: e.into(),
                }
            }
        };
        (name.clone(), outcome)
    }

    async fn create_resource(
        &self,
        decl: &NodeDecl,
        inputs: Map<String, Value>,
        dependencies: Vec<NodeName>,
        state: &Mutex<StateRecord>,
        update_id: Uuid,
    ) -> Result<(), ProviderError> {
        let result = self
            .provider
            .create(&decl.name, &decl.resource_type, &inputs)
            .await;
        journal(state, update_id, &decl.name, "create", &result);
        let resource = result?;

        tracing::info!("Created {} ({}) as {}", decl.name, decl.resource_type, resource.id);
        state.lock().record(
            decl.name.clone(),
            decl.resource_type.clone(),
            resource.id,
            inputs,
            resource.outputs,
            dependencies,
        );
        Ok(())
    }

    async fn update_resource(
        &self,
        decl: &NodeDecl,
        prior: &ResourceState,
        inputs: Map<String, Value>,
        dependencies: Vec<NodeName>,
        state: &Mutex<StateRecord>,
        update_id: Uuid,
    ) -> Result<(), ProviderError> {
        let result = self
            .provider
            .update(&decl.name, &decl.resource_type, &prior.id, &prior.inputs, &inputs)
            .await;
        journal(state, update_id, &decl.name, "update", &result);
        let resource = result?;

        tracing::info!("Updated {} ({})", decl.name, resource.id);
        state.lock().record(
            decl.name.clone(),
            decl.resource_type.clone(),
            resource.id,
            inputs,
            resource.outputs,
            dependencies,
        );
        Ok(())
    }

    /// Provider delete, journaled; a resource that is already gone counts
    async fn provider_delete(
        &self,
        name: &NodeName,
        resource: &ResourceState,
        state: &Mutex<StateRecord>,
        update_id: Uuid,
    ) -> Result<(), ProviderError> {
        let result = self
            .provider
            .delete(name, &resource.resource_type, &resource.id)
            .await;
        journal(state, update_id, name, "delete", &result);
        match result {
            Ok(()) => tracing::info!("Deleted {} ({})", name, resource.id),
            Err(e) if e.kind == ProviderErrorKind::NotFound => {
                tracing::warn!("{} ({}) was already gone", name, resource.id);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn delete_resource(
        &self,
        name: &NodeName,
        resource: &ResourceState,
        state: &Mutex<StateRecord>,
        update_id: Uuid,
    ) -> Result<(), ProviderError> {
        self.provider_delete(name, resource, state, update_id).await?;
        state.lock().remove(name);
        Ok(())
    }

    /// Delete a superseded resource; a failure leaves it queued for the next
    /// update
    async fn retire_superseded(
        &self,
        pending: PendingDelete,
        state: &Mutex<StateRecord>,
        outcomes: &mut IndexMap<NodeName, NodeOutcome>,
        update_id: Uuid,
    ) {
        let PendingDelete { name, resource } = pending;
        match self.provider_delete(&name, &resource, state, update_id).await {
            Ok(()) => {
                state.lock().forget_pending(&name, &resource.id);
                outcomes.entry(name).or_insert(NodeOutcome::Applied {
                    kind: StepKind::Delete,
                });
            }
            Err(e) => {
                tracing::error!("Failed to delete superseded {} ({}): {}", name, resource.id, e);
                outcomes.insert(
                    name,
                    NodeOutcome::Failed {
                        kind: Some(StepKind::Delete),
                        error: e.into(),
                    },
                );
            }
        }
    }

    async fn delete_node(
        &self,
        name: &NodeName,
        state: &Mutex<StateRecord>,
        update_id: Uuid,
    ) -> NodeOutcome {
        let (resource, dependents) = {
            let guard = state.lock();
            (guard.resource(name.as_str()).cloned(), guard.dependents_of(name))
        };
        let Some(resource) = resource else {
            return NodeOutcome::Applied {
                kind: StepKind::Delete,
            };
        };
        if !dependents.is_empty() {
            tracing::warn!("Not deleting {}: still depended on", name);
            return NodeOutcome::Skipped {
                blocked_by: dependents,
            };
        }
        match self.delete_resource(name, &resource, state, update_id).await {
            Ok(()) => NodeOutcome::Applied {
                kind: StepKind::Delete,
            },
            Err(e) => {
                tracing::error!("Failed to delete {}: {}", name, e);
                NodeOutcome::Failed {
                    kind: Some(StepKind::Delete),
                    error: e.into(),
                }
            }
        }
    }
}

fn journal<T>(
    state: &Mutex<StateRecord>,
    update_id: Uuid,
    name: &NodeName,
    action: &str,
    result: &Result<T, ProviderError>,
) {
    let text = match result {
        Ok(_) => "ok".to_owned(),
        Err(e) => e.to_string(),
    };
    state.lock().journal.append(update_id, name, action, text);
}

fn finish(
    update_id: Uuid,
    kind: UpdateKind,
    outcomes: IndexMap<NodeName, NodeOutcome>,
    mut state: StateRecord,
    outputs: BTreeMap<String, Value>,
    unresolved_outputs: Vec<String>,
) -> ApplyReport {
    let succeeded = outcomes.values().all(NodeOutcome::is_success);
    state.serial += 1;
    state.last_update = Some(UpdateInfo {
        id: update_id,
        kind,
        finished_at: Utc::now(),
        succeeded,
    });
    ApplyReport {
        update_id,
        outcomes,
        outputs,
        unresolved_outputs,
        state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderResource;
    use serde_json::json;
    use skyline_graph::{GraphBuilder, Output, Properties};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Assigns `{name}-{n}` ids, echoes inputs as outputs, fails named nodes
    #[derive(Default)]
    struct EchoProvider {
        calls: AtomicUsize,
        failing: Mutex<HashSet<String>>,
    }

    impl EchoProvider {
        fn fail(&self, name: &str) {
            self.failing.lock().insert(name.to_owned());
        }

        fn check(&self, name: &NodeName) -> Result<usize, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.lock().contains(name.as_str()) {
                return Err(ProviderError::permission_denied(format!("{name} is not allowed")));
            }
            Ok(n)
        }
    }

    #[async_trait::async_trait]
    impl Provider for EchoProvider {
        async fn create(
            &self,
            name: &NodeName,
            _resource_type: &skyline_graph::ResourceType,
            inputs: &Map<String, Value>,
        ) -> Result<ProviderResource, ProviderError> {
            let n = self.check(name)?;
            Ok(ProviderResource {
                id: format!("{name}-{n}"),
                outputs: inputs.clone(),
            }
            .with_output("arn", format!("arn:test:{name}-{n}")))
        }

        async fn update(
            &self,
            name: &NodeName,
            _resource_type: &skyline_graph::ResourceType,
            id: &str,
            _old_inputs: &Map<String, Value>,
            new_inputs: &Map<String, Value>,
        ) -> Result<ProviderResource, ProviderError> {
            self.check(name)?;
            Ok(ProviderResource {
                id: id.to_owned(),
                outputs: new_inputs.clone(),
            })
        }

        async fn delete(
            &self,
            name: &NodeName,
            _resource_type: &skyline_graph::ResourceType,
            _id: &str,
        ) -> Result<(), ProviderError> {
            self.check(name).map(|_| ())
        }

        fn replace_keys(&self, _resource_type: &skyline_graph::ResourceType) -> &'static [&'static str] {
            &["name"]
        }
    }

    fn graph(size: &str) -> ValidatedGraph {
        let mut builder = GraphBuilder::new("dev");
        let role = builder.declare("role", "test:role", Properties::new()).unwrap();
        builder
            .declare(
                "function",
                "test:function",
                Properties::new()
                    .set("role", role.output::<String>("arn"))
                    .set("size", Output::<String>::from(size)),
            )
            .unwrap();
        builder.export("roleArn", role.output::<String>("arn")).unwrap();
        builder.build().unwrap()
    }

    fn engine() -> (Arc<EchoProvider>, Engine) {
        let provider = Arc::new(EchoProvider::default());
        let engine = Engine::new(provider.clone()).with_parallelism(2);
        (provider, engine)
    }

    #[tokio::test]
    async fn first_apply_creates_in_dependency_order() {
        let (_, engine) = engine();
        let report = engine.apply(&graph("small"), StateRecord::new("dev")).await.unwrap();
        assert!(report.succeeded());
        assert_eq!(report.count(StepKind::Create), 2);
        assert_eq!(report.outputs["roleArn"], json!("arn:test:role-0"));

        let function = report.state.resource("function").unwrap();
        assert_eq!(function.inputs["role"], json!("arn:test:role-0"));
        assert_eq!(report.state.serial, 1);
        assert_eq!(report.state.journal.len(), 2);
    }

    #[tokio::test]
    async fn second_apply_is_a_noop() {
        let (provider, engine) = engine();
        let first = engine.apply(&graph("small"), StateRecord::new("dev")).await.unwrap();
        let calls = provider.calls.load(Ordering::SeqCst);

        assert!(engine.preview(&graph("small"), &first.state).is_noop());
        let second = engine.apply(&graph("small"), first.state).await.unwrap();
        assert!(second.is_noop());
        assert_eq!(provider.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn changed_input_updates_in_place() {
        let (_, engine) = engine();
        let first = engine.apply(&graph("small"), StateRecord::new("dev")).await.unwrap();

        let plan = engine.preview(&graph("large"), &first.state);
        let step = plan.step("function").unwrap();
        assert_eq!(step.kind, StepKind::Update);
        assert_eq!(step.changed, vec!["size".to_string()]);

        let second = engine.apply(&graph("large"), first.state).await.unwrap();
        assert_eq!(second.outcome("function"), Some(&NodeOutcome::Applied { kind: StepKind::Update }));
        assert_eq!(second.state.resource("function").unwrap().inputs["size"], json!("large"));
    }

    #[tokio::test]
    async fn failure_skips_dependents_and_keeps_progress() {
        let (provider, engine) = engine();
        provider.fail("role");
        let report = engine.apply(&graph("small"), StateRecord::new("dev")).await.unwrap();

        assert!(!report.succeeded());
        let (failed, error) = report.failures().next().unwrap();
        assert_eq!(failed.as_str(), "role");
        assert!(error.to_string().contains("AccessDenied: role is not allowed"));
        assert_eq!(report.skipped().count(), 1);
        assert!(report.state.is_empty());
        assert_eq!(report.unresolved_outputs, vec!["roleArn".to_string()]);
        assert_eq!(report.state.last_update.as_ref().map(|u| u.succeeded), Some(false));
    }

    #[tokio::test]
    async fn preview_marks_downstream_values_computed() {
        let (_, engine) = engine();
        let plan = engine.preview(&graph("small"), &StateRecord::new("dev"));
        assert_eq!(plan.summary().create, 2);
        assert_eq!(plan.step("function").unwrap().computed, vec!["role".to_string()]);
    }

    #[tokio::test]
    async fn preview_sees_through_in_place_updates() {
        let tiered = |tier: &str| {
            let mut builder = GraphBuilder::new("dev");
            let role = builder
                .declare("role", "test:role", Properties::new().set("tier", Output::<String>::from(tier)))
                .unwrap();
            builder
                .declare(
                    "function",
                    "test:function",
                    Properties::new()
                        .set("role", role.output::<String>("arn"))
                        .set("tier", role.output::<String>("tier")),
                )
                .unwrap();
            builder.build().unwrap()
        };
        let (_, engine) = engine();
        let first = engine.apply(&tiered("basic"), StateRecord::new("dev")).await.unwrap();

        let plan = engine.preview(&tiered("premium"), &first.state);
        assert_eq!(plan.step("role").unwrap().kind, StepKind::Update);
        let function = plan.step("function").unwrap();
        assert_eq!(function.kind, StepKind::Update);
        assert_eq!(function.computed, vec!["role".to_string()]);
        assert!(function.changed.contains(&"tier".to_string()));
    }

    #[tokio::test]
    async fn stack_mismatch_is_rejected() {
        let (_, engine) = engine();
        let err = engine.apply(&graph("small"), StateRecord::new("prod")).await.unwrap_err();
        assert!(matches!(err, EngineError::StackMismatch { .. }));
    }

    #[tokio::test]
    async fn destroy_removes_everything() {
        let (_, engine) = engine();
        let applied = engine.apply(&graph("small"), StateRecord::new("dev")).await.unwrap();
        let destroyed = engine.destroy(applied.state).await.unwrap();
        let order: Vec<_> = destroyed.outcomes.keys().map(NodeName::as_str).collect();
        assert_eq!(order, ["function", "role"]);
        assert!(destroyed.state.is_empty());
        assert!(destroyed.state.outputs.is_empty());
        assert!(destroyed.state.journal.verify_integrity().is_ok());
    }
}
