//! Recorded deployment state
//!
//! The state record maps every declared node name to the live resource the
//! provider created for it. It is the only input to diffing besides the
//! declared graph, and the source deferred values resolve against.

use crate::error::StateError;
use crate::journal::Journal;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use skyline_graph::{AttributeSource, DependencyDag, NodeName, ResolveError, ResourceType};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Live resource recorded for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceState {
    /// Provider type token
    pub resource_type: ResourceType,
    /// Provider-assigned id
    pub id: String,
    /// Inputs the resource was last applied with
    pub inputs: Map<String, Value>,
    /// Attributes reported by the provider
    pub outputs: Map<String, Value>,
    /// Nodes this resource depended on when applied
    pub dependencies: Vec<NodeName>,
    /// When the resource was created
    pub created_at: DateTime<Utc>,
    /// When the resource was last changed
    pub updated_at: DateTime<Utc>,
}

/// Resource superseded by a replacement, deleted once its dependents moved
/// to the new one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDelete {
    /// Node the resource belonged to
    pub name: NodeName,
    /// The superseded resource
    pub resource: ResourceState,
}

/// Kind of the last update run against a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    /// Apply of a declared graph
    Apply,
    /// Teardown of every resource
    Destroy,
}

/// Summary of the last update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    /// Update id
    pub id: Uuid,
    /// Apply or destroy
    pub kind: UpdateKind,
    /// When the update finished
    pub finished_at: DateTime<Utc>,
    /// Whether every node succeeded
    pub succeeded: bool,
}

/// State of one stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
    /// Stack name
    pub stack: String,
    /// Incremented on every update
    pub serial: u64,
    /// Last finished update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<UpdateInfo>,
    /// Live resources keyed by node name, in the order they were recorded
    pub resources: IndexMap<NodeName, ResourceState>,
    /// Replaced resources still awaiting deletion
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_deletes: Vec<PendingDelete>,
    /// Resolved stack outputs
    pub outputs: BTreeMap<String, Value>,
    /// Hash-chained log of provider mutations
    #[serde(default)]
    pub journal: Journal,
}

impl StateRecord {
    /// Empty state for a stack
    #[must_use]
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            serial: 0,
            last_update: None,
            resources: IndexMap::new(),
            pending_deletes: Vec::new(),
            outputs: BTreeMap::new(),
            journal: Journal::new(),
        }
    }

    /// Recorded resource for a node
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceState> {
        self.resources.get(name)
    }

    /// Number of live resources
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether no resource is recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Number of live resources of one type
    #[must_use]
    pub fn count_of(&self, resource_type: &str) -> usize {
        self.resources
            .values()
            .filter(|r| r.resource_type == resource_type)
            .count()
    }

    /// Recorded resources that depend on `name`
    #[must_use]
    pub fn dependents_of(&self, name: &NodeName) -> Vec<NodeName> {
        self.resources
            .iter()
            .filter(|(_, r)| r.dependencies.contains(name))
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Safe teardown order: every resource before the ones it depends on
    #[must_use]
    pub fn deletion_order(&self) -> Vec<NodeName> {
        let mut dag = DependencyDag::new();
        for name in self.resources.keys() {
            dag.add_node(name.clone());
        }
        for (name, resource) in &self.resources {
            for dep in &resource.dependencies {
                if self.resources.contains_key(dep) {
                    let _ = dag.add_edge(dep, name);
                }
            }
        }
        let mut order = dag
            .topological_order()
            .unwrap_or_else(|_| self.resources.keys().cloned().collect());
        order.reverse();
        order
    }

    /// Record a created or updated resource
    pub(crate) fn record(
        &mut self,
        name: NodeName,
        resource_type: ResourceType,
        id: String,
        inputs: Map<String, Value>,
        outputs: Map<String, Value>,
        dependencies: Vec<NodeName>,
    ) {
        let now = Utc::now();
        let created_at = self
            .resources
            .get(&name)
            .filter(|r| r.id == id)
            .map_or(now, |r| r.created_at);
        self.resources.insert(
            name,
            ResourceState {
                resource_type,
                id,
                inputs,
                outputs,
                dependencies,
                created_at,
                updated_at: now,
            },
        );
    }

    /// Forget a deleted resource
    pub(crate) fn remove(&mut self, name: &NodeName) -> Option<ResourceState> {
        self.resources.shift_remove(name)
    }

    /// Queue a superseded resource for deletion
    pub(crate) fn retire(&mut self, name: NodeName, resource: ResourceState) {
        self.pending_deletes.push(PendingDelete { name, resource });
    }

    /// Forget a pending deletion once the provider removed it
    pub(crate) fn forget_pending(&mut self, name: &NodeName, id: &str) {
        self.pending_deletes
            .retain(|p| !(p.name == *name && p.resource.id == id));
    }
}

impl AttributeSource for StateRecord {
    fn attribute(&self, node: &NodeName, attribute: &str) -> Result<Value, ResolveError> {
        let resource = self.resources.get(node).ok_or_else(|| ResolveError::Unknown {
            node: node.clone(),
            attribute: attribute.to_owned(),
        })?;
        if attribute == "id" {
            return Ok(Value::String(resource.id.clone()));
        }
        resource
            .outputs
            .get(attribute)
            .or_else(|| resource.inputs.get(attribute))
            .cloned()
            .ok_or_else(|| ResolveError::MissingAttribute {
                node: node.clone(),
                attribute: attribute.to_owned(),
            })
    }
}

/// Persistence for state records
pub trait StateStore: Send + Sync {
    /// Load the state of a stack, `None` if it was never applied
    ///
    /// # Errors
    /// [`StateError`] if the stored record cannot be read.
    fn load(&self, stack: &str) -> Result<Option<StateRecord>, StateError>;

    /// Persist a state record
    ///
    /// # Errors
    /// [`StateError`] if the record cannot be written.
    fn save(&self, state: &StateRecord) -> Result<(), StateError>;

    /// Load the state of a stack or start an empty one
    ///
    /// # Errors
    /// [`StateError`] if the stored record cannot be read.
    fn load_or_new(&self, stack: &str) -> Result<StateRecord, StateError> {
        Ok(self.load(stack)?.unwrap_or_else(|| StateRecord::new(stack)))
    }
}

/// JSON files, one per stack, under a directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Create new file store rooted at `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the state files
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of one stack's state file
    #[must_use]
    pub fn path_for(&self, stack: &str) -> PathBuf {
        self.dir.join(format!("{stack}.json"))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StateError + '_ {
    move |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl StateStore for FileStateStore {
    fn load(&self, stack: &str) -> Result<Option<StateRecord>, StateError> {
        let path = self.path_for(stack);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    fn save(&self, state: &StateRecord) -> Result<(), StateError> {
        std::fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;
        let path = self.path_for(&state.stack);
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(state)?;
        std::fs::write(&tmp, text).map_err(io_error(&tmp))?;
        std::fs::rename(&tmp, &path).map_err(io_error(&path))?;
        tracing::debug!("Saved state for {} (serial {}) to {}", state.stack, state.serial, path.display());
        Ok(())
    }
}

/// In-memory store for tests and previews
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<String, StateRecord>>,
}

impl MemoryStateStore {
    /// Create new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, stack: &str) -> Result<Option<StateRecord>, StateError> {
        Ok(self.records.lock().get(stack).cloned())
    }

    fn save(&self, state: &StateRecord) -> Result<(), StateError> {
        self.records.lock().insert(state.stack.clone(), state.clone());
        Ok(())
    }
}
