//! Provider seam
//!
//! A provider performs the remote create/update/delete calls for one
//! resource at a time. The engine never talks to a cloud API directly.

use crate::error::ProviderError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use skyline_graph::{NodeName, ResourceType};

/// Live resource as reported by a provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderResource {
    /// Provider-assigned id
    pub id: String,
    /// Attributes only known after provisioning (ARNs, endpoints, ...)
    pub outputs: Map<String, Value>,
}

impl ProviderResource {
    /// Create new provider resource
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outputs: Map::new(),
        }
    }

    /// With an output attribute
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }
}

/// Remote resource operations
///
/// Implementations must be safe to call concurrently for independent
/// resources: the engine applies each wave of the graph in parallel.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Create a resource from fully resolved inputs
    async fn create(
        &self,
        name: &NodeName,
        resource_type: &ResourceType,
        inputs: &Map<String, Value>,
    ) -> Result<ProviderResource, ProviderError>;

    /// Update a resource in place
    async fn update(
        &self,
        name: &NodeName,
        resource_type: &ResourceType,
        id: &str,
        old_inputs: &Map<String, Value>,
        new_inputs: &Map<String, Value>,
    ) -> Result<ProviderResource, ProviderError>;

    /// Delete a resource
    async fn delete(
        &self,
        name: &NodeName,
        resource_type: &ResourceType,
        id: &str,
    ) -> Result<(), ProviderError>;

    /// Input keys whose change forces a replacement
    fn replace_keys(&self, resource_type: &ResourceType) -> &'static [&'static str] {
        let _ = resource_type;
        &[]
    }
}
