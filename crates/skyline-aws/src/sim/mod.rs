//! In-memory stand-in for the AWS control plane
//!
//! [`SimulatedCloud`] keeps one table per resource type, validates inputs
//! the way the real services reject bad requests, and mints ids, ARNs and
//! endpoints deterministically from the configured seed. Its tables can be
//! snapshotted to JSON so a CLI session can pick up where the last one
//! stopped. [`SimulatedCloud::invoke`] routes an HTTP request through the
//! deployed API, route, integration and permission to a registered handler.

mod invoke;
mod store;

pub use invoke::{glob_match, FunctionHandler, HandlerError, HttpRequest, HttpResponse, InvokeError};
pub use store::StoredResource;

use crate::types::{
    API, FUNCTION, INTEGRATION, PERMISSION, ROLE, ROLE_POLICY_ATTACHMENT, ROUTE, STAGE,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use skyline_engine::{Provider, ProviderError, ProviderResource, SkylineConfig};
use skyline_graph::{NodeName, ResourceType};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use store::Cloud;

/// Serialisable copy of every table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudSnapshot {
    /// Region the resources live in
    pub region: String,
    /// Owning account
    pub account_id: String,
    /// Resources by type token then id
    pub resources: BTreeMap<String, BTreeMap<String, StoredResource>>,
}

impl CloudSnapshot {
    /// Number of live resources across all types
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.values().map(BTreeMap::len).sum()
    }

    /// Whether no resource is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Simulated AWS account in one region
pub struct SimulatedCloud {
    cloud: Mutex<Cloud>,
    resource_limit: usize,
    handlers: RwLock<HashMap<String, Arc<dyn FunctionHandler>>>,
    faults: Mutex<HashMap<String, ProviderError>>,
    calls: AtomicUsize,
}

impl std::fmt::Debug for SimulatedCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cloud = self.cloud.lock();
        f.debug_struct("SimulatedCloud")
            .field("region", &cloud.region)
            .field("account_id", &cloud.account_id)
            .field("resources", &cloud.tables.values().map(BTreeMap::len).sum::<usize>())
            .finish_non_exhaustive()
    }
}

impl SimulatedCloud {
    /// Create an empty cloud for the configured region and account
    #[must_use]
    pub fn new(config: &SkylineConfig) -> Self {
        Self::with_tables(
            config.region.clone(),
            config.account_id.clone(),
            BTreeMap::new(),
            config,
        )
    }

    /// Restore a cloud from a snapshot
    ///
    /// The generator is reseeded with the number of restored resources so
    /// names minted in a later session do not repeat earlier ones.
    #[must_use]
    pub fn from_snapshot(snapshot: CloudSnapshot, config: &SkylineConfig) -> Self {
        Self::with_tables(snapshot.region, snapshot.account_id, snapshot.resources, config)
    }

    fn with_tables(
        region: String,
        account_id: String,
        tables: BTreeMap<String, BTreeMap<String, StoredResource>>,
        config: &SkylineConfig,
    ) -> Self {
        let restored = tables.values().map(BTreeMap::len).sum::<usize>() as u64;
        Self {
            cloud: Mutex::new(Cloud::new(region, account_id, tables, config.seed ^ restored)),
            resource_limit: config.resource_limit,
            handlers: RwLock::new(HashMap::new()),
            faults: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Copy of every table
    #[must_use]
    pub fn snapshot(&self) -> CloudSnapshot {
        let cloud = self.cloud.lock();
        CloudSnapshot {
            region: cloud.region.clone(),
            account_id: cloud.account_id.clone(),
            resources: cloud.tables.clone(),
        }
    }

    /// Region
    #[must_use]
    pub fn region(&self) -> String {
        self.cloud.lock().region.clone()
    }

    /// Provider calls received so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Live resources of one type
    #[must_use]
    pub fn count(&self, resource_type: &str) -> usize {
        self.cloud.lock().count(resource_type)
    }

    /// Live resource by type and id
    #[must_use]
    pub fn get(&self, resource_type: &str, id: &str) -> Option<StoredResource> {
        self.cloud.lock().get(resource_type, id).cloned()
    }

    /// Fail the next create, update or delete of `resource_type`
    pub fn fail_next(&self, resource_type: &str, error: ProviderError) {
        self.faults.lock().insert(resource_type.to_owned(), error);
    }

    /// Register the code behind a function entry point such as `index.handler`
    pub fn register_handler(&self, entry_point: impl Into<String>, handler: Arc<dyn FunctionHandler>) {
        self.handlers.write().insert(entry_point.into(), handler);
    }

    fn begin(&self, op: &str, resource_type: &ResourceType, name: &NodeName) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(%name, %resource_type, op, "simulated call");
        match self.faults.lock().remove(resource_type.as_str()) {
            Some(error) => {
                tracing::warn!(%name, %resource_type, op, %error, "injected fault");
                Err(error)
            }
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Provider for SimulatedCloud {
    async fn create(
        &self,
        name: &NodeName,
        resource_type: &ResourceType,
        inputs: &Map<String, Value>,
    ) -> Result<ProviderResource, ProviderError> {
        self.begin("create", resource_type, name)?;
        let mut cloud = self.cloud.lock();
        if cloud.count(resource_type.as_str()) >= self.resource_limit {
            return Err(ProviderError::limit_exceeded(format!(
                "account limit of {} {resource_type} resources reached",
                self.resource_limit
            )));
        }
        let (id, outputs) = cloud.provision(resource_type.as_str(), name.as_str(), inputs, None)?;
        cloud.insert(
            resource_type.as_str(),
            id.clone(),
            StoredResource {
                logical_name: name.to_string(),
                inputs: inputs.clone(),
                outputs: outputs.clone(),
            },
        );
        tracing::info!(%name, %resource_type, %id, "created");
        Ok(ProviderResource { id, outputs })
    }

    async fn update(
        &self,
        name: &NodeName,
        resource_type: &ResourceType,
        id: &str,
        _old_inputs: &Map<String, Value>,
        new_inputs: &Map<String, Value>,
    ) -> Result<ProviderResource, ProviderError> {
        self.begin("update", resource_type, name)?;
        let mut cloud = self.cloud.lock();
        if cloud.get(resource_type.as_str(), id).is_none() {
            return Err(ProviderError::not_found(format!("{resource_type} `{id}` not found")));
        }
        let (id, outputs) =
            cloud.provision(resource_type.as_str(), name.as_str(), new_inputs, Some(id))?;
        cloud.insert(
            resource_type.as_str(),
            id.clone(),
            StoredResource {
                logical_name: name.to_string(),
                inputs: new_inputs.clone(),
                outputs: outputs.clone(),
            },
        );
        tracing::info!(%name, %resource_type, %id, "updated");
        Ok(ProviderResource { id, outputs })
    }

    async fn delete(
        &self,
        name: &NodeName,
        resource_type: &ResourceType,
        id: &str,
    ) -> Result<(), ProviderError> {
        self.begin("delete", resource_type, name)?;
        self.cloud.lock().remove(resource_type.as_str(), id)?;
        tracing::info!(%name, %resource_type, %id, "deleted");
        Ok(())
    }

    fn replace_keys(&self, resource_type: &ResourceType) -> &'static [&'static str] {
        match resource_type.as_str() {
            ROLE | FUNCTION => &["name"],
            ROLE_POLICY_ATTACHMENT => &["role", "policyArn"],
            PERMISSION => &["action", "function", "principal", "sourceArn"],
            API => &["protocolType"],
            STAGE => &["apiId", "name"],
            INTEGRATION | ROUTE => &["apiId"],
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AssetArchive, StringAsset};
    use crate::types::PolicyDocument;
    use serde_json::json;
    use skyline_engine::ProviderErrorKind;

    fn node(name: &str) -> NodeName {
        NodeName::new(name).unwrap()
    }

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn role_inputs(service: &str) -> Map<String, Value> {
        obj(json!({ "assumeRolePolicy": PolicyDocument::assume_role(service) }))
    }

    fn function_inputs(role_arn: &str) -> Map<String, Value> {
        let code = AssetArchive::new().with_asset("index.js", StringAsset::new("exports.handler = 1;"));
        obj(json!({
            "runtime": "nodejs20.x",
            "handler": "index.handler",
            "code": code,
            "role": role_arn,
        }))
    }

    #[tokio::test]
    async fn role_gets_generated_name_and_arn() {
        let cloud = SimulatedCloud::new(&SkylineConfig::default());
        let role = cloud
            .create(&node("lambdaRole"), &ROLE.into(), &role_inputs("lambda.amazonaws.com"))
            .await
            .unwrap();
        assert!(role.id.starts_with("lambdaRole-"));
        assert_eq!(role.id.len(), "lambdaRole-".len() + 7);
        assert_eq!(
            role.outputs["arn"],
            json!(format!("arn:aws:iam::123456789012:role/{}", role.id))
        );
        assert_eq!(cloud.count(ROLE), 1);
        assert_eq!(cloud.call_count(), 1);
    }

    #[tokio::test]
    async fn explicit_name_conflicts() {
        let cloud = SimulatedCloud::new(&SkylineConfig::default());
        let mut inputs = role_inputs("lambda.amazonaws.com");
        inputs.insert("name".into(), json!("shared"));
        cloud.create(&node("a"), &ROLE.into(), &inputs).await.unwrap();
        let err = cloud.create(&node("b"), &ROLE.into(), &inputs).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::NamingConflict);
    }

    #[tokio::test]
    async fn function_needs_assumable_role() {
        let cloud = SimulatedCloud::new(&SkylineConfig::default());
        let err = cloud
            .create(&node("fn"), &FUNCTION.into(), &function_inputs("arn:aws:iam::123456789012:role/missing"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::PermissionDenied);

        let ec2 = cloud
            .create(&node("ec2Role"), &ROLE.into(), &role_inputs("ec2.amazonaws.com"))
            .await
            .unwrap();
        let arn = ec2.outputs["arn"].as_str().unwrap().to_owned();
        let err = cloud
            .create(&node("fn"), &FUNCTION.into(), &function_inputs(&arn))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::PermissionDenied);
        assert_eq!(cloud.count(FUNCTION), 0);
    }

    #[tokio::test]
    async fn function_outputs_invoke_arn() {
        let cloud = SimulatedCloud::new(&SkylineConfig::default());
        let role = cloud
            .create(&node("lambdaRole"), &ROLE.into(), &role_inputs("lambda.amazonaws.com"))
            .await
            .unwrap();
        let arn = role.outputs["arn"].as_str().unwrap().to_owned();
        let function = cloud
            .create(&node("myLambdaFunction"), &FUNCTION.into(), &function_inputs(&arn))
            .await
            .unwrap();
        let function_arn = function.outputs["arn"].as_str().unwrap();
        assert!(function_arn.starts_with("arn:aws:lambda:us-east-1:123456789012:function:myLambdaFunction-"));
        assert_eq!(
            function.outputs["invokeArn"],
            json!(format!(
                "arn:aws:apigateway:us-east-1:lambda:path/2015-03-31/functions/{function_arn}/invocations"
            ))
        );
    }

    #[tokio::test]
    async fn resource_limit_is_enforced() {
        let cloud = SimulatedCloud::new(&SkylineConfig::default().with_resource_limit(1));
        let inputs = obj(json!({ "protocolType": "HTTP" }));
        cloud.create(&node("a"), &API.into(), &inputs).await.unwrap();
        let err = cloud.create(&node("b"), &API.into(), &inputs).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::LimitExceeded);
    }

    #[tokio::test]
    async fn injected_fault_fires_once() {
        let cloud = SimulatedCloud::new(&SkylineConfig::default());
        cloud.fail_next(API, ProviderError::new(ProviderErrorKind::Internal, "boom"));
        let inputs = obj(json!({ "protocolType": "HTTP" }));
        assert!(cloud.create(&node("a"), &API.into(), &inputs).await.is_err());
        assert!(cloud.create(&node("a"), &API.into(), &inputs).await.is_ok());
    }

    #[tokio::test]
    async fn deleting_api_removes_children() {
        let cloud = SimulatedCloud::new(&SkylineConfig::default());
        let api = cloud
            .create(&node("httpApi"), &API.into(), &obj(json!({ "protocolType": "HTTP" })))
            .await
            .unwrap();
        let stage_inputs = obj(json!({ "apiId": api.id, "name": "$default", "autoDeploy": true }));
        cloud.create(&node("stage"), &STAGE.into(), &stage_inputs).await.unwrap();
        let err = cloud.create(&node("again"), &STAGE.into(), &stage_inputs).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::NamingConflict);

        cloud.delete(&node("httpApi"), &API.into(), &api.id).await.unwrap();
        assert_eq!(cloud.count(STAGE), 0);
        let err = cloud.delete(&node("httpApi"), &API.into(), &api.id).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::NotFound);
    }

    #[tokio::test]
    async fn update_keeps_id() {
        let cloud = SimulatedCloud::new(&SkylineConfig::default());
        let api = cloud
            .create(&node("httpApi"), &API.into(), &obj(json!({ "protocolType": "HTTP" })))
            .await
            .unwrap();
        let new_inputs = obj(json!({ "protocolType": "HTTP", "name": "renamed" }));
        let updated = cloud
            .update(&node("httpApi"), &API.into(), &api.id, &Map::new(), &new_inputs)
            .await
            .unwrap();
        assert_eq!(updated.id, api.id);
        assert_eq!(updated.outputs["name"], json!("renamed"));
        assert_eq!(updated.outputs["apiEndpoint"], api.outputs["apiEndpoint"]);
    }

    #[tokio::test]
    async fn snapshot_restores_tables() {
        let config = SkylineConfig::default();
        let cloud = SimulatedCloud::new(&config);
        cloud
            .create(&node("httpApi"), &API.into(), &obj(json!({ "protocolType": "HTTP" })))
            .await
            .unwrap();
        let snapshot = cloud.snapshot();
        assert_eq!(snapshot.len(), 1);

        let text = serde_json::to_string(&snapshot).unwrap();
        let restored = SimulatedCloud::from_snapshot(serde_json::from_str(&text).unwrap(), &config);
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.count(API), 1);
    }

    #[test]
    fn replace_keys_cover_identity_fields() {
        let cloud = SimulatedCloud::new(&SkylineConfig::default());
        assert_eq!(cloud.replace_keys(&ROLE.into()), &["name"]);
        assert_eq!(cloud.replace_keys(&STAGE.into()), &["apiId", "name"]);
        assert!(cloud.replace_keys(&"test:node".into()).is_empty());
    }
}
