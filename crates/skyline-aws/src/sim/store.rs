//! Resource tables and per-type provisioning rules of the simulated cloud

use crate::asset::AssetArchive;
use crate::types::{
    IntegrationType, PolicyDocument, ProtocolType, Runtime, API, FUNCTION, INTEGRATION,
    PERMISSION, ROLE, ROLE_POLICY_ATTACHMENT, ROUTE, STAGE,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use skyline_engine::ProviderError;
use std::collections::BTreeMap;

const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ROUTE_METHODS: &[&str] = &["ANY", "DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT"];

/// One live resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResource {
    /// Node name it was created for
    pub logical_name: String,
    /// Inputs it was last written with
    pub inputs: Map<String, Value>,
    /// Computed attributes
    pub outputs: Map<String, Value>,
}

impl StoredResource {
    /// String output or input attribute
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.outputs
            .get(key)
            .or_else(|| self.inputs.get(key))
            .and_then(Value::as_str)
    }
}

/// Tables of live resources, keyed by type token then id
pub(crate) type Tables = BTreeMap<String, BTreeMap<String, StoredResource>>;

pub(crate) struct Cloud {
    pub(crate) region: String,
    pub(crate) account_id: String,
    pub(crate) tables: Tables,
    rng: StdRng,
}

fn required<'a>(inputs: &'a Map<String, Value>, key: &str) -> Result<&'a str, ProviderError> {
    inputs
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProviderError::invalid_input(format!("missing required string property `{key}`")))
}

fn optional<'a>(inputs: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    inputs.get(key).and_then(Value::as_str)
}

fn parse<T: DeserializeOwned>(inputs: &Map<String, Value>, key: &str) -> Result<T, ProviderError> {
    let value = inputs
        .get(key)
        .cloned()
        .ok_or_else(|| ProviderError::invalid_input(format!("missing required property `{key}`")))?;
    serde_json::from_value(value)
        .map_err(|e| ProviderError::invalid_input(format!("invalid `{key}`: {e}")))
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Whether a route key is `$default` or `METHOD /path`
pub(crate) fn valid_route_key(key: &str) -> bool {
    if key == "$default" {
        return true;
    }
    match key.split_once(' ') {
        Some((method, path)) => {
            ROUTE_METHODS.contains(&method) && path.starts_with('/') && !path.contains(' ')
        }
        None => false,
    }
}

impl Cloud {
    pub(crate) fn new(region: String, account_id: String, tables: Tables, seed: u64) -> Self {
        Self {
            region,
            account_id,
            tables,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub(crate) fn count(&self, resource_type: &str) -> usize {
        self.tables.get(resource_type).map_or(0, BTreeMap::len)
    }

    pub(crate) fn get(&self, resource_type: &str, id: &str) -> Option<&StoredResource> {
        self.tables.get(resource_type).and_then(|t| t.get(id))
    }

    pub(crate) fn iter(&self, resource_type: &str) -> impl Iterator<Item = (&String, &StoredResource)> + '_ {
        self.tables.get(resource_type).into_iter().flatten()
    }

    fn find(&self, resource_type: &str, pred: impl Fn(&StoredResource) -> bool) -> Option<(&String, &StoredResource)> {
        self.iter(resource_type).find(|(_, r)| pred(r))
    }

    fn hex_suffix(&mut self) -> String {
        format!("{:07x}", self.rng.gen_range(0..0x1000_0000u32))
    }

    fn token(&mut self, len: usize) -> String {
        (0..len)
            .map(|_| char::from(ID_CHARSET[self.rng.gen_range(0..ID_CHARSET.len())]))
            .collect()
    }

    /// Fresh id unique within one table
    fn unique(&mut self, resource_type: &str, mut generate: impl FnMut(&mut Self) -> String) -> String {
        loop {
            let candidate = generate(self);
            if self.get(resource_type, &candidate).is_none() {
                return candidate;
            }
        }
    }

    /// Explicit name from inputs, the name already assigned, or a generated one
    fn physical_name(
        &mut self,
        resource_type: &str,
        logical: &str,
        inputs: &Map<String, Value>,
        existing: Option<&str>,
    ) -> Result<String, ProviderError> {
        if let Some(name) = optional(inputs, "name") {
            if existing != Some(name) && self.get(resource_type, name).is_some() {
                return Err(ProviderError::naming_conflict(format!(
                    "a resource named `{name}` already exists"
                )));
            }
            return Ok(name.to_owned());
        }
        if let Some(id) = existing {
            return Ok(id.to_owned());
        }
        Ok(self.unique(resource_type, |c| format!("{logical}-{}", c.hex_suffix())))
    }

    /// Validate inputs and compute id and outputs; `existing` is the id being updated
    pub(crate) fn provision(
        &mut self,
        resource_type: &str,
        logical: &str,
        inputs: &Map<String, Value>,
        existing: Option<&str>,
    ) -> Result<(String, Map<String, Value>), ProviderError> {
        match resource_type {
            ROLE => self.role(logical, inputs, existing),
            ROLE_POLICY_ATTACHMENT => self.attachment(logical, inputs, existing),
            FUNCTION => self.function(logical, inputs, existing),
            PERMISSION => self.permission(logical, inputs, existing),
            API => self.api(logical, inputs, existing),
            STAGE => self.stage(inputs, existing),
            INTEGRATION => self.integration(inputs, existing),
            ROUTE => self.route(inputs, existing),
            other => Err(ProviderError::invalid_input(format!(
                "unsupported resource type `{other}`"
            ))),
        }
    }

    fn role(
        &mut self,
        logical: &str,
        inputs: &Map<String, Value>,
        existing: Option<&str>,
    ) -> Result<(String, Map<String, Value>), ProviderError> {
        let policy: PolicyDocument = parse(inputs, "assumeRolePolicy")?;
        if policy.statement.is_empty() {
            return Err(ProviderError::invalid_input("assume role policy has no statements"));
        }
        let name = self.physical_name(ROLE, logical, inputs, existing)?;
        let arn = format!("arn:aws:iam::{}:role/{name}", self.account_id);
        Ok((name.clone(), into_map(json!({ "name": name, "arn": arn }))))
    }

    fn attachment(
        &mut self,
        logical: &str,
        inputs: &Map<String, Value>,
        existing: Option<&str>,
    ) -> Result<(String, Map<String, Value>), ProviderError> {
        let role = required(inputs, "role")?;
        let policy_arn = required(inputs, "policyArn")?;
        if self.get(ROLE, role).is_none() {
            return Err(ProviderError::permission_denied(format!(
                "cannot attach policy: role `{role}` does not exist"
            )));
        }
        if !policy_arn.starts_with("arn:aws:iam::") {
            return Err(ProviderError::invalid_input(format!(
                "`{policy_arn}` is not a policy ARN"
            )));
        }
        let id = match existing {
            Some(id) => id.to_owned(),
            None => self.unique(ROLE_POLICY_ATTACHMENT, |c| format!("{logical}-{}", c.hex_suffix())),
        };
        Ok((id, into_map(json!({ "role": role, "policyArn": policy_arn }))))
    }

    fn function(
        &mut self,
        logical: &str,
        inputs: &Map<String, Value>,
        existing: Option<&str>,
    ) -> Result<(String, Map<String, Value>), ProviderError> {
        let runtime_id = required(inputs, "runtime")?;
        let runtime = Runtime::parse(runtime_id).ok_or_else(|| {
            ProviderError::invalid_input(format!("unsupported runtime `{runtime_id}`"))
        })?;
        let handler = required(inputs, "handler")?;
        if !handler.contains('.') {
            return Err(ProviderError::invalid_input(format!(
                "handler `{handler}` must have the form module.export"
            )));
        }
        let code: AssetArchive = parse(inputs, "code")?;
        if code.paths().next().is_none() {
            return Err(ProviderError::invalid_input("code archive is empty"));
        }

        let role_arn = required(inputs, "role")?;
        let assumable = self
            .find(ROLE, |r| r.attr("arn") == Some(role_arn))
            .and_then(|(_, r)| r.inputs.get("assumeRolePolicy").cloned())
            .and_then(|p| serde_json::from_value::<PolicyDocument>(p).ok())
            .is_some_and(|p| p.trusts("lambda.amazonaws.com"));
        if !assumable {
            return Err(ProviderError::permission_denied(format!(
                "the role `{role_arn}` cannot be assumed by Lambda"
            )));
        }

        let name = self.physical_name(FUNCTION, logical, inputs, existing)?;
        let arn = format!(
            "arn:aws:lambda:{}:{}:function:{name}",
            self.region, self.account_id
        );
        let invoke_arn = format!(
            "arn:aws:apigateway:{}:lambda:path/2015-03-31/functions/{arn}/invocations",
            self.region
        );
        let outputs = json!({
            "name": name,
            "arn": arn,
            "invokeArn": invoke_arn,
            "runtime": runtime.as_str(),
            "codeSha256": code.hash(),
            "sourceCodeSize": code.size(),
            "version": "$LATEST",
        });
        Ok((name, into_map(outputs)))
    }

    fn permission(
        &mut self,
        logical: &str,
        inputs: &Map<String, Value>,
        existing: Option<&str>,
    ) -> Result<(String, Map<String, Value>), ProviderError> {
        let action = required(inputs, "action")?;
        if !action.starts_with("lambda:") {
            return Err(ProviderError::invalid_input(format!(
                "`{action}` is not a Lambda action"
            )));
        }
        required(inputs, "principal")?;
        let function = required(inputs, "function")?;
        let function_name = self
            .find(FUNCTION, |r| {
                r.attr("name") == Some(function) || r.attr("arn") == Some(function)
            })
            .map(|(id, _)| id.clone())
            .ok_or_else(|| ProviderError::not_found(format!("function `{function}` not found")))?;

        let id = match existing {
            Some(id) => id.to_owned(),
            None => self.unique(PERMISSION, |c| format!("{logical}-{}", c.hex_suffix())),
        };
        Ok((
            id.clone(),
            into_map(json!({ "statementId": id, "functionName": function_name })),
        ))
    }

    fn api(
        &mut self,
        logical: &str,
        inputs: &Map<String, Value>,
        existing: Option<&str>,
    ) -> Result<(String, Map<String, Value>), ProviderError> {
        let protocol: ProtocolType = parse(inputs, "protocolType")?;
        let id = match existing {
            Some(id) => id.to_owned(),
            None => self.unique(API, |c| c.token(10)),
        };
        let name = match (optional(inputs, "name"), existing) {
            (Some(name), _) => name.to_owned(),
            (None, Some(id)) => self
                .get(API, id)
                .and_then(|r| r.attr("name"))
                .map_or_else(|| logical.to_owned(), str::to_owned),
            (None, None) => format!("{logical}-{}", self.hex_suffix()),
        };
        let scheme = match protocol {
            ProtocolType::Http => "https",
            ProtocolType::WebSocket => "wss",
        };
        let outputs = json!({
            "name": name,
            "apiEndpoint": format!("{scheme}://{id}.execute-api.{}.amazonaws.com", self.region),
            "executionArn": format!("arn:aws:execute-api:{}:{}:{id}", self.region, self.account_id),
        });
        Ok((id, into_map(outputs)))
    }

    fn api_endpoint(&self, api_id: &str) -> Result<String, ProviderError> {
        self.get(API, api_id)
            .and_then(|r| r.attr("apiEndpoint"))
            .map(str::to_owned)
            .ok_or_else(|| ProviderError::not_found(format!("API `{api_id}` not found")))
    }

    fn stage(
        &mut self,
        inputs: &Map<String, Value>,
        existing: Option<&str>,
    ) -> Result<(String, Map<String, Value>), ProviderError> {
        let api_id = required(inputs, "apiId")?;
        let name = required(inputs, "name")?;
        let endpoint = self.api_endpoint(api_id)?;
        let id = format!("{api_id}/{name}");
        if existing != Some(id.as_str()) && self.get(STAGE, &id).is_some() {
            return Err(ProviderError::naming_conflict(format!(
                "stage `{name}` already exists on API `{api_id}`"
            )));
        }
        let invoke_url = if name == "$default" {
            format!("{endpoint}/")
        } else {
            format!("{endpoint}/{name}")
        };
        Ok((id, into_map(json!({ "invokeUrl": invoke_url }))))
    }

    fn integration(
        &mut self,
        inputs: &Map<String, Value>,
        existing: Option<&str>,
    ) -> Result<(String, Map<String, Value>), ProviderError> {
        let api_id = required(inputs, "apiId")?;
        self.api_endpoint(api_id)?;
        let kind: IntegrationType = parse(inputs, "integrationType")?;
        if matches!(kind, IntegrationType::AwsProxy | IntegrationType::HttpProxy) {
            required(inputs, "integrationUri")?;
        }
        let version = optional(inputs, "payloadFormatVersion").unwrap_or("1.0");
        if !matches!(version, "1.0" | "2.0") {
            return Err(ProviderError::invalid_input(format!(
                "unsupported payload format version `{version}`"
            )));
        }
        let id = match existing {
            Some(id) => id.to_owned(),
            None => self.unique(INTEGRATION, |c| c.token(7)),
        };
        Ok((id, into_map(json!({ "payloadFormatVersion": version }))))
    }

    fn route(
        &mut self,
        inputs: &Map<String, Value>,
        existing: Option<&str>,
    ) -> Result<(String, Map<String, Value>), ProviderError> {
        let api_id = required(inputs, "apiId")?;
        self.api_endpoint(api_id)?;
        let route_key = required(inputs, "routeKey")?;
        if !valid_route_key(route_key) {
            return Err(ProviderError::invalid_input(format!(
                "invalid route key `{route_key}`"
            )));
        }
        let taken = self
            .iter(ROUTE)
            .any(|(id, r)| Some(id.as_str()) != existing && r.attr("apiId") == Some(api_id) && r.attr("routeKey") == Some(route_key));
        if taken {
            return Err(ProviderError::naming_conflict(format!(
                "route `{route_key}` already exists on API `{api_id}`"
            )));
        }
        if let Some(target) = optional(inputs, "target") {
            let integration_id = target.strip_prefix("integrations/").ok_or_else(|| {
                ProviderError::invalid_input(format!("target `{target}` must be integrations/{{id}}"))
            })?;
            let same_api = self
                .get(INTEGRATION, integration_id)
                .is_some_and(|i| i.attr("apiId") == Some(api_id));
            if !same_api {
                return Err(ProviderError::not_found(format!(
                    "integration `{integration_id}` not found on API `{api_id}`"
                )));
            }
        }
        let id = match existing {
            Some(id) => id.to_owned(),
            None => self.unique(ROUTE, |c| c.token(7)),
        };
        Ok((id, Map::new()))
    }

    pub(crate) fn insert(&mut self, resource_type: &str, id: String, resource: StoredResource) {
        self.tables
            .entry(resource_type.to_owned())
            .or_default()
            .insert(id, resource);
    }

    /// Remove a resource, cascading the way the real services do
    pub(crate) fn remove(&mut self, resource_type: &str, id: &str) -> Result<StoredResource, ProviderError> {
        if self.get(resource_type, id).is_none() {
            return Err(ProviderError::not_found(format!(
                "{resource_type} `{id}` not found"
            )));
        }
        if resource_type == ROLE && self.find(ROLE_POLICY_ATTACHMENT, |a| a.attr("role") == Some(id)).is_some() {
            return Err(ProviderError::naming_conflict(format!(
                "cannot delete role `{id}`: detach all policies first"
            )));
        }
        match resource_type {
            API => {
                for child in [STAGE, INTEGRATION, ROUTE] {
                    if let Some(table) = self.tables.get_mut(child) {
                        table.retain(|_, r| r.attr("apiId") != Some(id));
                    }
                }
            }
            FUNCTION => {
                if let Some(table) = self.tables.get_mut(PERMISSION) {
                    table.retain(|_, r| r.attr("functionName") != Some(id));
                }
            }
            _ => {}
        }
        self.tables
            .get_mut(resource_type)
            .and_then(|t| t.remove(id))
            .ok_or_else(|| ProviderError::not_found(format!("{resource_type} `{id}` not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_keys() {
        assert!(valid_route_key("POST /hello"));
        assert!(valid_route_key("$default"));
        assert!(valid_route_key("ANY /{proxy+}"));
        assert!(!valid_route_key("FETCH /hello"));
        assert!(!valid_route_key("POST hello"));
        assert!(!valid_route_key("POST"));
    }

    #[test]
    fn generated_names_are_seeded() {
        let mut a = Cloud::new("us-east-1".into(), "123456789012".into(), Tables::new(), 7);
        let mut b = Cloud::new("us-east-1".into(), "123456789012".into(), Tables::new(), 7);
        assert_eq!(a.hex_suffix(), b.hex_suffix());
        let token = a.token(10);
        assert_eq!(token.len(), 10);
        assert!(token.bytes().all(|c| ID_CHARSET.contains(&c)));
    }

    #[test]
    fn missing_required_input_is_invalid() {
        let mut cloud = Cloud::new("us-east-1".into(), "123456789012".into(), Tables::new(), 1);
        let err = cloud.provision(API, "httpApi", &Map::new(), None).unwrap_err();
        assert_eq!(err.kind, skyline_engine::ProviderErrorKind::InvalidInput);
    }
}
