//! HTTP invocation through a deployed API

use super::store::{Cloud, StoredResource};
use super::SimulatedCloud;
use crate::asset::AssetArchive;
use crate::types::{Runtime, API, FUNCTION, INTEGRATION, PERMISSION, ROUTE, STAGE};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Error raised by function code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

/// Code behind a function entry point
pub trait FunctionHandler: Send + Sync {
    /// Handle one invocation event
    ///
    /// # Errors
    /// [`HandlerError`] when the function fails; surfaces as a 500.
    fn handle(&self, event: &Value) -> Result<Value, HandlerError>;
}

impl<F> FunctionHandler for F
where
    F: Fn(&Value) -> Result<Value, HandlerError> + Send + Sync,
{
    fn handle(&self, event: &Value) -> Result<Value, HandlerError> {
        self(event)
    }
}

/// Request sent to an API endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Upper-case method
    pub method: String,
    /// Absolute path, e.g. `/hello`
    pub path: String,
    /// Request headers
    pub headers: BTreeMap<String, String>,
    /// Body, if any
    pub body: Option<String>,
}

impl HttpRequest {
    /// Create new request
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// With a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// With a body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Response returned by the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Response headers
    pub headers: BTreeMap<String, String>,
    /// Body
    pub body: String,
}

impl HttpResponse {
    fn message(status: u16, message: &str) -> Self {
        Self {
            status,
            headers: BTreeMap::from([("content-type".to_owned(), "application/json".to_owned())]),
            body: json!({ "message": message }).to_string(),
        }
    }

    fn not_found() -> Self {
        Self::message(404, "Not Found")
    }

    fn internal_error() -> Self {
        Self::message(500, "Internal Server Error")
    }
}

/// Request could not reach any API
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    /// Not an execute-api URL for this region
    #[error("not an API endpoint: {0}")]
    InvalidEndpoint(String),

    /// Host names an API that does not exist
    #[error("no API with id {0}")]
    UnknownApi(String),
}

/// Whether `text` matches `pattern`, where `*` matches any run of characters
/// including `/` and `?` matches exactly one
#[must_use]
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let body = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    Regex::new(&format!("(?s)^{body}$")).is_ok_and(|re| re.is_match(text))
}

/// Everything a request needs, copied out so the handler runs unlocked
struct Dispatch {
    handler: String,
    runtime: Option<Runtime>,
    code: Option<AssetArchive>,
    payload_version: String,
    route_key: String,
}

enum Routed {
    Respond(HttpResponse),
    Call(Dispatch),
}

fn api_id_from_endpoint(endpoint: &str, region: &str) -> Result<String, InvokeError> {
    let invalid = || InvokeError::InvalidEndpoint(endpoint.to_owned());
    let rest = endpoint.strip_prefix("https://").ok_or_else(invalid)?;
    let host = rest.split('/').next().unwrap_or_default();
    let (id, domain) = host.split_once('.').ok_or_else(invalid)?;
    if id.is_empty() || domain != format!("execute-api.{region}.amazonaws.com") {
        return Err(invalid());
    }
    Ok(id.to_owned())
}

fn on_api<'a>(resource: &'a StoredResource, api_id: &str) -> Option<&'a StoredResource> {
    (resource.attr("apiId") == Some(api_id)).then_some(resource)
}

fn route(cloud: &Cloud, api_id: &str, request: &HttpRequest) -> Routed {
    let has_stage = cloud
        .iter(STAGE)
        .filter_map(|(_, s)| on_api(s, api_id))
        .any(|s| {
            s.attr("name") == Some(crate::apigatewayv2::DEFAULT_STAGE)
                && s.inputs.get("autoDeploy").and_then(Value::as_bool) == Some(true)
        });
    if !has_stage {
        return Routed::Respond(HttpResponse::not_found());
    }

    let routes: Vec<&StoredResource> = cloud
        .iter(ROUTE)
        .filter_map(|(_, r)| on_api(r, api_id))
        .collect();
    let exact = format!("{} {}", request.method, request.path);
    let any = format!("ANY {}", request.path);
    let matched = [exact.as_str(), any.as_str(), "$default"]
        .into_iter()
        .find_map(|key| routes.iter().find(|r| r.attr("routeKey") == Some(key)));
    let Some(matched) = matched else {
        return Routed::Respond(HttpResponse::not_found());
    };
    let route_key = matched.attr("routeKey").unwrap_or_default().to_owned();

    let integration = matched
        .attr("target")
        .and_then(|t| t.strip_prefix("integrations/"))
        .and_then(|id| cloud.get(INTEGRATION, id))
        .and_then(|i| on_api(i, api_id))
        .filter(|i| i.attr("integrationType") == Some("AWS_PROXY"));
    let Some(integration) = integration else {
        tracing::warn!(api_id, %route_key, "route has no usable integration");
        return Routed::Respond(HttpResponse::internal_error());
    };
    let uri = integration.attr("integrationUri").unwrap_or_default();

    let function = cloud
        .iter(FUNCTION)
        .find(|(_, f)| f.attr("arn") == Some(uri) || f.attr("invokeArn") == Some(uri));
    let Some((function_name, function)) = function else {
        tracing::warn!(api_id, uri, "integration target is not a function");
        return Routed::Respond(HttpResponse::internal_error());
    };

    let execution_arn = cloud
        .get(API, api_id)
        .and_then(|a| a.attr("executionArn"))
        .unwrap_or_default();
    let source = format!(
        "{execution_arn}/{}/{}{}",
        crate::apigatewayv2::DEFAULT_STAGE,
        request.method,
        request.path
    );
    let allowed = cloud.iter(PERMISSION).any(|(_, p)| {
        p.attr("functionName") == Some(function_name.as_str())
            && matches!(p.attr("action"), Some("lambda:InvokeFunction" | "lambda:*"))
            && p.attr("principal") == Some("apigateway.amazonaws.com")
            && p.attr("sourceArn").map_or(true, |arn| glob_match(arn, &source))
    });
    if !allowed {
        tracing::warn!(function = %function_name, %source, "API Gateway is not permitted to invoke function");
        return Routed::Respond(HttpResponse::internal_error());
    }

    Routed::Call(Dispatch {
        handler: function.attr("handler").unwrap_or_default().to_owned(),
        runtime: function.attr("runtime").and_then(Runtime::parse),
        code: function
            .inputs
            .get("code")
            .cloned()
            .and_then(|c| serde_json::from_value(c).ok()),
        payload_version: integration
            .attr("payloadFormatVersion")
            .unwrap_or("1.0")
            .to_owned(),
        route_key,
    })
}

/// Whether the archive contains the module the entry point names
fn module_present(dispatch: &Dispatch) -> bool {
    let (Some(runtime), Some(code)) = (dispatch.runtime, &dispatch.code) else {
        return false;
    };
    let Some((module, _)) = dispatch.handler.rsplit_once('.') else {
        return false;
    };
    runtime
        .module_extensions()
        .iter()
        .any(|ext| code.get(&format!("{module}.{ext}")).is_some())
}

fn event(request: &HttpRequest, dispatch: &Dispatch) -> Value {
    if dispatch.payload_version == "2.0" {
        json!({
            "version": "2.0",
            "routeKey": dispatch.route_key,
            "rawPath": request.path,
            "headers": request.headers,
            "requestContext": {
                "http": { "method": request.method, "path": request.path },
                "stage": crate::apigatewayv2::DEFAULT_STAGE,
            },
            "body": request.body,
            "isBase64Encoded": false,
        })
    } else {
        json!({
            "version": "1.0",
            "resource": request.path,
            "path": request.path,
            "httpMethod": request.method,
            "headers": request.headers,
            "requestContext": { "stage": crate::apigatewayv2::DEFAULT_STAGE },
            "body": request.body,
            "isBase64Encoded": false,
        })
    }
}

/// Map a proxy integration result to an HTTP response
fn response(result: Value) -> HttpResponse {
    let status = result
        .get("statusCode")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok());
    let Some(status) = status else {
        return HttpResponse {
            status: 200,
            headers: BTreeMap::from([("content-type".to_owned(), "application/json".to_owned())]),
            body: result.to_string(),
        };
    };
    let headers = result
        .get("headers")
        .and_then(Value::as_object)
        .map(|h| {
            h.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.to_ascii_lowercase(), v.to_owned())))
                .collect()
        })
        .unwrap_or_default();
    let body = match result.get("body") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    };
    HttpResponse {
        status,
        headers,
        body,
    }
}

impl SimulatedCloud {
    /// Send `request` to the API served at `endpoint`
    ///
    /// Failures inside the deployment (missing stage, route, integration,
    /// permission or code) come back as 404 or 500 responses, as they do
    /// from the real service.
    ///
    /// # Errors
    /// [`InvokeError`] if `endpoint` does not name an API in this cloud.
    pub fn invoke(&self, endpoint: &str, request: &HttpRequest) -> Result<HttpResponse, InvokeError> {
        let routed = {
            let cloud = self.cloud.lock();
            let api_id = api_id_from_endpoint(endpoint, &cloud.region)?;
            if cloud.get(API, &api_id).is_none() {
                return Err(InvokeError::UnknownApi(api_id));
            }
            route(&cloud, &api_id, request)
        };

        let response = match routed {
            Routed::Respond(response) => response,
            Routed::Call(dispatch) => self.call(request, &dispatch),
        };
        tracing::info!(
            method = %request.method,
            path = %request.path,
            status = response.status,
            "invoke"
        );
        Ok(response)
    }

    fn call(&self, request: &HttpRequest, dispatch: &Dispatch) -> HttpResponse {
        if !module_present(dispatch) {
            tracing::warn!(handler = %dispatch.handler, "handler module missing from code archive");
            return HttpResponse::internal_error();
        }
        let handler: Option<Arc<dyn FunctionHandler>> =
            self.handlers.read().get(&dispatch.handler).cloned();
        let Some(handler) = handler else {
            tracing::warn!(handler = %dispatch.handler, "no code registered for entry point");
            return HttpResponse::internal_error();
        };
        match handler.handle(&event(request, dispatch)) {
            Ok(result) => response(result),
            Err(error) => {
                tracing::warn!(handler = %dispatch.handler, %error, "function failed");
                HttpResponse::internal_error()
            }
        }
    }
}
