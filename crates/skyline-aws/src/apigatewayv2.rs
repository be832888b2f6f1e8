//! API Gateway v2 resources

use crate::types::{IntegrationType, ProtocolType, API, INTEGRATION, ROUTE, STAGE};
use crate::Resource;
use skyline_graph::{GraphBuilder, GraphError, Input, Output, Properties, ResourceHandle};

/// Name of the stage served at the root of the endpoint
pub const DEFAULT_STAGE: &str = "$default";

/// Arguments of [`Api`]
#[derive(Debug, Clone)]
pub struct ApiArgs {
    /// Explicit API name; generated from the node name when absent
    pub name: Option<Input<String>>,
    /// HTTP or WebSocket
    pub protocol_type: Input<ProtocolType>,
}

/// HTTP or WebSocket API
#[derive(Debug, Clone)]
pub struct Api {
    handle: ResourceHandle,
}

impl Api {
    /// Declare an API
    ///
    /// # Errors
    /// [`GraphError`] if the node name is invalid or taken.
    pub fn new(ctx: &mut GraphBuilder, name: &str, args: ApiArgs) -> Result<Self, GraphError> {
        let properties = Properties::new()
            .set_optional("name", args.name)
            .set("protocolType", args.protocol_type);
        let handle = ctx.declare(name, API, properties)?;
        Ok(Self { handle })
    }

    /// Public base URL, `https://{id}.execute-api.{region}.amazonaws.com`
    #[must_use]
    pub fn api_endpoint(&self) -> Output<String> {
        self.handle.output("apiEndpoint")
    }

    /// ARN prefix used in invoke permissions
    #[must_use]
    pub fn execution_arn(&self) -> Output<String> {
        self.handle.output("executionArn")
    }
}

impl Resource for Api {
    const TYPE: &'static str = API;

    fn handle(&self) -> &ResourceHandle {
        &self.handle
    }
}

/// Arguments of [`Stage`]
#[derive(Debug, Clone)]
pub struct StageArgs {
    /// Owning API id
    pub api_id: Input<String>,
    /// Stage name
    pub name: Input<String>,
    /// Deploy every change automatically
    pub auto_deploy: Input<bool>,
}

/// Deployment stage of an API
#[derive(Debug, Clone)]
pub struct Stage {
    handle: ResourceHandle,
}

impl Stage {
    /// Declare a stage
    ///
    /// # Errors
    /// [`GraphError`] if the node name is invalid or taken.
    pub fn new(ctx: &mut GraphBuilder, name: &str, args: StageArgs) -> Result<Self, GraphError> {
        let properties = Properties::new()
            .set("apiId", args.api_id)
            .set("name", args.name)
            .set("autoDeploy", args.auto_deploy);
        let handle = ctx.declare(name, STAGE, properties)?;
        Ok(Self { handle })
    }

    /// URL the stage is served at
    #[must_use]
    pub fn invoke_url(&self) -> Output<String> {
        self.handle.output("invokeUrl")
    }
}

impl Resource for Stage {
    const TYPE: &'static str = STAGE;

    fn handle(&self) -> &ResourceHandle {
        &self.handle
    }
}

/// Arguments of [`Integration`]
#[derive(Debug, Clone)]
pub struct IntegrationArgs {
    /// Owning API id
    pub api_id: Input<String>,
    /// Integration type
    pub integration_type: Input<IntegrationType>,
    /// Target, a function ARN or invoke ARN for proxy integrations
    pub integration_uri: Option<Input<String>>,
    /// `1.0` or `2.0`
    pub payload_format_version: Option<Input<String>>,
}

/// Backend an API forwards requests to
#[derive(Debug, Clone)]
pub struct Integration {
    handle: ResourceHandle,
}

impl Integration {
    /// Declare an integration
    ///
    /// # Errors
    /// [`GraphError`] if the node name is invalid or taken.
    pub fn new(ctx: &mut GraphBuilder, name: &str, args: IntegrationArgs) -> Result<Self, GraphError> {
        let properties = Properties::new()
            .set("apiId", args.api_id)
            .set("integrationType", args.integration_type)
            .set_optional("integrationUri", args.integration_uri)
            .set_optional("payloadFormatVersion", args.payload_format_version);
        let handle = ctx.declare(name, INTEGRATION, properties)?;
        Ok(Self { handle })
    }
}

impl Resource for Integration {
    const TYPE: &'static str = INTEGRATION;

    fn handle(&self) -> &ResourceHandle {
        &self.handle
    }
}

/// Arguments of [`Route`]
#[derive(Debug, Clone)]
pub struct RouteArgs {
    /// Owning API id
    pub api_id: Input<String>,
    /// `METHOD /path` or `$default`
    pub route_key: Input<String>,
    /// `integrations/{integration id}`
    pub target: Option<Input<String>>,
}

/// Route from a method and path to an integration
#[derive(Debug, Clone)]
pub struct Route {
    handle: ResourceHandle,
}

impl Route {
    /// Declare a route
    ///
    /// # Errors
    /// [`GraphError`] if the node name is invalid or taken.
    pub fn new(ctx: &mut GraphBuilder, name: &str, args: RouteArgs) -> Result<Self, GraphError> {
        let properties = Properties::new()
            .set("apiId", args.api_id)
            .set("routeKey", args.route_key)
            .set_optional("target", args.target);
        let handle = ctx.declare(name, ROUTE, properties)?;
        Ok(Self { handle })
    }
}

impl Resource for Route {
    const TYPE: &'static str = ROUTE;

    fn handle(&self) -> &ResourceHandle {
        &self.handle
    }
}
