//! Declaration of the hello-world stack

use crate::handler::code_archive;
use skyline_aws::prelude::*;
use skyline_graph::{interpolate, GraphBuilder, GraphError, ValidatedGraph};

/// Name of the stack output carrying the API endpoint
pub const URL_OUTPUT: &str = "url";

/// Route served by the function
pub const ROUTE_KEY: &str = "POST /hello";

/// Knobs for variants of the stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloOptions {
    /// Declare the `POST /hello` route
    pub include_route: bool,
    /// Function runtime
    pub runtime: Runtime,
    /// Explicit name of the execution role, generated when absent
    pub role_name: Option<String>,
}

impl Default for HelloOptions {
    fn default() -> Self {
        Self {
            include_route: true,
            runtime: Runtime::NodeJs20x,
            role_name: None,
        }
    }
}

impl HelloOptions {
    /// Create default options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With or without the route
    #[inline]
    #[must_use]
    pub fn with_route(mut self, include: bool) -> Self {
        self.include_route = include;
        self
    }

    /// With a runtime
    #[inline]
    #[must_use]
    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = runtime;
        self
    }

    /// With an explicit role name
    #[inline]
    #[must_use]
    pub fn with_role_name(mut self, name: impl Into<String>) -> Self {
        self.role_name = Some(name.into());
        self
    }
}

/// Handles of every declared resource
#[derive(Debug, Clone)]
pub struct HelloStack {
    /// Execution role
    pub role: Role,
    /// Basic execution policy on the role
    pub attachment: RolePolicyAttachment,
    /// The greeting function
    pub function: Function,
    /// HTTP API
    pub api: Api,
    /// `$default` stage
    pub stage: Stage,
    /// Proxy integration to the function
    pub integration: Integration,
    /// `POST /hello`, unless left out
    pub route: Option<Route>,
    /// Grant letting the API invoke the function
    pub permission: Permission,
}

/// Declare the stack into `ctx` and export its endpoint as `url`
///
/// # Errors
/// [`GraphError`] if a node name is already taken in `ctx`.
pub fn declare_hello_stack(
    ctx: &mut GraphBuilder,
    options: &HelloOptions,
) -> Result<HelloStack, GraphError> {
    let mut role_args = RoleArgs::new(PolicyDocument::assume_role("lambda.amazonaws.com"));
    if let Some(name) = &options.role_name {
        role_args = role_args.with_name(name.as_str());
    }
    let role = Role::new(ctx, "lambdaRole", role_args)?;

    let attachment = RolePolicyAttachment::new(
        ctx,
        "lambdaRoleAttachment",
        RolePolicyAttachmentArgs {
            role: role.name(),
            policy_arn: AWS_LAMBDA_BASIC_EXECUTION_ROLE.into(),
        },
    )?;

    let function = Function::new(
        ctx,
        "myLambdaFunction",
        FunctionArgs {
            name: None,
            runtime: options.runtime.into(),
            code: code_archive().into(),
            handler: crate::handler::ENTRY_POINT.into(),
            role: role.arn(),
        },
    )?;

    let api = Api::new(
        ctx,
        "httpApi",
        ApiArgs {
            name: None,
            protocol_type: ProtocolType::Http.into(),
        },
    )?;

    let stage = Stage::new(
        ctx,
        "stage",
        StageArgs {
            api_id: api.id(),
            name: DEFAULT_STAGE.into(),
            auto_deploy: true.into(),
        },
    )?;

    let integration = Integration::new(
        ctx,
        "lambdaIntegration",
        IntegrationArgs {
            api_id: api.id(),
            integration_type: IntegrationType::AwsProxy.into(),
            integration_uri: Some(function.invoke_arn()),
            payload_format_version: Some("2.0".into()),
        },
    )?;

    let route = if options.include_route {
        Some(Route::new(
            ctx,
            "route",
            RouteArgs {
                api_id: api.id(),
                route_key: ROUTE_KEY.into(),
                target: Some(interpolate!("integrations/{}", integration.id())),
            },
        )?)
    } else {
        None
    };

    let permission = Permission::new(
        ctx,
        "apiGatewayPermission",
        PermissionArgs {
            action: "lambda:InvokeFunction".into(),
            function: function.name(),
            principal: "apigateway.amazonaws.com".into(),
            source_arn: Some(interpolate!("{}/*/*", api.execution_arn())),
        },
    )?;

    ctx.export(URL_OUTPUT, api.api_endpoint())?;
    tracing::debug!(stack = ctx.stack(), nodes = ctx.node_count(), "declared hello stack");

    Ok(HelloStack {
        role,
        attachment,
        function,
        api,
        stage,
        integration,
        route,
        permission,
    })
}

/// Declare and validate the stack on its own
///
/// # Errors
/// [`GraphError`] from declaration or validation.
pub fn hello_graph(stack: &str, options: &HelloOptions) -> Result<ValidatedGraph, GraphError> {
    let mut ctx = GraphBuilder::new(stack);
    declare_hello_stack(&mut ctx, options)?;
    ctx.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_has_expected_levels() {
        let graph = hello_graph("dev", &HelloOptions::default()).unwrap();
        assert_eq!(graph.node_count(), 8);
        let levels: Vec<Vec<&str>> = graph
            .levels()
            .iter()
            .map(|l| l.iter().map(|n| n.as_str()).collect())
            .collect();
        assert!(levels[0].contains(&"lambdaRole"));
        assert!(levels[0].contains(&"httpApi"));
        assert!(levels[1].contains(&"myLambdaFunction"));
        assert!(levels[1].contains(&"lambdaRoleAttachment"));
        assert!(levels[1].contains(&"stage"));
        assert!(levels[2].contains(&"lambdaIntegration"));
        assert!(levels[2].contains(&"apiGatewayPermission"));
        assert_eq!(levels[3], vec!["route"]);
    }

    #[test]
    fn handles_carry_logical_names() {
        let mut ctx = GraphBuilder::new("dev");
        let stack = declare_hello_stack(&mut ctx, &HelloOptions::default()).unwrap();
        assert_eq!(stack.function.logical_name().as_str(), "myLambdaFunction");
        assert_eq!(stack.permission.logical_name().as_str(), "apiGatewayPermission");
        assert_eq!(stack.api.handle().resource_type().as_str(), Api::TYPE);
        assert!(stack.route.is_some());
        assert_eq!(ctx.node_count(), 8);
    }

    #[test]
    fn route_is_optional() {
        let graph = hello_graph("dev", &HelloOptions::new().with_route(false)).unwrap();
        assert_eq!(graph.node_count(), 7);
        assert!(!graph.contains("route"));
    }

    #[test]
    fn declaring_twice_into_one_builder_conflicts() {
        let mut ctx = GraphBuilder::new("dev");
        declare_hello_stack(&mut ctx, &HelloOptions::default()).unwrap();
        let err = declare_hello_stack(&mut ctx, &HelloOptions::default()).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateName(_)));
    }
}
