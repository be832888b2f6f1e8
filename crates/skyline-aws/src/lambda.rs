//! Lambda resources

use crate::asset::AssetArchive;
use crate::types::{Runtime, FUNCTION, PERMISSION};
use crate::Resource;
use skyline_graph::{DeclareOptions, GraphBuilder, GraphError, Input, Output, Properties, ResourceHandle};

/// Arguments of [`Function`]
#[derive(Debug, Clone)]
pub struct FunctionArgs {
    /// Explicit function name; generated from the node name when absent
    pub name: Option<Input<String>>,
    /// Runtime identifier
    pub runtime: Input<Runtime>,
    /// Code bundle
    pub code: Input<AssetArchive>,
    /// Entry point, `module.export`
    pub handler: Input<String>,
    /// ARN of the execution role
    pub role: Input<String>,
}

impl FunctionArgs {
    fn into_properties(self) -> Properties {
        Properties::new()
            .set_optional("name", self.name)
            .set("runtime", self.runtime)
            .set("code", self.code)
            .set("handler", self.handler)
            .set("role", self.role)
    }
}

/// Serverless function
#[derive(Debug, Clone)]
pub struct Function {
    handle: ResourceHandle,
}

impl Function {
    /// Declare a function
    ///
    /// # Errors
    /// [`GraphError`] if the node name is invalid or taken.
    pub fn new(ctx: &mut GraphBuilder, name: &str, args: FunctionArgs) -> Result<Self, GraphError> {
        Self::new_with(ctx, name, args, DeclareOptions::default())
    }

    /// Declare a function with options
    ///
    /// # Errors
    /// [`GraphError`] if the node name is invalid or taken.
    pub fn new_with(
        ctx: &mut GraphBuilder,
        name: &str,
        args: FunctionArgs,
        options: DeclareOptions,
    ) -> Result<Self, GraphError> {
        let handle = ctx.declare_with(name, FUNCTION, args.into_properties(), options)?;
        Ok(Self { handle })
    }

    /// Function name
    #[must_use]
    pub fn name(&self) -> Output<String> {
        self.handle.output("name")
    }

    /// Function ARN
    #[must_use]
    pub fn arn(&self) -> Output<String> {
        self.handle.output("arn")
    }

    /// ARN API Gateway uses to invoke the function
    #[must_use]
    pub fn invoke_arn(&self) -> Output<String> {
        self.handle.output("invokeArn")
    }
}

impl Resource for Function {
    const TYPE: &'static str = FUNCTION;

    fn handle(&self) -> &ResourceHandle {
        &self.handle
    }
}

/// Arguments of [`Permission`]
#[derive(Debug, Clone)]
pub struct PermissionArgs {
    /// Action granted, e.g. `lambda:InvokeFunction`
    pub action: Input<String>,
    /// Function name or ARN
    pub function: Input<String>,
    /// Service principal granted the action
    pub principal: Input<String>,
    /// ARN pattern the call must originate from
    pub source_arn: Option<Input<String>>,
}

/// Resource-based grant on a function
#[derive(Debug, Clone)]
pub struct Permission {
    handle: ResourceHandle,
}

impl Permission {
    /// Declare a permission
    ///
    /// # Errors
    /// [`GraphError`] if the node name is invalid or taken.
    pub fn new(ctx: &mut GraphBuilder, name: &str, args: PermissionArgs) -> Result<Self, GraphError> {
        let properties = Properties::new()
            .set("action", args.action)
            .set("function", args.function)
            .set("principal", args.principal)
            .set_optional("sourceArn", args.source_arn);
        let handle = ctx.declare(name, PERMISSION, properties)?;
        Ok(Self { handle })
    }

    /// Statement id assigned to the grant
    #[must_use]
    pub fn statement_id(&self) -> Output<String> {
        self.handle.output("statementId")
    }
}

impl Resource for Permission {
    const TYPE: &'static str = PERMISSION;

    fn handle(&self) -> &ResourceHandle {
        &self.handle
    }
}
