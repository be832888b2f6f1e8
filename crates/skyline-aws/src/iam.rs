//! IAM resources

use crate::types::{PolicyDocument, ROLE, ROLE_POLICY_ATTACHMENT};
use crate::Resource;
use skyline_graph::{DeclareOptions, GraphBuilder, GraphError, Input, Output, Properties, ResourceHandle};

/// Managed policy granting a function permission to write its logs
pub const AWS_LAMBDA_BASIC_EXECUTION_ROLE: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

/// Arguments of [`Role`]
#[derive(Debug, Clone)]
pub struct RoleArgs {
    /// Explicit role name; generated from the node name when absent
    pub name: Option<Input<String>>,
    /// Trust policy naming who may assume the role
    pub assume_role_policy: Input<PolicyDocument>,
}

impl RoleArgs {
    /// Create new role arguments
    #[must_use]
    pub fn new(assume_role_policy: impl Into<Input<PolicyDocument>>) -> Self {
        Self {
            name: None,
            assume_role_policy: assume_role_policy.into(),
        }
    }

    /// With an explicit role name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<Input<String>>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn into_properties(self) -> Properties {
        Properties::new()
            .set_optional("name", self.name)
            .set("assumeRolePolicy", self.assume_role_policy)
    }
}

/// IAM role
#[derive(Debug, Clone)]
pub struct Role {
    handle: ResourceHandle,
}

impl Role {
    /// Declare a role
    ///
    /// # Errors
    /// [`GraphError`] if the node name is invalid or taken.
    pub fn new(ctx: &mut GraphBuilder, name: &str, args: RoleArgs) -> Result<Self, GraphError> {
        Self::new_with(ctx, name, args, DeclareOptions::default())
    }

    /// Declare a role with options
    ///
    /// # Errors
    /// [`GraphError`] if the node name is invalid or taken.
    pub fn new_with(
        ctx: &mut GraphBuilder,
        name: &str,
        args: RoleArgs,
        options: DeclareOptions,
    ) -> Result<Self, GraphError> {
        let handle = ctx.declare_with(name, ROLE, args.into_properties(), options)?;
        Ok(Self { handle })
    }

    /// Role name
    #[must_use]
    pub fn name(&self) -> Output<String> {
        self.handle.output("name")
    }

    /// Role ARN
    #[must_use]
    pub fn arn(&self) -> Output<String> {
        self.handle.output("arn")
    }
}

impl Resource for Role {
    const TYPE: &'static str = ROLE;

    fn handle(&self) -> &ResourceHandle {
        &self.handle
    }
}

/// Arguments of [`RolePolicyAttachment`]
#[derive(Debug, Clone)]
pub struct RolePolicyAttachmentArgs {
    /// Name of the role
    pub role: Input<String>,
    /// ARN of the managed policy
    pub policy_arn: Input<String>,
}

/// Binds a managed policy to a role
#[derive(Debug, Clone)]
pub struct RolePolicyAttachment {
    handle: ResourceHandle,
}

impl RolePolicyAttachment {
    /// Declare an attachment
    ///
    /// # Errors
    /// [`GraphError`] if the node name is invalid or taken.
    pub fn new(
        ctx: &mut GraphBuilder,
        name: &str,
        args: RolePolicyAttachmentArgs,
    ) -> Result<Self, GraphError> {
        let properties = Properties::new()
            .set("role", args.role)
            .set("policyArn", args.policy_arn);
        let handle = ctx.declare(name, ROLE_POLICY_ATTACHMENT, properties)?;
        Ok(Self { handle })
    }
}

impl Resource for RolePolicyAttachment {
    const TYPE: &'static str = ROLE_POLICY_ATTACHMENT;

    fn handle(&self) -> &ResourceHandle {
        &self.handle
    }
}
