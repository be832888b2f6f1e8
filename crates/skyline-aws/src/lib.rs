//! Skyline AWS - typed AWS resource nodes and a simulated provider
//!
//! Each resource type is a thin constructor over [`GraphBuilder::declare`]
//! that turns typed arguments into node properties and exposes the
//! attributes other nodes may reference as [`Output`] values.
//!
//! # Core Concepts
//!
//! - [`iam`], [`lambda`], [`apigatewayv2`]: resource constructors
//! - [`Resource`]: common access to a declared node
//! - [`SimulatedCloud`]: in-memory provider with AWS naming, ARNs and failure modes
//! - [`SimulatedCloud::invoke`]: HTTP requests through a deployed API
//!
//! # Example
//!
//! ```rust
//! use skyline_aws::prelude::*;
//! use skyline_graph::GraphBuilder;
//!
//! let mut ctx = GraphBuilder::new("dev");
//! let role = Role::new(
//!     &mut ctx,
//!     "lambdaRole",
//!     RoleArgs::new(PolicyDocument::assume_role("lambda.amazonaws.com")),
//! )
//! .unwrap();
//! RolePolicyAttachment::new(
//!     &mut ctx,
//!     "lambdaRoleAttachment",
//!     RolePolicyAttachmentArgs {
//!         role: role.name(),
//!         policy_arn: AWS_LAMBDA_BASIC_EXECUTION_ROLE.into(),
//!     },
//! )
//! .unwrap();
//!
//! let graph = ctx.build().unwrap();
//! assert_eq!(graph.topological_order()[0].as_str(), "lambdaRole");
//! ```

#![warn(unreachable_pub)]

pub mod apigatewayv2;
pub mod asset;
pub mod iam;
pub mod lambda;
pub mod sim;
pub mod types;

use skyline_graph::{NodeName, Output, ResourceHandle};

/// A declared AWS resource
pub trait Resource {
    /// Provider type token
    const TYPE: &'static str;

    /// Handle of the underlying graph node
    fn handle(&self) -> &ResourceHandle;

    /// Logical node name
    fn logical_name(&self) -> &NodeName {
        self.handle().name()
    }

    /// Provider-assigned id
    fn id(&self) -> Output<String> {
        self.handle().id()
    }
}

pub use apigatewayv2::{
    Api, ApiArgs, Integration, IntegrationArgs, Route, RouteArgs, Stage, StageArgs, DEFAULT_STAGE,
};
pub use asset::{AssetArchive, StringAsset};
pub use iam::{
    Role, RoleArgs, RolePolicyAttachment, RolePolicyAttachmentArgs,
    AWS_LAMBDA_BASIC_EXECUTION_ROLE,
};
pub use lambda::{Function, FunctionArgs, Permission, PermissionArgs};
pub use sim::{
    CloudSnapshot, FunctionHandler, HandlerError, HttpRequest, HttpResponse, InvokeError,
    SimulatedCloud,
};
pub use types::{IntegrationType, PolicyDocument, ProtocolType, Runtime};

/// Prelude for declaring stacks
pub mod prelude {
    pub use crate::apigatewayv2::{
        Api, ApiArgs, Integration, IntegrationArgs, Route, RouteArgs, Stage, StageArgs,
        DEFAULT_STAGE,
    };
    pub use crate::asset::{AssetArchive, StringAsset};
    pub use crate::iam::{
        Role, RoleArgs, RolePolicyAttachment, RolePolicyAttachmentArgs,
        AWS_LAMBDA_BASIC_EXECUTION_ROLE,
    };
    pub use crate::lambda::{Function, FunctionArgs, Permission, PermissionArgs};
    pub use crate::types::{IntegrationType, PolicyDocument, ProtocolType, Runtime};
    pub use crate::Resource;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
