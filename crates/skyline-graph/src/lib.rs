//! Skyline Graph - deployment graph construction
//!
//! Declares named resource nodes, their configuration payloads and the
//! references between them. Values that only exist once another node is
//! provisioned are modelled as deferred [`Output<T>`] cells; composing them
//! never blocks declaration.
//!
//! # Core Concepts
//!
//! - [`GraphBuilder`]: explicit declaration context passed to every constructor
//! - [`Output<T>`]: deferred value with pure `map`/`zip`/`all` composition
//! - [`interpolate!`]: string templating over deferred values
//! - [`ValidatedGraph`]: sealed graph, free of dangling references and cycles
//!
//! # Example
//!
//! ```rust
//! use skyline_graph::{interpolate, GraphBuilder, Properties};
//!
//! let mut builder = GraphBuilder::new("dev");
//! let api = builder.declare("httpApi", "aws:apigatewayv2/api:Api", Properties::new()).unwrap();
//! let integration = builder
//!     .declare("lambdaIntegration", "aws:apigatewayv2/integration:Integration",
//!         Properties::new().set("apiId", api.id()))
//!     .unwrap();
//! builder
//!     .declare("route", "aws:apigatewayv2/route:Route", Properties::new()
//!         .set("apiId", api.id())
//!         .set("target", interpolate!("integrations/{}", integration.id())))
//!     .unwrap();
//!
//! let graph = builder.build().unwrap();
//! assert_eq!(graph.levels().len(), 3);
//! ```

#![warn(unreachable_pub)]

pub mod builder;
pub mod dag;
pub mod error;
pub mod output;
pub mod properties;
pub mod types;
pub mod validated;

pub use builder::{DeclareOptions, GraphBuilder, NodeDecl, ResourceHandle};
pub use dag::DependencyDag;
pub use error::{GraphError, ResolveError};
pub use output::{AttributeSource, Input, Output};
pub use properties::{PartialProperties, Properties};
pub use types::{NodeName, ResourceType};
pub use validated::ValidatedGraph;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for declaring graphs
    pub use crate::{
        interpolate, DeclareOptions, GraphBuilder, GraphError, Input, NodeName, Output,
        Properties, ResourceHandle, ValidatedGraph,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
