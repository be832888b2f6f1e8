//! Skyline Hello - the hello-world HTTP stack
//!
//! An IAM role, a function that answers `"Hello, World!"`, an HTTP API with
//! a `$default` stage, a proxy integration, the `POST /hello` route and the
//! permission letting the API invoke the function. The API endpoint is
//! exported as `url`.
//!
//! # Example
//!
//! ```rust,ignore
//! use skyline_hello::{hello_graph, register, HelloOptions};
//!
//! let graph = hello_graph("dev", &HelloOptions::default())?;
//! let cloud = Arc::new(SimulatedCloud::new(&config));
//! register(&cloud);
//! let report = Engine::new(cloud.clone()).apply(&graph, StateRecord::new("dev")).await?;
//! let url = report.outputs["url"].as_str().unwrap_or_default();
//! cloud.invoke(url, &HttpRequest::new("POST", "/hello"))?;
//! ```

#![warn(unreachable_pub)]

pub mod handler;
pub mod stack;

pub use handler::{code_archive, hello_handler, register, ENTRY_POINT, GREETING, HANDLER_SOURCE};
pub use stack::{declare_hello_stack, hello_graph, HelloOptions, HelloStack, ROUTE_KEY, URL_OUTPUT};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
