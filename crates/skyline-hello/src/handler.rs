//! The greeting function

use serde_json::{json, Value};
use skyline_aws::{AssetArchive, HandlerError, SimulatedCloud, StringAsset};
use std::sync::Arc;

/// Entry point, `module.export`
pub const ENTRY_POINT: &str = "index.handler";

/// Greeting the function returns, before JSON encoding
pub const GREETING: &str = "Hello, World!";

/// Source shipped in the code archive as `index.js`
pub const HANDLER_SOURCE: &str = "exports.handler = async (event) => {\n    \
                                  return {\n        \
                                  statusCode: 200,\n        \
                                  body: JSON.stringify(\"Hello, World!\")\n    \
                                  };\n\
                                  };\n";

/// Code archive holding [`HANDLER_SOURCE`]
#[must_use]
pub fn code_archive() -> AssetArchive {
    AssetArchive::new().with_asset("index.js", StringAsset::new(HANDLER_SOURCE))
}

/// Native stand-in for [`HANDLER_SOURCE`]
///
/// # Errors
/// Never; the signature matches every function handler.
pub fn hello_handler(_event: &Value) -> Result<Value, HandlerError> {
    Ok(json!({
        "statusCode": 200,
        "body": Value::from(GREETING).to_string(),
    }))
}

/// Register [`hello_handler`] at [`ENTRY_POINT`]
pub fn register(cloud: &SimulatedCloud) {
    cloud.register_handler(ENTRY_POINT, Arc::new(hello_handler));
}
