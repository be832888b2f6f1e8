//! Shared AWS value types

use serde::{Deserialize, Serialize};
use std::fmt;

/// `aws:iam/role:Role`
pub const ROLE: &str = "aws:iam/role:Role";
/// `aws:iam/rolePolicyAttachment:RolePolicyAttachment`
pub const ROLE_POLICY_ATTACHMENT: &str = "aws:iam/rolePolicyAttachment:RolePolicyAttachment";
/// `aws:lambda/function:Function`
pub const FUNCTION: &str = "aws:lambda/function:Function";
/// `aws:lambda/permission:Permission`
pub const PERMISSION: &str = "aws:lambda/permission:Permission";
/// `aws:apigatewayv2/api:Api`
pub const API: &str = "aws:apigatewayv2/api:Api";
/// `aws:apigatewayv2/stage:Stage`
pub const STAGE: &str = "aws:apigatewayv2/stage:Stage";
/// `aws:apigatewayv2/integration:Integration`
pub const INTEGRATION: &str = "aws:apigatewayv2/integration:Integration";
/// `aws:apigatewayv2/route:Route`
pub const ROUTE: &str = "aws:apigatewayv2/route:Route";

/// Function runtime identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Runtime {
    /// Node.js 18
    #[serde(rename = "nodejs18.x")]
    NodeJs18x,
    /// Node.js 20
    #[serde(rename = "nodejs20.x")]
    NodeJs20x,
    /// Python 3.12
    #[serde(rename = "python3.12")]
    Python312,
    /// Custom runtime on Amazon Linux 2023
    #[serde(rename = "provided.al2023")]
    ProvidedAl2023,
}

impl Runtime {
    /// Wire identifier
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NodeJs18x => "nodejs18.x",
            Self::NodeJs20x => "nodejs20.x",
            Self::Python312 => "python3.12",
            Self::ProvidedAl2023 => "provided.al2023",
        }
    }

    /// Parse a wire identifier
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        [
            Self::NodeJs18x,
            Self::NodeJs20x,
            Self::Python312,
            Self::ProvidedAl2023,
        ]
        .into_iter()
        .find(|r| r.as_str() == value)
    }

    /// File extensions a handler module may have in the code archive
    #[must_use]
    pub fn module_extensions(self) -> &'static [&'static str] {
        match self {
            Self::NodeJs18x | Self::NodeJs20x => &["js", "mjs", "cjs"],
            Self::Python312 => &["py"],
            Self::ProvidedAl2023 => &[],
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// API protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProtocolType {
    /// HTTP API
    Http,
    /// WebSocket API
    #[serde(rename = "WEBSOCKET")]
    WebSocket,
}

/// API Gateway integration type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrationType {
    /// Lambda proxy integration
    AwsProxy,
    /// HTTP proxy integration
    HttpProxy,
    /// Mock integration
    Mock,
}

/// Allow or deny
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Allow
    Allow,
    /// Deny
    Deny,
}

/// Principal of a trust policy statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Principal {
    /// Service principal, e.g. `lambda.amazonaws.com`
    pub service: String,
}

/// One policy statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    /// Action, e.g. `sts:AssumeRole`
    pub action: String,
    /// Effect
    pub effect: Effect,
    /// Principal
    pub principal: Principal,
}

/// IAM policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// Policy language version
    pub version: String,
    /// Statements
    pub statement: Vec<PolicyStatement>,
}

impl PolicyDocument {
    /// Policy language version used by every document built here
    pub const VERSION: &'static str = "2012-10-17";

    /// Trust policy letting `service` assume the role
    #[must_use]
    pub fn assume_role(service: impl Into<String>) -> Self {
        Self {
            version: Self::VERSION.to_owned(),
            statement: vec![PolicyStatement {
                action: "sts:AssumeRole".to_owned(),
                effect: Effect::Allow,
                principal: Principal {
                    service: service.into(),
                },
            }],
        }
    }

    /// Whether `service` is allowed to assume a role with this policy
    #[must_use]
    pub fn trusts(&self, service: &str) -> bool {
        self.statement.iter().any(|s| {
            s.effect == Effect::Allow && s.action == "sts:AssumeRole" && s.principal.service == service
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trust_policy_serializes_in_iam_shape() {
        let policy = PolicyDocument::assume_role("lambda.amazonaws.com");
        assert_eq!(
            serde_json::to_value(&policy).unwrap(),
            json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Action": "sts:AssumeRole",
                    "Effect": "Allow",
                    "Principal": {"Service": "lambda.amazonaws.com"}
                }]
            })
        );
        assert!(policy.trusts("lambda.amazonaws.com"));
        assert!(!policy.trusts("ec2.amazonaws.com"));
    }

    #[test]
    fn enums_use_wire_names() {
        assert_eq!(serde_json::to_value(Runtime::NodeJs20x).unwrap(), json!("nodejs20.x"));
        assert_eq!(Runtime::parse("nodejs20.x"), Some(Runtime::NodeJs20x));
        assert_eq!(Runtime::parse("nodejs4.3"), None);
        assert_eq!(serde_json::to_value(ProtocolType::Http).unwrap(), json!("HTTP"));
        assert_eq!(serde_json::to_value(ProtocolType::WebSocket).unwrap(), json!("WEBSOCKET"));
        assert_eq!(serde_json::to_value(IntegrationType::AwsProxy).unwrap(), json!("AWS_PROXY"));
    }
}
