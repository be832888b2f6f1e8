//! Error types for graph construction and deferred-value resolution

use crate::types::NodeName;

/// Errors raised while declaring or validating a deployment graph.
///
/// All of these surface before any provider call is made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Node name is empty or contains characters outside `[A-Za-z0-9._-]`
    #[error("invalid node name {name:?}: {reason}")]
    InvalidName {
        /// The rejected name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Two declarations share one name
    #[error("node `{0}` is declared more than once")]
    DuplicateName(NodeName),

    /// Two exports share one name
    #[error("output `{0}` is exported more than once")]
    DuplicateExport(String),

    /// A node, explicit dependency or export references an undeclared node
    #[error("`{referrer}` references undeclared node `{reference}`")]
    DanglingReference {
        /// The node (or `output <name>`) holding the reference
        referrer: String,
        /// The name that could not be found
        reference: NodeName,
    },

    /// Resolution dependencies form a cycle
    #[error("cycle detected among nodes [{}]", join_names(.cycle))]
    CycleDetected {
        /// Members of the strongly connected component, in declaration order
        cycle: Vec<NodeName>,
    },
}

impl GraphError {
    /// Whether this error was caused by a reference to a missing node
    #[inline]
    #[must_use]
    pub fn is_dangling(&self) -> bool {
        matches!(self, Self::DanglingReference { .. })
    }

    /// Whether this error was caused by a dependency cycle
    #[inline]
    #[must_use]
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::CycleDetected { .. })
    }
}

/// Errors raised while resolving a deferred value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    /// The referenced node has not been provisioned yet
    #[error("`{node}.{attribute}` is not known until `{node}` is provisioned")]
    Unknown {
        /// Node the value depends on
        node: NodeName,
        /// Requested attribute
        attribute: String,
    },

    /// The node exists but exposes no such attribute
    #[error("`{node}` has no attribute `{attribute}`")]
    MissingAttribute {
        /// Node that was queried
        node: NodeName,
        /// Requested attribute
        attribute: String,
    },

    /// The attribute exists but does not have the requested shape
    #[error("`{node}.{attribute}` has an unexpected shape: {message}")]
    Type {
        /// Node that was queried
        node: NodeName,
        /// Requested attribute
        attribute: String,
        /// Deserialization message
        message: String,
    },

    /// A composed value could not be rendered
    #[error("failed to render deferred value: {0}")]
    Render(String),
}

impl ResolveError {
    /// Whether the value is merely not known yet (as opposed to malformed)
    #[inline]
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }
}

fn join_names(names: &[NodeName]) -> String {
    names
        .iter()
        .map(NodeName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_members() {
        let err = GraphError::CycleDetected {
            cycle: vec![NodeName::new("a").unwrap(), NodeName::new("b").unwrap()],
        };
        assert_eq!(err.to_string(), "cycle detected among nodes [a, b]");
        assert!(err.is_cycle());
        assert!(!err.is_dangling());
    }

    #[test]
    fn dangling_message_names_both_sides() {
        let err = GraphError::DanglingReference {
            referrer: "myLambdaFunction".into(),
            reference: NodeName::new("lambdaRol").unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "`myLambdaFunction` references undeclared node `lambdaRol`"
        );
    }
}
