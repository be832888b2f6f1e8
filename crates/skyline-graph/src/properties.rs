//! Configuration payload of a resource node

use crate::error::ResolveError;
use crate::output::{AttributeSource, Output};
use crate::types::NodeName;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Named input properties of a node, each a deferred JSON value
#[derive(Debug, Clone, Default)]
pub struct Properties {
    entries: BTreeMap<String, Output<Value>>,
}

/// Result of resolving as many properties as currently possible
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialProperties {
    /// Properties whose values are known
    pub known: Map<String, Value>,
    /// Properties that depend on nodes that have not resolved yet
    pub computed: Vec<String>,
}

impl Properties {
    /// Empty property set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a typed property
    #[must_use]
    pub fn set<T>(mut self, key: impl Into<String>, value: Output<T>) -> Self
    where
        T: Serialize + 'static,
    {
        self.entries.insert(key.into(), value.to_value());
        self
    }

    /// Set a property only when a value is given
    #[must_use]
    pub fn set_optional<T>(self, key: impl Into<String>, value: Option<Output<T>>) -> Self
    where
        T: Serialize + 'static,
    {
        match value {
            Some(value) => self.set(key, value),
            None => self,
        }
    }

    /// Number of properties
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no property is set
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Property keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    /// Deferred value of one property
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Output<Value>> {
        self.entries.get(key)
    }

    /// Union of the dependencies of every property
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<NodeName> {
        self.entries
            .values()
            .flat_map(|v| v.dependencies().iter().cloned())
            .collect()
    }

    /// Resolve every property
    ///
    /// # Errors
    /// Returns the first resolution error encountered, in key order.
    pub fn resolve(&self, source: &dyn AttributeSource) -> Result<Map<String, Value>, ResolveError> {
        self.entries
            .iter()
            .map(|(key, value)| Ok((key.clone(), value.resolve(source)?)))
            .collect()
    }

    /// Resolve what is known; anything else is reported as computed
    #[must_use]
    pub fn resolve_partial(&self, source: &dyn AttributeSource) -> PartialProperties {
        let mut partial = PartialProperties::default();
        for (key, value) in &self.entries {
            match value.resolve(source) {
                Ok(v) => {
                    partial.known.insert(key.clone(), v);
                }
                Err(_) => partial.computed.push(key.clone()),
            }
        }
        partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Nothing;

    impl AttributeSource for Nothing {
        fn attribute(&self, node: &NodeName, attribute: &str) -> Result<Value, ResolveError> {
            Err(ResolveError::Unknown {
                node: node.clone(),
                attribute: attribute.into(),
            })
        }
    }

    #[test]
    fn literal_properties_resolve_immediately() {
        let props = Properties::new()
            .set("protocolType", Output::<String>::from("HTTP"))
            .set("autoDeploy", Output::known(true))
            .set_optional::<String>("name", None);
        assert_eq!(props.len(), 2);
        assert!(props.dependencies().is_empty());
        assert_eq!(
            Value::Object(props.resolve(&Nothing).unwrap()),
            json!({"autoDeploy": true, "protocolType": "HTTP"})
        );
    }

    #[test]
    fn partial_resolution_reports_computed_keys() {
        let api = NodeName::new("httpApi").unwrap();
        let props = Properties::new()
            .set("apiId", Output::<String>::attribute(api.clone(), "id"))
            .set("name", Output::<String>::from("$default"));
        assert_eq!(props.dependencies(), BTreeSet::from([api]));

        let partial = props.resolve_partial(&Nothing);
        assert_eq!(partial.computed, vec!["apiId".to_string()]);
        assert_eq!(partial.known.get("name"), Some(&json!("$default")));
        assert!(props.resolve(&Nothing).is_err());
    }
}
