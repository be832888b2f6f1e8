//! Deferred values
//!
//! An [`Output<T>`] is a value that may not be known while the graph is
//! being declared: the ARN of a role, the id of an API. It carries the set
//! of nodes it depends on plus a pure resolver. Composition (`map`, `zip`,
//! `all`, [`interpolate!`](crate::interpolate)) never blocks the
//! declaration; it produces a new cell whose dependencies are the union of
//! its inputs, resolved transitively once every input is live.

use crate::error::ResolveError;
use crate::types::NodeName;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Read access to resolved node attributes.
///
/// Implemented by the engine's state record; tests can implement it over a
/// plain map.
pub trait AttributeSource {
    /// Look up `attribute` of `node`
    ///
    /// # Errors
    /// [`ResolveError::Unknown`] if the node has not resolved yet,
    /// [`ResolveError::MissingAttribute`] if it has no such attribute.
    fn attribute(&self, node: &NodeName, attribute: &str) -> Result<Value, ResolveError>;
}

type Resolver<T> = Arc<dyn Fn(&dyn AttributeSource) -> Result<T, ResolveError> + Send + Sync>;

/// A deferred, possibly not-yet-known value
pub struct Output<T> {
    dependencies: BTreeSet<NodeName>,
    resolver: Resolver<T>,
}

/// Resource arguments accept either literals or deferred values
pub type Input<T> = Output<T>;

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            dependencies: self.dependencies.clone(),
            resolver: Arc::clone(&self.resolver),
        }
    }
}

impl<T> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

impl<T> Output<T> {
    /// Nodes this value depends on
    #[inline]
    #[must_use]
    pub fn dependencies(&self) -> &BTreeSet<NodeName> {
        &self.dependencies
    }

    /// Whether the value is fixed at declaration time
    #[inline]
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Resolve against the attributes currently available
    ///
    /// # Errors
    /// Propagates the first [`ResolveError`] hit by any input.
    pub fn resolve(&self, source: &dyn AttributeSource) -> Result<T, ResolveError> {
        (self.resolver)(source)
    }
}

impl<T: 'static> Output<T> {
    fn from_parts(
        dependencies: BTreeSet<NodeName>,
        resolver: impl Fn(&dyn AttributeSource) -> Result<T, ResolveError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            dependencies,
            resolver: Arc::new(resolver),
        }
    }

    /// A value known at declaration time
    pub fn known(value: T) -> Self
    where
        T: Clone + Send + Sync,
    {
        Self::from_parts(BTreeSet::new(), move |_| Ok(value.clone()))
    }

    /// Attribute `attribute` of node `node`, looked up by name.
    ///
    /// The node does not have to be declared yet; a name that is never
    /// declared is rejected when the graph is built.
    pub fn attribute(node: NodeName, attribute: impl Into<String>) -> Self
    where
        T: DeserializeOwned,
    {
        let attribute = attribute.into();
        let dependencies = BTreeSet::from([node.clone()]);
        Self::from_parts(dependencies, move |source| {
            let value = source.attribute(&node, &attribute)?;
            serde_json::from_value(value).map_err(|e| ResolveError::Type {
                node: node.clone(),
                attribute: attribute.clone(),
                message: e.to_string(),
            })
        })
    }

    /// Transform the eventual value
    #[must_use]
    pub fn map<U, F>(&self, f: F) -> Output<U>
    where
        U: 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let inner = Arc::clone(&self.resolver);
        Output::from_parts(self.dependencies.clone(), move |source| {
            inner(source).map(&f)
        })
    }

    /// Transform the eventual value with a fallible function
    #[must_use]
    pub fn try_map<U, F>(&self, f: F) -> Output<U>
    where
        U: 'static,
        F: Fn(T) -> Result<U, ResolveError> + Send + Sync + 'static,
    {
        let inner = Arc::clone(&self.resolver);
        Output::from_parts(self.dependencies.clone(), move |source| {
            inner(source).and_then(&f)
        })
    }

    /// Combine two deferred values into a pair
    #[must_use]
    pub fn zip<U: 'static>(&self, other: &Output<U>) -> Output<(T, U)> {
        let left = Arc::clone(&self.resolver);
        let right = Arc::clone(&other.resolver);
        let dependencies = self
            .dependencies
            .union(&other.dependencies)
            .cloned()
            .collect();
        Output::from_parts(dependencies, move |source| {
            Ok((left(source)?, right(source)?))
        })
    }

    /// Combine any number of deferred values, preserving order
    pub fn all(outputs: impl IntoIterator<Item = Output<T>>) -> Output<Vec<T>> {
        let outputs: Vec<Output<T>> = outputs.into_iter().collect();
        let dependencies = outputs
            .iter()
            .flat_map(|o| o.dependencies.iter().cloned())
            .collect();
        Output::from_parts(dependencies, move |source| {
            outputs.iter().map(|o| o.resolve(source)).collect()
        })
    }

    /// Erase the value type into JSON
    #[must_use]
    pub fn to_value(&self) -> Output<Value>
    where
        T: Serialize,
    {
        self.try_map(|v| serde_json::to_value(v).map_err(|e| ResolveError::Render(e.to_string())))
    }
}

impl<T: Clone + Send + Sync + 'static> From<T> for Output<T> {
    fn from(value: T) -> Self {
        Self::known(value)
    }
}

impl From<&str> for Output<String> {
    fn from(value: &str) -> Self {
        Self::known(value.to_owned())
    }
}

impl<T> From<&Output<T>> for Output<T> {
    fn from(value: &Output<T>) -> Self {
        value.clone()
    }
}

/// Whether every placeholder of `template` is a bare `{}`.
///
/// `{{` and `}}` are literal braces. Positional (`{0}`), named (`{stage}`)
/// and formatted (`{:?}`) placeholders are rejected, as is a stray brace.
#[doc(hidden)]
#[must_use]
pub const fn has_only_bare_placeholders(template: &str) -> bool {
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let next = if i + 1 < bytes.len() { bytes[i + 1] } else { 0 };
        match bytes[i] {
            b'{' if next == b'{' || next == b'}' => i += 2,
            b'}' if next == b'}' => i += 2,
            b'{' | b'}' => return false,
            _ => i += 1,
        }
    }
    true
}

/// Render a `{}` template over deferred string arguments.
///
/// Used by [`interpolate!`](crate::interpolate), which checks the
/// placeholders at compile time. `{{` and `}}` are literal braces.
#[doc(hidden)]
pub fn render_template(template: &'static str, args: Vec<Output<String>>) -> Output<String> {
    let pieces = split_template(template);
    let expected = pieces.len().saturating_sub(1);
    let found = args.len();
    Output::all(args).try_map(move |values| {
        if values.len() != expected {
            return Err(ResolveError::Render(format!(
                "template {template:?} has {expected} placeholders but {found} arguments"
            )));
        }
        let mut rendered = String::new();
        for (i, piece) in pieces.iter().enumerate() {
            rendered.push_str(piece);
            if let Some(value) = values.get(i) {
                rendered.push_str(value);
            }
        }
        Ok(rendered)
    })
}

fn split_template(template: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                current.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                current.push('}');
            }
            '{' => {
                // placeholder; format specs are ignored
                for inner in chars.by_ref() {
                    if inner == '}' {
                        break;
                    }
                }
                pieces.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    pieces.push(current);
    pieces
}

/// String interpolation over deferred values.
///
/// ```rust
/// use skyline_graph::{interpolate, NodeName, Output};
///
/// let integration_id = Output::<String>::attribute(NodeName::new("lambdaIntegration").unwrap(), "id");
/// let target = interpolate!("integrations/{}", integration_id);
/// assert_eq!(target.dependencies().len(), 1);
/// ```
///
/// Arguments may be `Output<String>`, `&Output<String>`, `String` or `&str`.
///
/// Only bare `{}` placeholders are accepted, one per argument; anything else
/// fails to compile:
///
/// ```rust,compile_fail
/// use skyline_graph::{interpolate, Output};
///
/// let stage = Output::<String>::from("$default");
/// let doubled = interpolate!("{0}-{0}", stage);
/// ```
///
/// ```rust,compile_fail
/// use skyline_graph::interpolate;
///
/// let stage = "$default";
/// let captured = interpolate!("{stage}/*");
/// ```
#[macro_export]
macro_rules! interpolate {
    ($template:literal $(, $arg:expr)* $(,)?) => {{
        const _: () = ::std::assert!(
            $crate::output::has_only_bare_placeholders($template),
            "interpolate! accepts only bare placeholders"
        );
        if false {
            let _ = ::std::format!($template $(, ::std::stringify!($arg))*);
        }
        $crate::output::render_template(
            $template,
            ::std::vec![$($crate::Output::<::std::string::String>::from($arg)),*],
        )
    }};
}
