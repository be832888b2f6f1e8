//! Diffing desired against recorded state

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use skyline_graph::{NodeName, ResourceType};
use std::collections::BTreeSet;
use std::fmt;

/// What applying a node will do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Not recorded yet
    Create,
    /// Changed in place
    Update,
    /// A replace key changed: create the new resource, delete the old one
    /// once its dependents moved
    Replace,
    /// Unchanged, no provider call
    Same,
    /// Recorded but no longer declared
    Delete,
}

impl StepKind {
    /// Symbol used in previews
    #[must_use]
    pub fn symbol(self) -> char {
        match self {
            Self::Create => '+',
            Self::Update => '~',
            Self::Replace => '±',
            Self::Same => ' ',
            Self::Delete => '-',
        }
    }

    /// Whether the step calls the provider
    #[must_use]
    pub fn is_change(self) -> bool {
        self != Self::Same
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Same => "same",
            Self::Delete => "delete",
        };
        f.write_str(label)
    }
}

/// Planned action for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Node name
    pub name: NodeName,
    /// Provider type token
    pub resource_type: ResourceType,
    /// Planned action
    pub kind: StepKind,
    /// Input keys that differ from the recorded state
    pub changed: Vec<String>,
    /// Input keys that cannot be known until upstream nodes are applied
    pub computed: Vec<String>,
}

/// Ordered steps of a preview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Stack name
    pub stack: String,
    /// Declared nodes in topological order, then deletions
    pub steps: Vec<Step>,
}

/// Step counts by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    /// Creates
    pub create: usize,
    /// In-place updates
    pub update: usize,
    /// Replacements
    pub replace: usize,
    /// Unchanged
    pub same: usize,
    /// Deletions
    pub delete: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.same
        )
    }
}

impl Plan {
    /// Whether applying would change nothing
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.steps.iter().all(|s| !s.kind.is_change())
    }

    /// Step for one node
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name.as_str() == name)
    }

    /// Steps of one kind
    pub fn steps_of(&self, kind: StepKind) -> impl Iterator<Item = &Step> + '_ {
        self.steps.iter().filter(move |s| s.kind == kind)
    }

    /// Counts by kind
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for step in &self.steps {
            let slot = match step.kind {
                StepKind::Create => &mut summary.create,
                StepKind::Update => &mut summary.update,
                StepKind::Replace => &mut summary.replace,
                StepKind::Same => &mut summary.same,
                StepKind::Delete => &mut summary.delete,
            };
            *slot += 1;
        }
        summary
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Previewing stack {}", self.stack)?;
        for step in &self.steps {
            write!(f, "  {} {} ({})", step.kind.symbol(), step.name, step.resource_type)?;
            if !step.changed.is_empty() {
                write!(f, " [{}]", step.changed.join(", "))?;
            }
            writeln!(f)?;
        }
        write!(f, "{}", self.summary())
    }
}

/// Keys whose values differ between two input maps, sorted
#[must_use]
pub fn diff_keys(old: &Map<String, Value>, new: &Map<String, Value>) -> Vec<String> {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    keys.into_iter()
        .filter(|k| old.get(*k) != new.get(*k))
        .cloned()
        .collect()
}

/// Decide the step for a recorded node given its changed keys
#[must_use]
pub fn classify(changed: &[String], replace_keys: &[&str], type_changed: bool) -> StepKind {
    if type_changed || changed.iter().any(|k| replace_keys.contains(&k.as_str())) {
        StepKind::Replace
    } else if changed.is_empty() {
        StepKind::Same
    } else {
        StepKind::Update
    }
}
