//! Error types for the provisioning engine
//!
//! Apply-time failures of individual nodes are not errors of the engine:
//! they are reported as [`NodeFailure`] data inside the apply report so
//! partial progress is preserved. [`EngineError`] is reserved for
//! conditions that prevent an apply from starting at all.

use skyline_graph::ResolveError;
use std::path::PathBuf;

/// Category of a provider-side failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ProviderErrorKind {
    /// Caller lacks permission, or a referenced principal does not exist
    PermissionDenied,
    /// A quota or resource cap was hit
    LimitExceeded,
    /// An explicit name is already taken
    NamingConflict,
    /// The resource id is unknown to the provider
    NotFound,
    /// Required input missing or malformed
    InvalidInput,
    /// Anything else
    Internal,
}

impl ProviderErrorKind {
    /// Wire-style error code
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::PermissionDenied => "AccessDenied",
            Self::LimitExceeded => "LimitExceeded",
            Self::NamingConflict => "ResourceConflict",
            Self::NotFound => "ResourceNotFound",
            Self::InvalidInput => "ValidationError",
            Self::Internal => "InternalFailure",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Failure reported by a [`Provider`](crate::Provider)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    /// Failure category
    pub kind: ProviderErrorKind,
    /// Provider message
    pub message: String,
}

impl ProviderError {
    /// Create new provider error
    #[must_use]
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Permission denied
    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::PermissionDenied, message)
    }

    /// Resource cap exceeded
    #[must_use]
    pub fn limit_exceeded(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::LimitExceeded, message)
    }

    /// Explicit name already taken
    #[must_use]
    pub fn naming_conflict(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NamingConflict, message)
    }

    /// Unknown resource id
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, message)
    }

    /// Malformed input
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidInput, message)
    }
}

/// Why a single node failed during apply
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NodeFailure {
    /// The provider rejected the operation
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Inputs could not be resolved against live state
    #[error("input resolution failed: {0}")]
    Resolve(#[from] ResolveError),
}

/// State persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Reading or writing the state file failed
    #[error("state I/O failed at {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The state file is not valid JSON for a state record
    #[error("state serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors that stop an apply or destroy before it starts
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// State could not be loaded or saved
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// The state record belongs to another stack
    #[error("state belongs to stack `{found}`, expected `{expected}`")]
    StackMismatch {
        /// Stack of the graph
        expected: String,
        /// Stack of the state record
        found: String,
    },

    /// The apply journal was tampered with
    #[error("journal integrity violated at entry {sequence}")]
    JournalIntegrity {
        /// First entry that failed verification
        sequence: u64,
    },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading the configuration file failed
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override could not be parsed
    #[error("invalid value {value:?} for {var}")]
    Env {
        /// Variable name
        var: &'static str,
        /// Offending value
        value: String,
    },

    /// A value is out of range
    #[error("invalid config value: {0}")]
    Invalid(String),
}
