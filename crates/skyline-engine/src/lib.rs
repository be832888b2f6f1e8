//! Skyline Engine - provisioning engine
//!
//! Reconciles a validated deployment graph against the recorded state of a
//! stack through a pluggable [`Provider`].
//!
//! # Core Concepts
//!
//! - [`Provider`]: remote create/update/delete for one resource
//! - [`Engine::preview`]: diff without provider calls
//! - [`Engine::apply`]: wave-parallel reconciliation with partial-failure tolerance
//! - [`StateRecord`]: declared names mapped to live resources, plus a hash-chained journal
//! - [`StateStore`]: persistence for state records
//!
//! # Example
//!
//! ```rust,ignore
//! use skyline_engine::{Engine, FileStateStore, StateStore};
//!
//! let store = FileStateStore::new(".skyline");
//! let engine = Engine::new(provider);
//! let report = engine.apply(&graph, store.load_or_new("dev")?).await?;
//! store.save(&report.state)?;
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod engine;
pub mod error;
pub mod journal;
pub mod plan;
pub mod provider;
pub mod state;

pub use config::SkylineConfig;
pub use engine::{ApplyReport, Engine, NodeOutcome};
pub use error::{
    ConfigError, EngineError, NodeFailure, ProviderError, ProviderErrorKind, StateError,
};
pub use journal::{Journal, JournalEntry};
pub use plan::{Plan, PlanSummary, Step, StepKind};
pub use provider::{Provider, ProviderResource};
pub use state::{
    FileStateStore, MemoryStateStore, PendingDelete, ResourceState, StateRecord, StateStore,
    UpdateInfo, UpdateKind,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
