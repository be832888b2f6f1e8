//! Engine and simulation configuration
//!
//! Loaded from TOML with every field optional:
//!
//! ```toml
//! stack = "dev"
//! region = "eu-west-1"
//! parallelism = 8
//! ```
//!
//! `SKYLINE_STACK`, `SKYLINE_REGION` and `SKYLINE_PARALLELISM` override the
//! file when set.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Skyline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SkylineConfig {
    /// Stack name
    pub stack: String,
    /// Cloud region used for ARNs and endpoints
    pub region: String,
    /// Twelve-digit account id used for ARNs
    pub account_id: String,
    /// Maximum nodes applied concurrently within a wave
    pub parallelism: usize,
    /// Seed for generated physical names
    pub seed: u64,
    /// Maximum live resources per type in the simulated cloud
    pub resource_limit: usize,
}

impl Default for SkylineConfig {
    fn default() -> Self {
        Self {
            stack: "dev".to_owned(),
            region: "us-east-1".to_owned(),
            account_id: "123456789012".to_owned(),
            parallelism: 4,
            seed: 42,
            resource_limit: 100,
        }
    }
}

impl SkylineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With stack name
    #[inline]
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }

    /// With region
    #[inline]
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// With parallelism
    #[inline]
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// With naming seed
    #[inline]
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// With per-type resource limit
    #[inline]
    #[must_use]
    pub fn with_resource_limit(mut self, limit: usize) -> Self {
        self.resource_limit = limit;
        self
    }

    /// Parse TOML
    ///
    /// # Errors
    /// [`ConfigError::Parse`] on malformed TOML, [`ConfigError::Invalid`] on
    /// out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file (defaults if it does not exist), then apply
    /// environment overrides
    ///
    /// # Errors
    /// Any [`ConfigError`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&text)?
            }
            _ => Self::default(),
        };
        let config = config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup
    ///
    /// # Errors
    /// [`ConfigError::Env`] if `SKYLINE_PARALLELISM` is not a number.
    pub fn apply_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(stack) = lookup("SKYLINE_STACK") {
            self.stack = stack;
        }
        if let Some(region) = lookup("SKYLINE_REGION") {
            self.region = region;
        }
        if let Some(value) = lookup("SKYLINE_PARALLELISM") {
            self.parallelism = value.parse().map_err(|_| ConfigError::Env {
                var: "SKYLINE_PARALLELISM",
                value,
            })?;
        }
        Ok(self)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack.is_empty() {
            return Err(ConfigError::Invalid("stack must not be empty".into()));
        }
        if self.region.is_empty() {
            return Err(ConfigError::Invalid("region must not be empty".into()));
        }
        if self.account_id.len() != 12 || !self.account_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::Invalid(format!(
                "account-id must be 12 digits, got {:?}",
                self.account_id
            )));
        }
        if self.parallelism == 0 {
            return Err(ConfigError::Invalid("parallelism must be at least 1".into()));
        }
        Ok(())
    }
}
