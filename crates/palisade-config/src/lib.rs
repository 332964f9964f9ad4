//! Configuration for Palisade enforcers.
//!
//! [`PalisadeConfig`] names the model file, the optional policy file, and the
//! enforcer settings. [`ConfigLoader`] merges it from several sources, highest
//! precedence first:
//! 1. Environment variables (PALISADE_* prefix, `__` between nested keys)
//! 2. palisade.local.toml (gitignored, local overrides)
//! 3. palisade.toml (git-tracked, project config)
//! 4. ~/.config/palisade/config.toml (user defaults)
//! 5. Built-in defaults

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use paths::{Layer, Paths};

/// Default bound on role hierarchy traversal.
pub use palisade_rbac::DEFAULT_MAX_HIERARCHY_DEPTH;

/// Default decision cache capacity.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Main Palisade configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PalisadeConfig {
    pub model: ModelConfig,
    pub policy: PolicyConfig,
    pub enforcer: EnforcerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model definition file.
    pub path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("model.conf"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Policy file loaded at startup. Without one the enforcer starts empty.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcerConfig {
    pub cache_enabled: bool,
    pub cache_capacity: usize,
    pub max_hierarchy_depth: usize,
    pub auto_save: bool,
    pub audit: bool,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_hierarchy_depth: DEFAULT_MAX_HIERARCHY_DEPTH,
            auto_save: true,
            audit: true,
        }
    }
}

impl PalisadeConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Read a single TOML file, without layering.
    pub fn from_file(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no enforcer can run with.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.enforcer.cache_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "enforcer.cache_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.enforcer.max_hierarchy_depth == 0 {
            return Err(ConfigError::Invalid {
                key: "enforcer.max_hierarchy_depth",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.model.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                key: "model.path",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.model.path.is_relative() {
            self.model.path = base.join(&self.model.path);
        }

        if let Some(policy) = &mut self.policy.path {
            if policy.is_relative() {
                *policy = base.join(&*policy);
            }
        }
    }
}
