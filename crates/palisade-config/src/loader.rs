//! Layered configuration loading.
//!
//! Built-in defaults, then each configuration file that exists (see
//! [`Paths`]), then `PALISADE_*` environment variables. A later layer
//! overrides individual keys of an earlier one; nested keys are joined with
//! `__` in variable names, so `PALISADE_ENFORCER__CACHE_CAPACITY=2048` sets
//! `enforcer.cache_capacity`.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat, Map};
use tracing::{debug, warn};

use crate::paths::{Layer, Paths};
use crate::PalisadeConfig;

/// Prefix for environment overrides.
pub const DEFAULT_ENV_PREFIX: &str = "PALISADE";

/// Builder for a layered configuration load.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    env_vars: Option<Map<String, String>>,
    layers: Vec<Layer>,
}

impl ConfigLoader {
    /// Loads relative to the current directory, with every layer enabled.
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            env_vars: None,
            layers: vec![Layer::User, Layer::Project, Layer::Local],
        }
    }

    /// Directory holding `palisade.toml`; relative paths in the result
    /// resolve against it.
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Reads overrides from `vars` instead of the process environment.
    pub fn with_env_vars<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    /// Ignores the per-user config file.
    pub fn without_user_config(mut self) -> Self {
        self.layers.retain(|layer| *layer != Layer::User);
        self
    }

    pub fn load(self) -> Result<PalisadeConfig> {
        let paths = Paths::new(&self.project_dir);

        let defaults =
            Config::try_from(&PalisadeConfig::default()).context("encoding built-in defaults")?;
        let mut builder = Config::builder().add_source(defaults);

        for (layer, path) in paths.existing(&self.layers) {
            debug!(layer = layer.name(), path = %path.display(), "configuration layer");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder = builder.add_source(env_source(&self.env_prefix, self.env_vars.clone()));

        let mut config: PalisadeConfig = builder
            .build()
            .context("merging configuration layers")?
            .try_deserialize()
            .context("configuration does not match the palisade schema")?;
        config.validate().context("configuration rejected")?;
        config.resolve_paths(paths.project_dir());
        Ok(config)
    }

    /// Like [`load`](Self::load), falling back to defaults on any error.
    pub fn load_or_default(self) -> PalisadeConfig {
        let project_dir = self.project_dir.clone();
        match self.load() {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "using default configuration");
                let mut config = PalisadeConfig::default();
                config.resolve_paths(project_dir);
                config
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn env_source(prefix: &str, vars: Option<Map<String, String>>) -> Environment {
    Environment::with_prefix(prefix)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .source(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    // Each test uses its own prefix so ambient PALISADE_* variables cannot
    // leak in.
    fn loader(dir: &Path, prefix: &str) -> ConfigLoader {
        ConfigLoader::new()
            .with_project_dir(dir)
            .with_env_prefix(prefix)
            .without_user_config()
    }

    #[test]
    fn test_defaults_without_files() {
        let dir = tempdir().unwrap();
        let config = loader(dir.path(), "PALISADE_TEST_DEFAULTS").load().unwrap();

        assert_eq!(config.enforcer.cache_capacity, 10_000);
        assert_eq!(config.model.path, dir.path().join("model.conf"));
        assert!(config.policy.path.is_none());
    }

    #[test]
    fn test_project_file() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("palisade.toml"),
            r#"
[model]
path = "conf/plc-rbac-model.conf"

[policy]
path = "conf/policy.csv"

[enforcer]
cache_enabled = false
max_hierarchy_depth = 16
"#,
        )
        .unwrap();

        let config = loader(dir.path(), "PALISADE_TEST_PROJECT").load().unwrap();
        assert_eq!(config.model.path, dir.path().join("conf/plc-rbac-model.conf"));
        assert_eq!(config.policy.path, Some(dir.path().join("conf/policy.csv")));
        assert!(!config.enforcer.cache_enabled);
        assert_eq!(config.enforcer.max_hierarchy_depth, 16);
        // Untouched keys keep their defaults.
        assert_eq!(config.enforcer.cache_capacity, 10_000);
        assert!(config.enforcer.audit);
    }

    #[test]
    fn test_local_file_overrides_project_file() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("palisade.toml"),
            "[enforcer]\ncache_capacity = 500\nauto_save = false\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("palisade.local.toml"),
            "[enforcer]\ncache_capacity = 50\n",
        )
        .unwrap();

        let config = loader(dir.path(), "PALISADE_TEST_LOCAL").load().unwrap();
        assert_eq!(config.enforcer.cache_capacity, 50);
        assert!(!config.enforcer.auto_save);
    }

    #[test]
    fn test_env_overrides_files() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("palisade.toml"),
            "[enforcer]\ncache_capacity = 500\naudit = true\n",
        )
        .unwrap();

        let config = loader(dir.path(), "PALISADE_TEST_ENV")
            .with_env_vars([
                ("PALISADE_TEST_ENV_ENFORCER__CACHE_CAPACITY", "64"),
                ("PALISADE_TEST_ENV_ENFORCER__AUDIT", "false"),
                ("PALISADE_TEST_ENV_POLICY__PATH", "rules/policy.csv"),
                ("OTHER_ENFORCER__CACHE_CAPACITY", "1"),
            ])
            .load()
            .unwrap();
        assert_eq!(config.enforcer.cache_capacity, 64);
        assert!(!config.enforcer.audit);
        assert_eq!(config.policy.path, Some(dir.path().join("rules/policy.csv")));
    }

    #[test]
    fn test_env_value_is_validated() {
        let dir = tempdir().unwrap();
        let result = loader(dir.path(), "PALISADE_TEST_ENV_ZERO")
            .with_env_vars([("PALISADE_TEST_ENV_ZERO_ENFORCER__MAX_HIERARCHY_DEPTH", "0")])
            .load();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("palisade.toml"),
            "[enforcer]\ncache_capacity = 0\n",
        )
        .unwrap();

        assert!(loader(dir.path(), "PALISADE_TEST_INVALID").load().is_err());

        let fallback = loader(dir.path(), "PALISADE_TEST_INVALID").load_or_default();
        assert_eq!(fallback.enforcer.cache_capacity, 10_000);
        assert_eq!(fallback.model.path, dir.path().join("model.conf"));
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("palisade.toml"),
            "[enforcer]\ncache_capacity = \"lots\"\n",
        )
        .unwrap();

        let err = loader(dir.path(), "PALISADE_TEST_SCHEMA").load().unwrap_err();
        assert!(format!("{err:#}").contains("schema"));
    }
}
