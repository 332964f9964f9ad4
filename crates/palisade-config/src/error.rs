//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or checking a Palisade configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file is not valid TOML for [`PalisadeConfig`](crate::PalisadeConfig).
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A setting has a value no enforcer can run with.
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    /// The platform has no home directory to hold a user config file.
    #[error("no user configuration directory on this platform")]
    NoUserDirectory,
}
