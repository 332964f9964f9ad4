//! Model error types.

use std::path::PathBuf;
use thiserror::Error;

/// Error raised while loading or compiling a model definition.
///
/// A model that fails to parse cannot back an enforcer, so every variant is
/// fatal at construction time.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A section is missing, malformed, or references something undeclared.
    #[error("Model syntax error in [{section}]: {reason}")]
    Syntax { section: String, reason: String },

    /// The model file could not be read.
    #[error("Failed to read model file at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ModelError {
    pub(crate) fn syntax(section: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Syntax {
            section: section.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
