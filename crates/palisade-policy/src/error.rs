//! Policy store and adapter error types.

use std::path::PathBuf;
use thiserror::Error;

/// Error raised when a rule does not fit the model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The rule has the wrong number of values for its type.
    #[error("{ptype} rule has {actual} values, expected {expected}")]
    Arity {
        ptype: String,
        expected: usize,
        actual: usize,
    },

    /// The rule type is not declared by the model.
    #[error("Unknown policy type: {0}")]
    UnknownType(String),
}

/// Error raised by a persistence adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Policy file I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored line could not be parsed into a rule.
    #[error("Malformed policy line {line}: {reason}")]
    Format { line: usize, reason: String },

    #[error("Adapter error: {0}")]
    Other(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, PolicyError>;
