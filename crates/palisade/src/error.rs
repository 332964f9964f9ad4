//! Enforcer error types.

use palisade_config::ConfigError;
use palisade_model::ModelError;
use palisade_policy::{AdapterError, PolicyError};
use thiserror::Error;

use crate::eval::EvalError;

/// Result type for enforcer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or using an enforcer.
///
/// None of these is ever folded into a deny: a `false` decision always means
/// no rule allowed the request.
#[derive(Debug, Error)]
pub enum Error {
    /// The model failed to load or compile.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// A rule did not fit the model.
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    /// A request had the wrong number of values.
    #[error("request has {actual} values, expected {expected}")]
    Arity { expected: usize, actual: usize },

    /// The matcher could not be evaluated.
    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),

    /// The persistence adapter failed. In-memory state is unaffected.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// The configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An enforce context named a definition the model does not declare.
    #[error("model has no {section} definition named {key}")]
    UnknownDefinition { section: &'static str, key: String },

    /// A thread panicked while holding the enforcer state lock.
    #[error("enforcer state lock poisoned")]
    LockPoisoned,
}
