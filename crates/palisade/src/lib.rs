//! # Palisade
//!
//! Model-driven access-control enforcement.
//!
//! An enforcer answers one question: may this subject perform this action on
//! this object? The answer is computed from two inputs:
//!
//! - **Model** - a declarative description of request fields, rule fields,
//!   role relations, how matching rules combine, and a boolean matcher
//! - **Policy** - the rules themselves, plus role links such as
//!   `(alice, role:operator)`, loaded from and saved to an [`Adapter`]
//!
//! The same engine expresses ACLs, RBAC with role inheritance, RBAC with
//! domains, and path- or pattern-based resources.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Enforcer                            │
//! │  ┌──────────┐   ┌──────────────┐   ┌──────────┐   ┌────────┐ │
//! │  │  Model   │ → │   Matcher    │ → │  Effect  │ → │ Cache  │ │
//! │  │ (parsed) │   │ (per rule)   │   │ resolver │   │(SIEVE) │ │
//! │  └──────────┘   └──────┬───────┘   └──────────┘   └────────┘ │
//! │                        │ g(..)                                │
//! │               ┌────────▼───────┐   ┌──────────────┐          │
//! │               │  RoleManager   │   │ PolicyStore  │ ↔ Adapter│
//! │               └────────────────┘   └──────────────┘          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use palisade::{Enforcer, MemoryAdapter, Model};
//!
//! let model: Model = r#"
//! [request_definition]
//! r = sub, obj, act
//!
//! [policy_definition]
//! p = sub, obj, act
//!
//! [role_definition]
//! g = _, _
//!
//! [policy_effect]
//! e = some(where (p.eft == allow))
//!
//! [matchers]
//! m = g(r.sub, p.sub) && keyMatch2(r.obj, p.obj) && r.act == p.act
//! "#
//! .parse()?;
//!
//! let enforcer = Enforcer::with_adapter(model, MemoryAdapter::new())?;
//! enforcer.add_policy(&["role:reader", "/docs/:id", "read"])?;
//! enforcer.add_grouping_policy(&["alice", "role:reader"])?;
//!
//! assert!(enforcer.enforce(&["alice", "/docs/42", "read"])?);
//! assert!(!enforcer.enforce(&["alice", "/docs/42", "write"])?);
//! # Ok::<(), palisade::Error>(())
//! ```
//!
//! # Modules
//!
//! - **Enforcer**: [`Enforcer`], [`EnforcerBuilder`], [`Decision`]
//! - **Matcher functions**: [`functions`]
//! - **Re-exports**: model, policy storage, role hierarchy, configuration

mod cache;
mod enforcer;
mod error;
mod eval;
pub mod functions;

pub use enforcer::{Decision, EnforceContext, Enforcer, EnforcerBuilder};
pub use error::{Error, Result};
pub use eval::{EvalError, Value};

// Re-export model types
pub use palisade_model::{EffectKind, Expr, Model, ModelError, RuleEffect};

// Re-export policy storage
pub use palisade_policy::{
    Adapter, AdapterError, FileAdapter, MemoryAdapter, PolicyError, PolicyStore, Rule,
};

// Re-export role hierarchy
pub use palisade_rbac::{DEFAULT_MAX_HIERARCHY_DEPTH, RoleManager};

// Re-export configuration
pub use palisade_config::{ConfigError, ConfigLoader, PalisadeConfig};
