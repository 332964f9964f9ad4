//! # palisade-model: Access-Control Model Definitions
//!
//! Parses the declarative model that drives an enforcer and compiles it once:
//!
//! - **Request / policy definitions**: the ordered field names of requests
//!   (`r = sub, obj, act`) and stored rules (`p = sub, obj, act`)
//! - **Role definitions**: grouping relations such as `g = _, _`, optionally
//!   domain-scoped (`g = _, _, _`)
//! - **Policy effect**: how matching rules combine ([`EffectKind`])
//! - **Matchers**: boolean expressions compiled into an [`Expr`] tree
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Model source (.conf)                        │
//! └─────────────────┬───────────────────────────┘
//!                   │  split into sections
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  Model                                       │
//! │  ├─ token lists validated                    │
//! │  ├─ effect expression recognised             │
//! │  └─ matcher compiled against declared names  │
//! └─────────────────┬───────────────────────────┘
//!                   │  shared read-only
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  Enforcer                                    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Examples
//!
//! ```
//! use palisade_model::{EffectKind, Model};
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
//! m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
//! "#
//! .parse()?;
//!
//! assert_eq!(model.arity("p"), Some(3));
//! assert_eq!(model.effect("e"), Some(EffectKind::AllowOverride));
//! # Ok::<(), palisade_model::ModelError>(())
//! ```

pub mod effect;
pub mod error;
pub mod matcher;
pub mod model;

pub use effect::{EffectKind, EffectResolver, Outcome, Resolution, RuleEffect, resolve};
pub use error::{ModelError, Result};
pub use matcher::{BinaryOp, Expr, Function, Literal};
pub use model::{EFFECT_TOKEN, Matcher, Model, RoleDefinition};
