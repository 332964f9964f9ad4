//! # palisade-rbac: Role Hierarchies
//!
//! Stores grouping links (`alice` is a member of `role:operator`, which is a
//! member of `role:staff`) and answers transitive membership queries.
//!
//! - **Reflexive**: every principal has itself, even with no links at all
//! - **Transitive**: membership follows chains of links
//! - **Cycle-safe**: traversal tracks visited nodes and never loops
//! - **Bounded**: resolution follows at most `max_depth` links
//!   ([`DEFAULT_MAX_HIERARCHY_DEPTH`] by default)
//! - **Domain-scoped**: links added under a domain only resolve in that domain
//!
//! One [`RoleManager`] serves one grouping relation (`g`, `g2`, ...).

mod graph;
pub mod manager;

pub use manager::{DEFAULT_MAX_HIERARCHY_DEPTH, RoleManager};
