//! # palisade-policy: Policy Storage
//!
//! Holds the rule tuples an enforcer evaluates and moves them to and from
//! persistent storage.
//!
//! - [`PolicyStore`]: rules grouped by type, unique, insertion ordered,
//!   arity-checked against the model
//! - [`Adapter`]: the persistence seam (load, save, incremental add/remove)
//! - [`MemoryAdapter`]: in-process storage, mostly for tests
//! - [`FileAdapter`]: comma-separated policy file

pub mod adapter;
pub mod error;
pub mod file;
pub mod store;

pub use adapter::{Adapter, MemoryAdapter};
pub use error::{AdapterError, PolicyError, Result};
pub use file::FileAdapter;
pub use store::{PolicyStore, Rule};
