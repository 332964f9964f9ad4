//! Persistence adapters.
//!
//! The enforcer never touches storage directly. It loads and saves whole rule
//! sets through an [`Adapter`] and, with auto-save enabled, forwards each
//! incremental change.

use std::sync::Mutex;

use crate::error::AdapterError;
use crate::store::Rule;

/// Persistence backend for policy rules.
///
/// Implementations must be shareable across threads; the enforcer calls them
/// from whichever thread performed the mutation.
pub trait Adapter: Send + Sync {
    /// Reads every stored rule.
    fn load_policy(&self) -> Result<Vec<Rule>, AdapterError>;

    /// Replaces the stored rules with `rules`.
    fn save_policy(&self, rules: &[Rule]) -> Result<(), AdapterError>;

    /// Persists a single added rule.
    fn add_policy(&self, ptype: &str, values: &[String]) -> Result<(), AdapterError>;

    /// Persists a single removed rule.
    fn remove_policy(&self, ptype: &str, values: &[String]) -> Result<(), AdapterError>;

    fn add_policies(&self, ptype: &str, rules: &[Vec<String>]) -> Result<(), AdapterError> {
        rules.iter().try_for_each(|values| self.add_policy(ptype, values))
    }

    fn remove_policies(&self, ptype: &str, rules: &[Vec<String>]) -> Result<(), AdapterError> {
        rules
            .iter()
            .try_for_each(|values| self.remove_policy(ptype, values))
    }
}

/// Adapter that keeps rules in process memory.
///
/// Useful for tests and for seeding an enforcer from code.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    rules: Mutex<Vec<Rule>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an adapter pre-populated with `rules`.
    pub fn with_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        Self {
            rules: Mutex::new(rules.into_iter().collect()),
        }
    }

    /// Copy of the currently stored rules.
    pub fn rules(&self) -> Result<Vec<Rule>, AdapterError> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Rule>>, AdapterError> {
        self.rules
            .lock()
            .map_err(|_| AdapterError::Other("memory adapter lock poisoned".to_string()))
    }
}

impl Adapter for MemoryAdapter {
    fn load_policy(&self) -> Result<Vec<Rule>, AdapterError> {
        self.rules()
    }

    fn save_policy(&self, rules: &[Rule]) -> Result<(), AdapterError> {
        *self.lock()? = rules.to_vec();
        Ok(())
    }

    fn add_policy(&self, ptype: &str, values: &[String]) -> Result<(), AdapterError> {
        let mut rules = self.lock()?;
        if !rules.iter().any(|(p, v)| p == ptype && v == values) {
            rules.push((ptype.to_string(), values.to_vec()));
        }
        Ok(())
    }

    fn remove_policy(&self, ptype: &str, values: &[String]) -> Result<(), AdapterError> {
        self.lock()?.retain(|(p, v)| !(p == ptype && v == values));
        Ok(())
    }
}
