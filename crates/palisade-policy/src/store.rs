//! In-memory policy rule storage.
//!
//! Rules are grouped by type (`p`, `p2`, `g`, ...). Each type keeps its rules
//! in insertion order, which is the order the enforcer evaluates them in, plus
//! a hash index so duplicate checks stay constant time.

use std::collections::{BTreeMap, HashSet};

use palisade_model::Model;
use tracing::debug;

use crate::error::{PolicyError, Result};

/// A stored rule: its type and its values.
pub type Rule = (String, Vec<String>);

#[derive(Debug, Clone, Default)]
struct Section {
    rules: Vec<Vec<String>>,
    index: HashSet<Vec<String>>,
}

impl Section {
    fn insert(&mut self, values: Vec<String>) -> bool {
        if self.index.contains(&values) {
            return false;
        }
        self.index.insert(values.clone());
        self.rules.push(values);
        true
    }

    fn remove(&mut self, values: &[String]) -> bool {
        if !self.index.remove(values) {
            return false;
        }
        if let Some(pos) = self.rules.iter().position(|r| r == values) {
            self.rules.remove(pos);
        }
        true
    }
}

/// Policy rules keyed by type, unique per type, ordered by insertion.
///
/// The store only knows the arity of each declared type; it is agnostic of
/// what the values mean.
///
/// # Examples
///
/// ```
/// use palisade_policy::PolicyStore;
///
/// let mut store = PolicyStore::new([("p", 3), ("g", 2)]);
/// assert!(store.add_rule("p", &["alice", "data1", "read"]).unwrap());
/// assert!(!store.add_rule("p", &["alice", "data1", "read"]).unwrap());
/// assert!(store.add_rule("p", &["alice", "data1"]).is_err());
/// assert_eq!(store.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct PolicyStore {
    arities: BTreeMap<String, usize>,
    sections: BTreeMap<String, Section>,
}

impl PolicyStore {
    /// Creates an empty store accepting the given `(ptype, arity)` pairs.
    pub fn new<S: Into<String>>(arities: impl IntoIterator<Item = (S, usize)>) -> Self {
        Self {
            arities: arities.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            sections: BTreeMap::new(),
        }
    }

    /// Creates an empty store for every policy and grouping type in `model`.
    pub fn for_model(model: &Model) -> Self {
        let policies = model
            .policy_types()
            .filter_map(|ptype| Some((ptype.to_string(), model.arity(ptype)?)));
        let roles = model
            .role_definitions()
            .map(|(name, def)| (name.to_string(), def.arity));
        Self::new(policies.chain(roles))
    }

    pub fn arity(&self, ptype: &str) -> Option<usize> {
        self.arities.get(ptype).copied()
    }

    fn check<S: AsRef<str>>(&self, ptype: &str, values: &[S]) -> Result<()> {
        let expected = self
            .arity(ptype)
            .ok_or_else(|| PolicyError::UnknownType(ptype.to_string()))?;
        if values.len() != expected {
            return Err(PolicyError::Arity {
                ptype: ptype.to_string(),
                expected,
                actual: values.len(),
            });
        }
        Ok(())
    }

    /// Inserts a rule. Returns `true` if it was not already present.
    pub fn add_rule<S: AsRef<str>>(&mut self, ptype: &str, values: &[S]) -> Result<bool> {
        self.check(ptype, values)?;
        let rule = owned(values);
        let added = self
            .sections
            .entry(ptype.to_string())
            .or_default()
            .insert(rule.clone());
        if added {
            debug!(ptype, ?rule, "rule added");
        }
        Ok(added)
    }

    /// Removes a rule. Returns `true` if it was present.
    pub fn remove_rule<S: AsRef<str>>(&mut self, ptype: &str, values: &[S]) -> Result<bool> {
        self.check(ptype, values)?;
        let rule = owned(values);
        let removed = self
            .sections
            .get_mut(ptype)
            .is_some_and(|s| s.remove(&rule));
        if removed {
            debug!(ptype, ?rule, "rule removed");
        }
        Ok(removed)
    }

    /// Inserts a batch of rules of one type.
    ///
    /// Every rule is validated before any is inserted, so a bad rule leaves
    /// the store unchanged. Returns how many rules were new.
    pub fn add_rules<S: AsRef<str>>(&mut self, ptype: &str, rules: &[Vec<S>]) -> Result<usize> {
        for rule in rules {
            self.check(ptype, rule.as_slice())?;
        }
        let section = self.sections.entry(ptype.to_string()).or_default();
        let added = rules
            .iter()
            .filter(|rule| section.insert(owned(rule.as_slice())))
            .count();
        debug!(ptype, added, "rules added");
        Ok(added)
    }

    /// Removes a batch of rules of one type, validating all first.
    ///
    /// Returns how many rules were removed.
    pub fn remove_rules<S: AsRef<str>>(&mut self, ptype: &str, rules: &[Vec<S>]) -> Result<usize> {
        for rule in rules {
            self.check(ptype, rule.as_slice())?;
        }
        let Some(section) = self.sections.get_mut(ptype) else {
            return Ok(0);
        };
        let removed = rules
            .iter()
            .filter(|rule| section.remove(&owned(rule.as_slice())))
            .count();
        debug!(ptype, removed, "rules removed");
        Ok(removed)
    }

    /// Inserts rules of any declared types, validating all first.
    pub fn extend(&mut self, rules: impl IntoIterator<Item = Rule>) -> Result<usize> {
        let rules: Vec<Rule> = rules.into_iter().collect();
        for (ptype, values) in &rules {
            self.check(ptype, values)?;
        }
        let mut added = 0;
        for (ptype, values) in rules {
            if self.sections.entry(ptype).or_default().insert(values) {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Removes every rule whose values, starting at `field_index`, equal
    /// `field_values`. Empty filter values match anything.
    ///
    /// Returns the removed rules in store order.
    pub fn remove_filtered_rules<S: AsRef<str>>(
        &mut self,
        ptype: &str,
        field_index: usize,
        field_values: &[S],
    ) -> Result<Vec<Vec<String>>> {
        let arity = self
            .arity(ptype)
            .ok_or_else(|| PolicyError::UnknownType(ptype.to_string()))?;
        let end = field_index.checked_add(field_values.len());
        if end.is_none_or(|end| end > arity) {
            return Err(PolicyError::Arity {
                ptype: ptype.to_string(),
                expected: arity,
                actual: end.unwrap_or(usize::MAX),
            });
        }
        let Some(section) = self.sections.get_mut(ptype) else {
            return Ok(Vec::new());
        };

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut section.rules)
            .into_iter()
            .partition(|rule| filter_matches(rule, field_index, field_values));
        for rule in &removed {
            section.index.remove(rule);
        }
        section.rules = kept;
        debug!(ptype, field_index, removed = removed.len(), "filtered rules removed");
        Ok(removed)
    }

    /// Rules of `ptype` in insertion order.
    pub fn rules(&self, ptype: &str) -> &[Vec<String>] {
        self.sections
            .get(ptype)
            .map(|s| s.rules.as_slice())
            .unwrap_or_default()
    }

    /// Rules of `ptype` matching a field filter, as for
    /// [`remove_filtered_rules`](Self::remove_filtered_rules).
    pub fn filtered_rules<S: AsRef<str>>(
        &self,
        ptype: &str,
        field_index: usize,
        field_values: &[S],
    ) -> Vec<Vec<String>> {
        self.rules(ptype)
            .iter()
            .filter(|rule| filter_matches(rule, field_index, field_values))
            .cloned()
            .collect()
    }

    pub fn has_rule<S: AsRef<str>>(&self, ptype: &str, values: &[S]) -> bool {
        self.sections
            .get(ptype)
            .is_some_and(|s| s.index.contains(&owned(values)))
    }

    /// Total number of rules across all types.
    pub fn len(&self) -> usize {
        self.sections.values().map(|s| s.rules.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every rule, keeping the declared types.
    pub fn clear(&mut self) {
        self.sections.clear();
    }

    /// Every rule as `(ptype, values)`, ordered by type then insertion.
    pub fn snapshot(&self) -> Vec<Rule> {
        self.sections
            .iter()
            .flat_map(|(ptype, s)| s.rules.iter().map(|r| (ptype.clone(), r.clone())))
            .collect()
    }
}

fn owned<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values.iter().map(|v| v.as_ref().to_string()).collect()
}

fn filter_matches<S: AsRef<str>>(rule: &[String], field_index: usize, field_values: &[S]) -> bool {
    field_values.iter().enumerate().all(|(i, want)| {
        let want = want.as_ref();
        want.is_empty()
            || field_index
                .checked_add(i)
                .and_then(|idx| rule.get(idx))
                .is_some_and(|v| v == want)
    })
}
