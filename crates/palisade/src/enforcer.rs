//! The enforcer: policy state, decisions, and the public API.
//!
//! State (the policy store and one role manager per grouping relation) lives
//! behind a single `RwLock`. Decisions take the read lock for the whole
//! evaluation, including the cache write, so a decision computed against old
//! state can never land in the cache after a mutation commits. Mutations take
//! the write lock and clear the cache before releasing it.
//!
//! Adapter I/O never happens under the lock: [`Enforcer::load_policy`] reads
//! and validates first, then swaps the new state in; [`Enforcer::save_policy`]
//! snapshots, releases, then writes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use palisade_config::{DEFAULT_CACHE_CAPACITY, PalisadeConfig};
use palisade_model::{EffectResolver, Model, Outcome, RuleEffect};
use palisade_policy::{Adapter, AdapterError, FileAdapter, PolicyError, PolicyStore, Rule};
use palisade_rbac::{DEFAULT_MAX_HIERARCHY_DEPTH, RoleManager};
use tracing::{debug, error, info, trace, warn};

use crate::cache::SieveCache;
use crate::error::{Error, Result};
use crate::eval::{EvalError, Evaluator};
use crate::functions::RegexCache;

/// Default policy type for the unnamed policy operations.
const DEFAULT_PTYPE: &str = "p";

/// Default grouping relation for the unnamed grouping operations.
const DEFAULT_GTYPE: &str = "g";

// ============================================================================
// Decisions
// ============================================================================

/// Outcome of an enforcement, with the rule that decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Values of the deciding rule. `None` when no rule matched.
    pub explain: Option<Vec<String>>,
}

/// Selects which request, policy, effect, and matcher definitions an
/// enforcement uses.
///
/// The default context uses `r`, `p`, `e`, and `m`; [`EnforceContext::new`]
/// picks a numbered set such as `r2`, `p2`, `e2`, `m2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnforceContext {
    pub request: String,
    pub policy: String,
    pub effect: String,
    pub matcher: String,
}

impl EnforceContext {
    pub fn new(suffix: &str) -> Self {
        Self {
            request: format!("r{suffix}"),
            policy: format!("p{suffix}"),
            effect: format!("e{suffix}"),
            matcher: format!("m{suffix}"),
        }
    }
}

impl Default for EnforceContext {
    fn default() -> Self {
        Self::new("")
    }
}

// ============================================================================
// State
// ============================================================================

type StateResult<T> = std::result::Result<T, PolicyError>;

#[derive(Debug)]
struct State {
    store: PolicyStore,
    roles: HashMap<String, RoleManager>,
}

impl State {
    fn empty(model: &Model, max_depth: usize) -> Self {
        let roles = model
            .role_definitions()
            .map(|(name, _)| (name.to_string(), RoleManager::with_max_depth(max_depth)))
            .collect();
        Self {
            store: PolicyStore::for_model(model),
            roles,
        }
    }

    /// Builds state from loaded rules. Fails without side effects if any rule
    /// does not fit the model.
    fn from_rules(
        model: &Model,
        max_depth: usize,
        rules: Vec<Rule>,
    ) -> StateResult<Self> {
        let mut state = Self::empty(model, max_depth);
        state.store.extend(rules)?;
        for name in model.role_definitions().map(|(name, _)| name) {
            for values in state.store.rules(name) {
                if let Some(rm) = state.roles.get_mut(name) {
                    link(rm, values);
                }
            }
        }
        Ok(state)
    }

    fn clear(&mut self) {
        self.store.clear();
        for rm in self.roles.values_mut() {
            rm.clear();
        }
    }

    fn insert(&mut self, ptype: &str, values: &[String]) -> StateResult<bool> {
        let added = self.store.add_rule(ptype, values)?;
        if added
            && let Some(rm) = self.roles.get_mut(ptype)
        {
            link(rm, values);
        }
        Ok(added)
    }

    fn delete(&mut self, ptype: &str, values: &[String]) -> StateResult<bool> {
        let removed = self.store.remove_rule(ptype, values)?;
        if removed
            && let Some(rm) = self.roles.get_mut(ptype)
        {
            unlink(rm, values);
        }
        Ok(removed)
    }

    /// Inserts a batch atomically. Returns the rules that were new.
    fn insert_batch(
        &mut self,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> StateResult<Vec<Vec<String>>> {
        let mut seen = HashSet::new();
        let fresh: Vec<Vec<String>> = rules
            .iter()
            .filter(|r| !self.store.has_rule(ptype, r.as_slice()) && seen.insert(*r))
            .cloned()
            .collect();
        self.store.add_rules(ptype, rules)?;
        if let Some(rm) = self.roles.get_mut(ptype) {
            for values in &fresh {
                link(rm, values);
            }
        }
        Ok(fresh)
    }

    /// Removes a batch atomically. Returns the rules that were present.
    fn delete_batch(
        &mut self,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> StateResult<Vec<Vec<String>>> {
        let mut seen = HashSet::new();
        let present: Vec<Vec<String>> = rules
            .iter()
            .filter(|r| self.store.has_rule(ptype, r.as_slice()) && seen.insert(*r))
            .cloned()
            .collect();
        self.store.remove_rules(ptype, rules)?;
        if let Some(rm) = self.roles.get_mut(ptype) {
            for values in &present {
                unlink(rm, values);
            }
        }
        Ok(present)
    }

    fn delete_filtered(
        &mut self,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> StateResult<Vec<Vec<String>>> {
        let removed = self
            .store
            .remove_filtered_rules(ptype, field_index, field_values)?;
        if let Some(rm) = self.roles.get_mut(ptype) {
            for values in &removed {
                unlink(rm, values);
            }
        }
        Ok(removed)
    }
}

fn link(rm: &mut RoleManager, values: &[String]) {
    if let [member, group, rest @ ..] = values {
        rm.add_link(member, group, rest.first().map(String::as_str));
    }
}

fn unlink(rm: &mut RoleManager, values: &[String]) {
    if let [member, group, rest @ ..] = values {
        rm.remove_link(member, group, rest.first().map(String::as_str));
    }
}

fn owned<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values.iter().map(|v| v.as_ref().to_string()).collect()
}

fn owned_rules<S: AsRef<str>>(rules: &[Vec<S>]) -> Vec<Vec<String>> {
    rules.iter().map(|r| owned(r)).collect()
}

// ============================================================================
// Enforcer
// ============================================================================

/// Policy enforcement engine.
///
/// Thread safe: every operation takes `&self`, so one enforcer can be shared
/// across threads behind an `Arc`.
///
/// # Examples
///
/// ```
/// use palisade::{Enforcer, Model};
///
/// let model: Model = r#"
/// [request_definition]
/// r = sub, obj, act
///
/// [policy_definition]
/// p = sub, obj, act
///
/// [role_definition]
/// g = _, _
///
/// [policy_effect]
/// e = some(where (p.eft == allow))
///
/// [matchers]
/// m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
/// "#
/// .parse()?;
///
/// let enforcer = Enforcer::new(model);
/// enforcer.add_policy(&["role:operator", "device_control", "w"])?;
/// enforcer.add_grouping_policy(&["testuser-0", "role:operator"])?;
///
/// assert!(enforcer.enforce(&["testuser-0", "device_control", "w"])?);
/// assert!(!enforcer.enforce(&["testuser-0", "device_control", "r"])?);
/// # Ok::<(), palisade::Error>(())
/// ```
pub struct Enforcer {
    model: Arc<Model>,
    state: RwLock<State>,
    cache: Mutex<SieveCache<Vec<String>, Decision>>,
    cache_enabled: AtomicBool,
    regexes: RegexCache,
    adapter: Option<Arc<dyn Adapter>>,
    auto_save: AtomicBool,
    audit_enabled: bool,
    max_depth: usize,
}

impl std::fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enforcer")
            .field("has_adapter", &self.adapter.is_some())
            .field("cache_enabled", &self.cache_enabled.load(Ordering::Relaxed))
            .field("auto_save", &self.auto_save.load(Ordering::Relaxed))
            .field("audit_enabled", &self.audit_enabled)
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

impl Enforcer {
    /// Creates an enforcer with an empty policy and no adapter.
    pub fn new(model: Model) -> Self {
        EnforcerBuilder::new(model).assemble()
    }

    /// Creates an enforcer and loads its policy from `adapter`.
    pub fn with_adapter(model: Model, adapter: impl Adapter + 'static) -> Result<Self> {
        EnforcerBuilder::new(model).adapter(adapter).build()
    }

    pub fn builder(model: Model) -> EnforcerBuilder {
        EnforcerBuilder::new(model)
    }

    /// Creates an enforcer from configuration: the model file, plus the
    /// policy file if one is configured.
    pub fn from_config(config: &PalisadeConfig) -> Result<Self> {
        config.validate()?;
        let model = Model::from_file(&config.model.path)?;

        let settings = &config.enforcer;
        let mut builder = EnforcerBuilder::new(model)
            .cache_capacity(settings.cache_capacity)
            .max_hierarchy_depth(settings.max_hierarchy_depth)
            .auto_save(settings.auto_save);
        if !settings.cache_enabled {
            builder = builder.without_cache();
        }
        if !settings.audit {
            builder = builder.without_audit();
        }
        if let Some(path) = &config.policy.path {
            builder = builder.adapter(FileAdapter::new(path));
        }
        builder.build()
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| Error::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| Error::LockPoisoned)
    }

    fn cache(&self) -> Result<MutexGuard<'_, SieveCache<Vec<String>, Decision>>> {
        self.cache.lock().map_err(|_| Error::LockPoisoned)
    }

    // ─── Enforcement ────────────────────────────────────────────────────

    /// Decides a request against the default definitions.
    pub fn enforce(&self, rvals: &[&str]) -> Result<bool> {
        self.enforce_ex(rvals).map(|d| d.allowed)
    }

    /// Like [`enforce`](Self::enforce), also reporting the deciding rule.
    pub fn enforce_ex(&self, rvals: &[&str]) -> Result<Decision> {
        self.enforce_with(&EnforceContext::default(), rvals)
    }

    /// Decides several requests under one read lock.
    pub fn batch_enforce(&self, requests: &[Vec<&str>]) -> Result<Vec<bool>> {
        let ctx = EnforceContext::default();
        let state = self.read()?;
        requests
            .iter()
            .map(|rvals| self.decide(&state, &ctx, rvals).map(|d| d.allowed))
            .collect()
    }

    /// Decides a request using the definitions named by `ctx`.
    pub fn enforce_with(&self, ctx: &EnforceContext, rvals: &[&str]) -> Result<Decision> {
        let state = self.read()?;
        self.decide(&state, ctx, rvals)
    }

    fn decide(&self, state: &State, ctx: &EnforceContext, rvals: &[&str]) -> Result<Decision> {
        let model = &*self.model;
        let request_tokens =
            model
                .request_tokens(&ctx.request)
                .ok_or_else(|| Error::UnknownDefinition {
                    section: "request",
                    key: ctx.request.clone(),
                })?;
        if rvals.len() != request_tokens.len() {
            return Err(Error::Arity {
                expected: request_tokens.len(),
                actual: rvals.len(),
            });
        }
        if model.policy_tokens(&ctx.policy).is_none() {
            return Err(Error::UnknownDefinition {
                section: "policy",
                key: ctx.policy.clone(),
            });
        }
        let kind = model
            .effect(&ctx.effect)
            .ok_or_else(|| Error::UnknownDefinition {
                section: "policy_effect",
                key: ctx.effect.clone(),
            })?;
        let matcher = model
            .matcher(&ctx.matcher)
            .ok_or_else(|| Error::UnknownDefinition {
                section: "matchers",
                key: ctx.matcher.clone(),
            })?;

        let use_cache = self.cache_enabled.load(Ordering::Acquire);
        let key = use_cache.then(|| {
            [&ctx.request, &ctx.policy, &ctx.effect, &ctx.matcher]
                .into_iter()
                .cloned()
                .chain(rvals.iter().map(ToString::to_string))
                .collect::<Vec<String>>()
        });

        if let Some(key) = &key
            && let Some(decision) = self.cache()?.get(key)
        {
            trace!(request = ?rvals, allowed = decision.allowed, "decision cache hit");
            self.audit(rvals, &decision);
            return Ok(decision);
        }

        let evaluator = Evaluator {
            roles: &state.roles,
            regexes: &self.regexes,
        };
        let effect_index = model.effect_index(&ctx.policy);
        let rules = state.store.rules(&ctx.policy);
        let mut resolver = EffectResolver::new(kind);

        for (i, rule) in rules.iter().enumerate() {
            if !evaluator.matches(&matcher.expr, rvals, rule)? {
                continue;
            }
            let effect = match effect_index {
                Some(idx) => {
                    let value = rule.get(idx).map_or("", String::as_str);
                    RuleEffect::parse(value).ok_or_else(|| EvalError {
                        expression: format!("{}.eft", ctx.policy),
                        reason: format!("rule effect must be allow or deny, found {value:?}"),
                    })?
                }
                None => RuleEffect::Allow,
            };
            if resolver.observe(i, Outcome::matched(effect)) {
                break;
            }
        }

        let resolution = resolver.finish();
        let decision = Decision {
            allowed: resolution.allowed,
            explain: resolution.deciding_rule.map(|i| rules[i].clone()),
        };

        // Still under the read lock, so no mutation can have committed since
        // evaluation started.
        if let Some(key) = key {
            self.cache()?.insert(key, decision.clone());
        }

        self.audit(rvals, &decision);
        Ok(decision)
    }

    fn audit(&self, rvals: &[&str], decision: &Decision) {
        if !self.audit_enabled {
            return;
        }
        if decision.allowed {
            info!(
                request = ?rvals,
                rule = ?decision.explain,
                "Access granted"
            );
        } else {
            warn!(
                request = ?rvals,
                rule = ?decision.explain,
                "Access denied"
            );
        }
    }

    // ─── Mutation plumbing ──────────────────────────────────────────────

    /// Applies `f` under the write lock and clears the cache before the lock
    /// is released. A failed mutation leaves both untouched.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut State) -> StateResult<T>,
    ) -> Result<T> {
        let mut state = self.write()?;
        let out = f(&mut state)?;
        self.cache()?.clear();
        drop(state);
        Ok(out)
    }

    /// Mirrors a committed mutation to the adapter when auto-save is on.
    fn persist(
        &self,
        op: impl FnOnce(&dyn Adapter) -> std::result::Result<(), AdapterError>,
    ) -> Result<()> {
        if !self.auto_save.load(Ordering::Acquire) {
            return Ok(());
        }
        let Some(adapter) = &self.adapter else {
            return Ok(());
        };
        op(adapter.as_ref()).map_err(|e| {
            error!(error = %e, "adapter update failed; in-memory policy kept");
            Error::Adapter(e)
        })
    }

    fn check_policy_type(&self, ptype: &str) -> Result<()> {
        if self.model.policy_tokens(ptype).is_none() {
            return Err(PolicyError::UnknownType(ptype.to_string()).into());
        }
        Ok(())
    }

    fn check_grouping_type(&self, gtype: &str) -> Result<()> {
        if self.model.role_definition(gtype).is_none() {
            return Err(PolicyError::UnknownType(gtype.to_string()).into());
        }
        Ok(())
    }

    fn add_rule(&self, ptype: &str, values: Vec<String>) -> Result<bool> {
        let added = self.mutate(|state| state.insert(ptype, &values))?;
        if added {
            self.persist(|a| a.add_policy(ptype, &values))?;
        }
        Ok(added)
    }

    fn remove_rule(&self, ptype: &str, values: Vec<String>) -> Result<bool> {
        let removed = self.mutate(|state| state.delete(ptype, &values))?;
        if removed {
            self.persist(|a| a.remove_policy(ptype, &values))?;
        }
        Ok(removed)
    }

    fn add_rules(&self, ptype: &str, rules: Vec<Vec<String>>) -> Result<bool> {
        let added = self.mutate(|state| state.insert_batch(ptype, &rules))?;
        if added.is_empty() {
            return Ok(false);
        }
        self.persist(|a| a.add_policies(ptype, &added))?;
        Ok(true)
    }

    fn remove_rules(&self, ptype: &str, rules: Vec<Vec<String>>) -> Result<bool> {
        let removed = self.mutate(|state| state.delete_batch(ptype, &rules))?;
        if removed.is_empty() {
            return Ok(false);
        }
        self.persist(|a| a.remove_policies(ptype, &removed))?;
        Ok(true)
    }

    fn remove_filtered_rules(
        &self,
        ptype: &str,
        field_index: usize,
        field_values: Vec<String>,
    ) -> Result<bool> {
        let removed =
            self.mutate(|state| state.delete_filtered(ptype, field_index, &field_values))?;
        if removed.is_empty() {
            return Ok(false);
        }
        self.persist(|a| a.remove_policies(ptype, &removed))?;
        Ok(true)
    }

    // ─── Policy rules ───────────────────────────────────────────────────

    /// Adds a `p` rule. Returns `false` if it already existed.
    pub fn add_policy<S: AsRef<str>>(&self, values: &[S]) -> Result<bool> {
        self.add_named_policy(DEFAULT_PTYPE, values)
    }

    pub fn add_named_policy<S: AsRef<str>>(&self, ptype: &str, values: &[S]) -> Result<bool> {
        self.check_policy_type(ptype)?;
        self.add_rule(ptype, owned(values))
    }

    /// Adds several `p` rules atomically. Returns `true` if any was new.
    pub fn add_policies<S: AsRef<str>>(&self, rules: &[Vec<S>]) -> Result<bool> {
        self.add_named_policies(DEFAULT_PTYPE, rules)
    }

    pub fn add_named_policies<S: AsRef<str>>(&self, ptype: &str, rules: &[Vec<S>]) -> Result<bool> {
        self.check_policy_type(ptype)?;
        self.add_rules(ptype, owned_rules(rules))
    }

    /// Removes a `p` rule. Returns `false` if it was absent.
    pub fn remove_policy<S: AsRef<str>>(&self, values: &[S]) -> Result<bool> {
        self.remove_named_policy(DEFAULT_PTYPE, values)
    }

    pub fn remove_named_policy<S: AsRef<str>>(&self, ptype: &str, values: &[S]) -> Result<bool> {
        self.check_policy_type(ptype)?;
        self.remove_rule(ptype, owned(values))
    }

    pub fn remove_policies<S: AsRef<str>>(&self, rules: &[Vec<S>]) -> Result<bool> {
        self.remove_named_policies(DEFAULT_PTYPE, rules)
    }

    pub fn remove_named_policies<S: AsRef<str>>(
        &self,
        ptype: &str,
        rules: &[Vec<S>],
    ) -> Result<bool> {
        self.check_policy_type(ptype)?;
        self.remove_rules(ptype, owned_rules(rules))
    }

    /// Removes every `p` rule whose fields from `field_index` on equal
    /// `field_values`; empty filter values match anything.
    pub fn remove_filtered_policy<S: AsRef<str>>(
        &self,
        field_index: usize,
        field_values: &[S],
    ) -> Result<bool> {
        self.remove_filtered_named_policy(DEFAULT_PTYPE, field_index, field_values)
    }

    pub fn remove_filtered_named_policy<S: AsRef<str>>(
        &self,
        ptype: &str,
        field_index: usize,
        field_values: &[S],
    ) -> Result<bool> {
        self.check_policy_type(ptype)?;
        self.remove_filtered_rules(ptype, field_index, owned(field_values))
    }

    // ─── Grouping rules ─────────────────────────────────────────────────

    /// Adds a `g` link such as `(user, role)` or `(user, role, domain)`.
    pub fn add_grouping_policy<S: AsRef<str>>(&self, values: &[S]) -> Result<bool> {
        self.add_named_grouping_policy(DEFAULT_GTYPE, values)
    }

    pub fn add_named_grouping_policy<S: AsRef<str>>(
        &self,
        gtype: &str,
        values: &[S],
    ) -> Result<bool> {
        self.check_grouping_type(gtype)?;
        self.add_rule(gtype, owned(values))
    }

    pub fn add_grouping_policies<S: AsRef<str>>(&self, rules: &[Vec<S>]) -> Result<bool> {
        self.add_named_grouping_policies(DEFAULT_GTYPE, rules)
    }

    pub fn add_named_grouping_policies<S: AsRef<str>>(
        &self,
        gtype: &str,
        rules: &[Vec<S>],
    ) -> Result<bool> {
        self.check_grouping_type(gtype)?;
        self.add_rules(gtype, owned_rules(rules))
    }

    pub fn remove_grouping_policy<S: AsRef<str>>(&self, values: &[S]) -> Result<bool> {
        self.remove_named_grouping_policy(DEFAULT_GTYPE, values)
    }

    pub fn remove_named_grouping_policy<S: AsRef<str>>(
        &self,
        gtype: &str,
        values: &[S],
    ) -> Result<bool> {
        self.check_grouping_type(gtype)?;
        self.remove_rule(gtype, owned(values))
    }

    pub fn remove_grouping_policies<S: AsRef<str>>(&self, rules: &[Vec<S>]) -> Result<bool> {
        self.check_grouping_type(DEFAULT_GTYPE)?;
        self.remove_rules(DEFAULT_GTYPE, owned_rules(rules))
    }

    pub fn remove_filtered_grouping_policy<S: AsRef<str>>(
        &self,
        field_index: usize,
        field_values: &[S],
    ) -> Result<bool> {
        self.remove_filtered_named_grouping_policy(DEFAULT_GTYPE, field_index, field_values)
    }

    pub fn remove_filtered_named_grouping_policy<S: AsRef<str>>(
        &self,
        gtype: &str,
        field_index: usize,
        field_values: &[S],
    ) -> Result<bool> {
        self.check_grouping_type(gtype)?;
        self.remove_filtered_rules(gtype, field_index, owned(field_values))
    }

    // ─── Queries ────────────────────────────────────────────────────────

    /// All `p` rules in evaluation order.
    pub fn get_policy(&self) -> Result<Vec<Vec<String>>> {
        self.get_named_policy(DEFAULT_PTYPE)
    }

    pub fn get_named_policy(&self, ptype: &str) -> Result<Vec<Vec<String>>> {
        Ok(self.read()?.store.rules(ptype).to_vec())
    }

    pub fn get_filtered_policy<S: AsRef<str>>(
        &self,
        field_index: usize,
        field_values: &[S],
    ) -> Result<Vec<Vec<String>>> {
        Ok(self
            .read()?
            .store
            .filtered_rules(DEFAULT_PTYPE, field_index, field_values))
    }

    /// All `g` links.
    pub fn get_grouping_policy(&self) -> Result<Vec<Vec<String>>> {
        self.get_named_grouping_policy(DEFAULT_GTYPE)
    }

    pub fn get_named_grouping_policy(&self, gtype: &str) -> Result<Vec<Vec<String>>> {
        Ok(self.read()?.store.rules(gtype).to_vec())
    }

    pub fn has_policy<S: AsRef<str>>(&self, values: &[S]) -> Result<bool> {
        self.has_named_policy(DEFAULT_PTYPE, values)
    }

    pub fn has_named_policy<S: AsRef<str>>(&self, ptype: &str, values: &[S]) -> Result<bool> {
        Ok(self.read()?.store.has_rule(ptype, values))
    }

    pub fn has_grouping_policy<S: AsRef<str>>(&self, values: &[S]) -> Result<bool> {
        self.has_named_grouping_policy(DEFAULT_GTYPE, values)
    }

    pub fn has_named_grouping_policy<S: AsRef<str>>(
        &self,
        gtype: &str,
        values: &[S],
    ) -> Result<bool> {
        Ok(self.read()?.store.has_rule(gtype, values))
    }

    fn with_roles<T>(&self, f: impl FnOnce(&RoleManager) -> T) -> Result<T> {
        let state = self.read()?;
        let rm = state
            .roles
            .get(DEFAULT_GTYPE)
            .ok_or_else(|| PolicyError::UnknownType(DEFAULT_GTYPE.to_string()))?;
        Ok(f(rm))
    }

    /// Roles `user` holds directly through `g`.
    pub fn get_roles_for_user(&self, user: &str, domain: Option<&str>) -> Result<Vec<String>> {
        self.with_roles(|rm| rm.direct_roles(user, domain))
    }

    /// Direct members of `role` through `g`.
    pub fn get_users_for_role(&self, role: &str, domain: Option<&str>) -> Result<Vec<String>> {
        self.with_roles(|rm| rm.direct_members(role, domain))
    }

    /// Every role `user` holds through `g`, directly or by inheritance.
    pub fn get_implicit_roles_for_user(
        &self,
        user: &str,
        domain: Option<&str>,
    ) -> Result<Vec<String>> {
        self.with_roles(|rm| rm.roles_of(user, domain).into_iter().collect())
    }

    /// Whether `user` holds `role` directly through `g`.
    pub fn has_role_for_user(&self, user: &str, role: &str, domain: Option<&str>) -> Result<bool> {
        self.with_roles(|rm| rm.direct_roles(user, domain).iter().any(|r| r == role))
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    fn require_adapter(&self) -> Result<&Arc<dyn Adapter>> {
        self.adapter
            .as_ref()
            .ok_or_else(|| AdapterError::Other("no adapter configured".to_string()).into())
    }

    /// Replaces the in-memory policy with the adapter's contents.
    ///
    /// The adapter is read and the new state validated before the lock is
    /// taken; on any failure the current policy stays in place.
    pub fn load_policy(&self) -> Result<()> {
        let adapter = self.require_adapter()?;
        let rules = adapter.load_policy().map_err(|e| {
            error!(error = %e, "policy load failed");
            e
        })?;
        let count = rules.len();
        let fresh = State::from_rules(&self.model, self.max_depth, rules)?;

        let mut state = self.write()?;
        *state = fresh;
        self.cache()?.clear();
        drop(state);

        info!(rules = count, "policy loaded");
        Ok(())
    }

    /// Writes the current policy to the adapter.
    pub fn save_policy(&self) -> Result<()> {
        let adapter = self.require_adapter()?;
        let snapshot = self.read()?.store.snapshot();
        adapter.save_policy(&snapshot).map_err(|e| {
            error!(error = %e, "policy save failed");
            e
        })?;
        info!(rules = snapshot.len(), "policy saved");
        Ok(())
    }

    /// Drops every rule and link in memory. The adapter is not touched.
    pub fn clear_policy(&self) -> Result<()> {
        self.mutate(|state| {
            state.clear();
            Ok(())
        })?;
        debug!("policy cleared");
        Ok(())
    }

    pub fn enable_cache(&self, enabled: bool) -> Result<()> {
        self.cache_enabled.store(enabled, Ordering::Release);
        if !enabled {
            self.cache()?.clear();
        }
        Ok(())
    }

    pub fn enable_auto_save(&self, enabled: bool) {
        self.auto_save.store(enabled, Ordering::Release);
    }

    /// Drops every cached decision.
    pub fn invalidate_cache(&self) -> Result<()> {
        let _state = self.write()?;
        self.cache()?.clear();
        Ok(())
    }

    /// Number of cached decisions.
    pub fn cached_decisions(&self) -> Result<usize> {
        Ok(self.cache()?.len())
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Configures an [`Enforcer`] before construction.
pub struct EnforcerBuilder {
    model: Model,
    adapter: Option<Arc<dyn Adapter>>,
    cache_enabled: bool,
    cache_capacity: usize,
    max_depth: usize,
    auto_save: bool,
    audit_enabled: bool,
}

impl EnforcerBuilder {
    fn new(model: Model) -> Self {
        Self {
            model,
            adapter: None,
            cache_enabled: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_depth: DEFAULT_MAX_HIERARCHY_DEPTH,
            auto_save: true,
            audit_enabled: true,
        }
    }

    /// Persists through `adapter`; the policy is loaded from it on build.
    pub fn adapter(mut self, adapter: impl Adapter + 'static) -> Self {
        self.adapter = Some(Arc::new(adapter));
        self
    }

    /// Like [`adapter`](Self::adapter), keeping a handle for the caller.
    pub fn shared_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    pub fn max_hierarchy_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn auto_save(mut self, enabled: bool) -> Self {
        self.auto_save = enabled;
        self
    }

    /// Disables decision audit logging.
    pub fn without_audit(mut self) -> Self {
        self.audit_enabled = false;
        self
    }

    fn assemble(self) -> Enforcer {
        let state = State::empty(&self.model, self.max_depth);
        Enforcer {
            model: Arc::new(self.model),
            state: RwLock::new(state),
            cache: Mutex::new(SieveCache::new(self.cache_capacity)),
            cache_enabled: AtomicBool::new(self.cache_enabled),
            regexes: RegexCache::new(),
            adapter: self.adapter,
            auto_save: AtomicBool::new(self.auto_save),
            audit_enabled: self.audit_enabled,
            max_depth: self.max_depth,
        }
    }

    /// Builds the enforcer, loading the policy if an adapter was given.
    pub fn build(self) -> Result<Enforcer> {
        let load = self.adapter.is_some();
        let enforcer = self.assemble();
        if load {
            enforcer.load_policy()?;
        }
        Ok(enforcer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_policy::MemoryAdapter;

    const RBAC: &str = "
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
";

    fn enforcer() -> Enforcer {
        Enforcer::builder(RBAC.parse().unwrap())
            .without_audit()
            .build()
            .unwrap()
    }

    fn rule(ptype: &str, values: &[&str]) -> Rule {
        (
            ptype.to_string(),
            values.iter().map(ToString::to_string).collect(),
        )
    }

    #[test]
    fn test_request_arity_is_checked() {
        let e = enforcer();
        assert!(matches!(
            e.enforce(&["alice", "data1"]),
            Err(Error::Arity {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_unknown_context_is_an_error() {
        let e = enforcer();
        let result = e.enforce_with(&EnforceContext::new("2"), &["a", "b", "c"]);
        assert!(matches!(
            result,
            Err(Error::UnknownDefinition {
                section: "request",
                ..
            })
        ));
    }

    #[test]
    fn test_policy_arity_is_checked() {
        let e = enforcer();
        assert!(matches!(
            e.add_policy(&["alice", "data1"]),
            Err(Error::Policy(PolicyError::Arity { .. }))
        ));
        assert!(matches!(
            e.add_named_policy("g", &["alice", "admin"]),
            Err(Error::Policy(PolicyError::UnknownType(_)))
        ));
        assert!(e.get_policy().unwrap().is_empty());
    }

    #[test]
    fn test_explain_names_the_deciding_rule() {
        let e = enforcer();
        e.add_policy(&["admin", "data1", "read"]).unwrap();
        e.add_grouping_policy(&["alice", "admin"]).unwrap();

        let decision = e.enforce_ex(&["alice", "data1", "read"]).unwrap();
        assert!(decision.allowed);
        assert_eq!(
            decision.explain,
            Some(vec!["admin".into(), "data1".into(), "read".into()])
        );

        let decision = e.enforce_ex(&["bob", "data1", "read"]).unwrap();
        assert_eq!(
            decision,
            Decision {
                allowed: false,
                explain: None
            }
        );
    }

    #[test]
    fn test_mutation_clears_cache() {
        let e = enforcer();
        assert!(!e.enforce(&["alice", "data1", "read"]).unwrap());
        assert_eq!(e.cached_decisions().unwrap(), 1);

        e.add_policy(&["alice", "data1", "read"]).unwrap();
        assert_eq!(e.cached_decisions().unwrap(), 0);
        assert!(e.enforce(&["alice", "data1", "read"]).unwrap());
    }

    #[test]
    fn test_failed_mutation_keeps_cache() {
        let e = enforcer();
        e.enforce(&["alice", "data1", "read"]).unwrap();
        assert!(e.add_policy(&["too", "short"]).is_err());
        assert_eq!(e.cached_decisions().unwrap(), 1);
    }

    #[test]
    fn test_disabling_cache() {
        let e = enforcer();
        e.enable_cache(false).unwrap();
        e.enforce(&["alice", "data1", "read"]).unwrap();
        assert_eq!(e.cached_decisions().unwrap(), 0);
    }

    #[test]
    fn test_auto_save_mirrors_mutations() {
        let adapter = Arc::new(MemoryAdapter::new());
        let e = Enforcer::builder(RBAC.parse().unwrap())
            .shared_adapter(adapter.clone())
            .without_audit()
            .build()
            .unwrap();

        e.add_policy(&["alice", "data1", "read"]).unwrap();
        e.add_grouping_policies(&[vec!["bob", "admin"], vec!["carol", "admin"]])
            .unwrap();
        e.remove_filtered_grouping_policy(0, &["bob"]).unwrap();

        assert_eq!(
            adapter.rules().unwrap(),
            vec![
                rule("p", &["alice", "data1", "read"]),
                rule("g", &["carol", "admin"]),
            ]
        );

        e.enable_auto_save(false);
        e.add_policy(&["dave", "data1", "read"]).unwrap();
        assert_eq!(adapter.rules().unwrap().len(), 2);
    }

    #[test]
    fn test_load_policy_requires_adapter() {
        let e = enforcer();
        assert!(matches!(e.load_policy(), Err(Error::Adapter(_))));
        assert!(matches!(e.save_policy(), Err(Error::Adapter(_))));
    }

    #[test]
    fn test_bad_load_keeps_current_policy() {
        let adapter = Arc::new(MemoryAdapter::with_rules([rule(
            "p",
            &["alice", "data1", "read"],
        )]));
        let e = Enforcer::builder(RBAC.parse().unwrap())
            .shared_adapter(adapter.clone())
            .without_audit()
            .build()
            .unwrap();
        assert!(e.enforce(&["alice", "data1", "read"]).unwrap());

        adapter
            .save_policy(&[rule("p", &["alice", "data1"])])
            .unwrap();
        assert!(matches!(e.load_policy(), Err(Error::Policy(_))));
        assert!(e.enforce(&["alice", "data1", "read"]).unwrap());
    }

    #[test]
    fn test_role_queries() {
        let e = enforcer();
        e.add_grouping_policy(&["alice", "role:operator"]).unwrap();
        e.add_grouping_policy(&["role:operator", "role:staff"]).unwrap();
        e.add_grouping_policy(&["bob", "role:operator"]).unwrap();

        assert_eq!(
            e.get_roles_for_user("alice", None).unwrap(),
            vec!["role:operator"]
        );
        assert_eq!(
            e.get_users_for_role("role:operator", None).unwrap(),
            vec!["alice", "bob"]
        );
        assert_eq!(
            e.get_implicit_roles_for_user("alice", None).unwrap(),
            vec!["role:operator", "role:staff"]
        );
        assert!(e.has_role_for_user("alice", "role:operator", None).unwrap());
        assert!(!e.has_role_for_user("alice", "role:staff", None).unwrap());
        assert!(e.has_grouping_policy(&["bob", "role:operator"]).unwrap());
    }

    #[test]
    fn test_clear_policy() {
        let e = enforcer();
        e.add_policy(&["admin", "data1", "read"]).unwrap();
        e.add_grouping_policy(&["alice", "admin"]).unwrap();
        e.clear_policy().unwrap();

        assert!(e.get_policy().unwrap().is_empty());
        assert!(e.get_grouping_policy().unwrap().is_empty());
        assert!(e.get_roles_for_user("alice", None).unwrap().is_empty());
        assert!(!e.enforce(&["alice", "data1", "read"]).unwrap());
    }

    #[test]
    fn test_batch_enforce() {
        let e = enforcer();
        e.add_policy(&["alice", "data1", "read"]).unwrap();
        let results = e
            .batch_enforce(&[
                vec!["alice", "data1", "read"],
                vec!["alice", "data1", "write"],
            ])
            .unwrap();
        assert_eq!(results, vec![true, false]);
    }
}
