//! Policy effects and the resolver that folds per-rule outcomes into a
//! single decision.
//!
//! The set of effect kinds is closed. Every kind denies when no rule matched.

use std::fmt;

use crate::error::{ModelError, Result};

// ============================================================================
// Effect
// ============================================================================

/// The effect carried by a matching policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RuleEffect {
    /// Grant access.
    #[default]
    Allow,
    /// Deny access.
    Deny,
}

impl RuleEffect {
    /// Parses the value stored in a rule's `eft` field.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }
}

impl fmt::Display for RuleEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::Deny => f.write_str("deny"),
        }
    }
}

// ============================================================================
// EffectKind
// ============================================================================

/// How matching rules combine into the final decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    /// `some(where (p.eft == allow))`
    ///
    /// Allowed iff at least one matching rule allows.
    AllowOverride,

    /// `some(where (p.eft == allow)) && !some(where (p.eft == deny))`
    ///
    /// Allowed iff at least one matching rule allows and none denies.
    AllowAndDeny,

    /// `!some(where (p.eft == deny))`
    ///
    /// Allowed iff some rule matched and none denies. Unlike the loose
    /// reading of the expression, an empty match set still denies.
    DenyOverride,

    /// `priority(p.eft) || deny`
    ///
    /// The first matching rule in store order decides.
    Priority,
}

impl EffectKind {
    /// Recognises an effect expression.
    ///
    /// Whitespace is ignored. `policy_key` is the policy definition the effect
    /// pairs with (`p`, `p2`, ...); both `p.eft` and `<policy_key>.eft` are
    /// accepted.
    pub fn parse(expression: &str, policy_key: &str) -> Result<Self> {
        let compact: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
        let normalized = compact.replace(&format!("{policy_key}.eft"), "p.eft");

        match normalized.as_str() {
            "some(where(p.eft==allow))" => Ok(Self::AllowOverride),
            "some(where(p.eft==allow))&&!some(where(p.eft==deny))" => Ok(Self::AllowAndDeny),
            "!some(where(p.eft==deny))" => Ok(Self::DenyOverride),
            "priority(p.eft)||deny" => Ok(Self::Priority),
            _ => Err(ModelError::syntax(
                "policy_effect",
                format!("unsupported effect expression `{}`", expression.trim()),
            )),
        }
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Outcome of evaluating the matcher against one policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// Whether the matcher evaluated to true for the rule.
    pub matched: bool,
    /// Effect of the rule. Only meaningful when `matched` is set.
    pub effect: RuleEffect,
}

impl Outcome {
    pub fn matched(effect: RuleEffect) -> Self {
        Self {
            matched: true,
            effect,
        }
    }

    pub fn unmatched() -> Self {
        Self {
            matched: false,
            effect: RuleEffect::Allow,
        }
    }
}

/// Final decision of the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub allowed: bool,
    /// Index of the rule that decided the outcome, if a rule did.
    pub deciding_rule: Option<usize>,
}

/// Incremental effect resolver.
///
/// Outcomes are fed in store order with [`observe`](Self::observe), which
/// reports when the decision can no longer change so callers can stop
/// evaluating rules early.
#[derive(Debug, Clone)]
pub struct EffectResolver {
    kind: EffectKind,
    first_allow: Option<usize>,
    first_deny: Option<usize>,
    first_match: Option<usize>,
}

impl EffectResolver {
    pub fn new(kind: EffectKind) -> Self {
        Self {
            kind,
            first_allow: None,
            first_deny: None,
            first_match: None,
        }
    }

    /// Records the outcome for the rule at `index`.
    ///
    /// Returns `true` once the decision is final.
    pub fn observe(&mut self, index: usize, outcome: Outcome) -> bool {
        if !outcome.matched {
            return false;
        }

        self.first_match.get_or_insert(index);
        match outcome.effect {
            RuleEffect::Allow => {
                self.first_allow.get_or_insert(index);
            }
            RuleEffect::Deny => {
                self.first_deny.get_or_insert(index);
            }
        }

        match self.kind {
            EffectKind::AllowOverride => self.first_allow.is_some(),
            EffectKind::AllowAndDeny | EffectKind::DenyOverride => self.first_deny.is_some(),
            EffectKind::Priority => true,
        }
    }

    /// Produces the decision from everything observed so far.
    pub fn finish(&self) -> Resolution {
        match self.kind {
            EffectKind::AllowOverride => Resolution {
                allowed: self.first_allow.is_some(),
                deciding_rule: self.first_allow,
            },
            EffectKind::AllowAndDeny | EffectKind::DenyOverride => match self.first_deny {
                Some(deny) => Resolution {
                    allowed: false,
                    deciding_rule: Some(deny),
                },
                None => Resolution {
                    allowed: self.first_allow.is_some(),
                    deciding_rule: self.first_allow,
                },
            },
            EffectKind::Priority => Resolution {
                allowed: self.first_match.is_some() && self.first_match == self.first_allow,
                deciding_rule: self.first_match,
            },
        }
    }
}

/// Folds a complete sequence of outcomes.
pub fn resolve(kind: EffectKind, outcomes: impl IntoIterator<Item = Outcome>) -> Resolution {
    let mut resolver = EffectResolver::new(kind);
    for (index, outcome) in outcomes.into_iter().enumerate() {
        if resolver.observe(index, outcome) {
            break;
        }
    }
    resolver.finish()
}
