//! Matcher evaluation.
//!
//! Walks a compiled [`Expr`] against one request and one candidate rule.
//! Values borrow from the request, the rule, and the expression itself, so an
//! evaluation allocates nothing on the common path.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use palisade_model::{BinaryOp, Expr, Function, Literal};
use palisade_rbac::RoleManager;
use thiserror::Error;

use crate::functions::{self, RegexCache};

/// A matcher could not be evaluated.
///
/// Raised for type mismatches, unbound fields, and bad function arguments.
/// These are model or usage faults and are never reported as a deny.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Failed to evaluate `{expression}`: {reason}")]
pub struct EvalError {
    pub expression: String,
    pub reason: String,
}

impl EvalError {
    pub(crate) fn new(expression: &Expr, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

/// Runtime value of a matcher subexpression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Str(&'a str),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Value<'_> {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Bool(_) => "boolean",
        }
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "'{s}'"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Role managers and caches a matcher is evaluated against.
pub(crate) struct Evaluator<'e> {
    pub(crate) roles: &'e HashMap<String, RoleManager>,
    pub(crate) regexes: &'e RegexCache,
}

impl Evaluator<'_> {
    /// Evaluates a top-level matcher, which must produce a boolean.
    pub(crate) fn matches<'a>(
        &self,
        expr: &'a Expr,
        request: &[&'a str],
        rule: &'a [String],
    ) -> Result<bool, EvalError> {
        match self.eval(expr, request, rule)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::new(
                expr,
                format!("matcher produced a {}, expected a boolean", other.type_name()),
            )),
        }
    }

    fn eval<'a>(
        &self,
        expr: &'a Expr,
        request: &[&'a str],
        rule: &'a [String],
    ) -> Result<Value<'a>, EvalError> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::Str(s) => Value::Str(s.as_str()),
                Literal::Int(n) => Value::Int(*n),
                Literal::Float(x) => Value::Float(*x),
                Literal::Bool(b) => Value::Bool(*b),
            }),
            Expr::RequestField { index, .. } => request
                .get(*index)
                .map(|v| Value::Str(*v))
                .ok_or_else(|| EvalError::new(expr, "request field is not bound")),
            Expr::PolicyField { index, .. } => rule
                .get(*index)
                .map(|v| Value::Str(v.as_str()))
                .ok_or_else(|| EvalError::new(expr, "policy field is not bound")),
            Expr::Not(inner) => {
                let b = self.boolean(inner, request, rule)?;
                Ok(Value::Bool(!b))
            }
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => Ok(Value::Bool(
                self.boolean(left, request, rule)? && self.boolean(right, request, rule)?,
            )),
            Expr::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => Ok(Value::Bool(
                self.boolean(left, request, rule)? || self.boolean(right, request, rule)?,
            )),
            Expr::Binary { op, left, right } => {
                let l = self.eval(left, request, rule)?;
                let r = self.eval(right, request, rule)?;
                compare(expr, *op, l, r).map(Value::Bool)
            }
            Expr::In { element, set } => {
                let needle = self.eval(element, request, rule)?;
                for candidate in set {
                    let value = self.eval(candidate, request, rule)?;
                    if equal(expr, needle, value)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Expr::Call { function, args } => self.call(expr, function, args, request, rule),
        }
    }

    fn boolean<'a>(
        &self,
        expr: &'a Expr,
        request: &[&'a str],
        rule: &'a [String],
    ) -> Result<bool, EvalError> {
        match self.eval(expr, request, rule)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::new(
                expr,
                format!("expected a boolean, found {} {other}", other.type_name()),
            )),
        }
    }

    fn string<'a>(
        &self,
        expr: &'a Expr,
        request: &[&'a str],
        rule: &'a [String],
    ) -> Result<&'a str, EvalError> {
        match self.eval(expr, request, rule)? {
            Value::Str(s) => Ok(s),
            other => Err(EvalError::new(
                expr,
                format!("expected a string, found {} {other}", other.type_name()),
            )),
        }
    }

    fn call<'a>(
        &self,
        call: &'a Expr,
        function: &Function,
        args: &'a [Expr],
        request: &[&'a str],
        rule: &'a [String],
    ) -> Result<Value<'a>, EvalError> {
        let strings = args
            .iter()
            .map(|arg| self.string(arg, request, rule))
            .collect::<Result<Vec<_>, _>>()?;

        let result = match (function, strings.as_slice()) {
            (Function::Grouping(name), [member, group]) => {
                self.role_manager(call, name)?.has_link(member, group, None)
            }
            (Function::Grouping(name), [member, group, domain]) => {
                self.role_manager(call, name)?
                    .has_link(member, group, Some(*domain))
            }
            (Function::KeyMatch, [key, pattern]) => functions::key_match(key, pattern),
            (Function::KeyMatch2, [key, pattern]) => functions::key_match2(key, pattern),
            (Function::KeyMatch3, [key, pattern]) => functions::key_match3(key, pattern),
            (Function::GlobMatch, [value, pattern]) => functions::glob_match(value, pattern),
            (Function::RegexMatch, [value, pattern]) => self
                .regexes
                .is_match(value, pattern)
                .map_err(|reason| EvalError::new(call, reason))?,
            (Function::IpMatch, [ip, pattern]) => {
                functions::ip_match(ip, pattern).map_err(|reason| EvalError::new(call, reason))?
            }
            (function, args) => {
                return Err(EvalError::new(
                    call,
                    format!(
                        "{} does not take {} arguments",
                        function.name(),
                        args.len()
                    ),
                ));
            }
        };

        Ok(Value::Bool(result))
    }

    fn role_manager(&self, call: &Expr, name: &str) -> Result<&RoleManager, EvalError> {
        self.roles
            .get(name)
            .ok_or_else(|| {
                EvalError::new(call, format!("grouping relation {name} is not declared"))
            })
    }
}

// ─── Comparison ─────────────────────────────────────────────────────────

/// Numeric view of a value. Strings that parse as numbers take part in
/// numeric comparisons.
fn number(value: Value<'_>) -> Option<f64> {
    match value {
        Value::Int(n) => Some(n as f64),
        Value::Float(x) => Some(x),
        Value::Str(s) => s.trim().parse().ok(),
        Value::Bool(_) => None,
    }
}

fn ordering(expr: &Expr, left: Value<'_>, right: Value<'_>) -> Result<Ordering, EvalError> {
    let mismatch = || {
        EvalError::new(
            expr,
            format!(
                "cannot compare {} {left} with {} {right}",
                left.type_name(),
                right.type_name()
            ),
        )
    };

    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(&b)),
        (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(&b)),
        (Value::Bool(_), _) | (_, Value::Bool(_)) => Err(mismatch()),
        _ => {
            let (Some(a), Some(b)) = (number(left), number(right)) else {
                return Err(mismatch());
            };
            a.partial_cmp(&b).ok_or_else(mismatch)
        }
    }
}

fn equal(expr: &Expr, left: Value<'_>, right: Value<'_>) -> Result<bool, EvalError> {
    ordering(expr, left, right).map(Ordering::is_eq)
}

fn compare(
    expr: &Expr,
    op: BinaryOp,
    left: Value<'_>,
    right: Value<'_>,
) -> Result<bool, EvalError> {
    if matches!(left, Value::Bool(_)) && !matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
        return Err(EvalError::new(expr, "booleans only support == and !="));
    }
    let ord = ordering(expr, left, right)?;
    match op {
        BinaryOp::Eq => Ok(ord.is_eq()),
        BinaryOp::Ne => Ok(ord.is_ne()),
        BinaryOp::Lt => Ok(ord.is_lt()),
        BinaryOp::Le => Ok(ord.is_le()),
        BinaryOp::Gt => Ok(ord.is_gt()),
        BinaryOp::Ge => Ok(ord.is_ge()),
        BinaryOp::And | BinaryOp::Or => Err(EvalError::new(
            expr,
            format!("{} is not a comparison", op.symbol()),
        )),
    }
}
