//! Model definition parsing.
//!
//! A model file is a set of sections, each holding `key = value` lines:
//!
//! ```text
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
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use crate::effect::EffectKind;
use crate::error::{ModelError, Result};
use crate::matcher::{self, Expr, Scope};

/// Policy token that carries a rule's effect.
pub const EFFECT_TOKEN: &str = "eft";

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Section {
    Request,
    Policy,
    Role,
    Effect,
    Matchers,
}

impl Section {
    fn from_header(name: &str) -> Option<Self> {
        match name {
            "request_definition" => Some(Self::Request),
            "policy_definition" => Some(Self::Policy),
            "role_definition" => Some(Self::Role),
            "policy_effect" => Some(Self::Effect),
            "matchers" => Some(Self::Matchers),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Request => "request_definition",
            Self::Policy => "policy_definition",
            Self::Role => "role_definition",
            Self::Effect => "policy_effect",
            Self::Matchers => "matchers",
        }
    }

    /// Key prefix for assignments in this section (`r`, `p2`, `g`, ...).
    fn key_prefix(self) -> char {
        match self {
            Self::Request => 'r',
            Self::Policy => 'p',
            Self::Role => 'g',
            Self::Effect => 'e',
            Self::Matchers => 'm',
        }
    }
}

type RawSections = BTreeMap<Section, Vec<(String, String)>>;

/// Splits the source into sections of `(key, value)` assignments.
///
/// Comments start with `#`; a trailing `\` joins a line with the next one.
fn split_sections(source: &str) -> Result<RawSections> {
    let mut sections: RawSections = BTreeMap::new();
    let mut current: Option<Section> = None;
    let mut pending = String::new();

    for raw in source.lines() {
        let line = raw.trim();

        if let Some(continued) = line.strip_suffix('\\') {
            pending.push_str(continued.trim());
            pending.push(' ');
            continue;
        }

        let line = if pending.is_empty() {
            line.to_string()
        } else {
            let joined = format!("{pending}{line}");
            pending.clear();
            joined
        };
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let section = Section::from_header(header.trim()).ok_or_else(|| {
                ModelError::syntax(header.trim(), "unknown section")
            })?;
            if sections.contains_key(&section) {
                return Err(ModelError::syntax(section.name(), "section declared twice"));
            }
            sections.insert(section, Vec::new());
            current = Some(section);
            continue;
        }

        let section = current.ok_or_else(|| {
            ModelError::syntax("<none>", format!("assignment outside of a section: `{line}`"))
        })?;

        let (key, value) = line.split_once('=').ok_or_else(|| {
            ModelError::syntax(section.name(), format!("expected `key = value`, got `{line}`"))
        })?;
        let key = key.trim();
        let value = value.trim();

        if !is_section_key(key, section.key_prefix()) {
            return Err(ModelError::syntax(
                section.name(),
                format!("invalid key `{key}`"),
            ));
        }
        if value.is_empty() {
            return Err(ModelError::syntax(
                section.name(),
                format!("`{key}` has an empty value"),
            ));
        }

        let entries = sections.entry(section).or_default();
        if entries.iter().any(|(k, _)| k == key) {
            return Err(ModelError::syntax(
                section.name(),
                format!("`{key}` assigned twice"),
            ));
        }
        entries.push((key.to_string(), value.to_string()));
    }

    if !pending.is_empty() {
        return Err(ModelError::syntax(
            current.map_or("<none>", Section::name),
            "line continuation at end of input",
        ));
    }

    Ok(sections)
}

/// `r`, `r2`, `p10`: the section prefix followed by optional digits.
fn is_section_key(key: &str, prefix: char) -> bool {
    key.strip_prefix(prefix)
        .is_some_and(|suffix| suffix.chars().all(|c| c.is_ascii_digit()))
}

fn key_suffix(key: &str) -> &str {
    &key[1..]
}

fn parse_tokens(section: Section, key: &str, value: &str) -> Result<Vec<String>> {
    let tokens: Vec<String> = value.split(',').map(|t| t.trim().to_string()).collect();

    let mut seen = HashSet::new();
    for token in &tokens {
        let valid = !token.is_empty()
            && token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(ModelError::syntax(
                section.name(),
                format!("`{key}` has an invalid token `{token}`"),
            ));
        }
        if !seen.insert(token.as_str()) {
            return Err(ModelError::syntax(
                section.name(),
                format!("`{key}` declares `{token}` twice"),
            ));
        }
    }

    Ok(tokens)
}

// ============================================================================
// Model
// ============================================================================

/// A grouping relation declared in `[role_definition]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleDefinition {
    /// 2 for `(member, group)`, 3 for `(member, group, domain)`.
    pub arity: usize,
}

impl RoleDefinition {
    pub fn has_domain(&self) -> bool {
        self.arity == 3
    }
}

/// A compiled matcher together with its source.
#[derive(Debug, Clone, PartialEq)]
pub struct Matcher {
    pub source: String,
    pub expr: Expr,
}

/// Parsed, validated, and compiled access-control model.
///
/// Immutable once built; enforcers share it read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    requests: BTreeMap<String, Vec<String>>,
    policies: BTreeMap<String, Vec<String>>,
    roles: BTreeMap<String, RoleDefinition>,
    effects: BTreeMap<String, EffectKind>,
    matchers: BTreeMap<String, Matcher>,
}

impl Model {
    /// Reads and parses a model file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model = source.parse()?;
        debug!(path = %path.display(), "loaded model");
        Ok(model)
    }

    /// Token names of request definition `key` (`r`, `r2`, ...).
    pub fn request_tokens(&self, key: &str) -> Option<&[String]> {
        self.requests.get(key).map(Vec::as_slice)
    }

    /// Token names of policy definition `ptype` (`p`, `p2`, ...).
    pub fn policy_tokens(&self, ptype: &str) -> Option<&[String]> {
        self.policies.get(ptype).map(Vec::as_slice)
    }

    pub fn policy_types(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    pub fn role_definition(&self, name: &str) -> Option<RoleDefinition> {
        self.roles.get(name).copied()
    }

    pub fn role_definitions(&self) -> impl Iterator<Item = (&str, RoleDefinition)> {
        self.roles.iter().map(|(name, def)| (name.as_str(), *def))
    }

    pub fn effect(&self, key: &str) -> Option<EffectKind> {
        self.effects.get(key).copied()
    }

    pub fn matcher(&self, key: &str) -> Option<&Matcher> {
        self.matchers.get(key)
    }

    /// Number of values a stored tuple of type `ptype` must have.
    ///
    /// Covers both policy definitions and grouping relations.
    pub fn arity(&self, ptype: &str) -> Option<usize> {
        self.policies
            .get(ptype)
            .map(Vec::len)
            .or_else(|| self.roles.get(ptype).map(|r| r.arity))
    }

    /// Position of the `eft` token in policy definition `ptype`, if declared.
    pub fn effect_index(&self, ptype: &str) -> Option<usize> {
        self.policies
            .get(ptype)?
            .iter()
            .position(|t| t == EFFECT_TOKEN)
    }

    fn build(sections: &RawSections) -> Result<Self> {
        for required in [
            Section::Request,
            Section::Policy,
            Section::Effect,
            Section::Matchers,
        ] {
            match sections.get(&required) {
                Some(entries) if !entries.is_empty() => {}
                _ => {
                    return Err(ModelError::syntax(
                        required.name(),
                        "missing required section",
                    ));
                }
            }
        }

        let collect = |section: Section| -> Result<BTreeMap<String, Vec<String>>> {
            sections
                .get(&section)
                .into_iter()
                .flatten()
                .map(|(key, value)| Ok((key.clone(), parse_tokens(section, key, value)?)))
                .collect()
        };

        let requests = collect(Section::Request)?;
        let policies = collect(Section::Policy)?;

        let mut roles = BTreeMap::new();
        for (key, value) in sections.get(&Section::Role).into_iter().flatten() {
            let parts: Vec<&str> = value.split(',').map(str::trim).collect();
            if !parts.iter().all(|p| *p == "_") || !(2..=3).contains(&parts.len()) {
                return Err(ModelError::syntax(
                    Section::Role.name(),
                    format!("`{key}` must be `_, _` or `_, _, _`"),
                ));
            }
            roles.insert(key.clone(), RoleDefinition { arity: parts.len() });
        }

        for key in ["r", "p", "e", "m"] {
            let section = match key {
                "r" => Section::Request,
                "p" => Section::Policy,
                "e" => Section::Effect,
                _ => Section::Matchers,
            };
            let present = sections
                .get(&section)
                .is_some_and(|entries| entries.iter().any(|(k, _)| k == key));
            if !present {
                return Err(ModelError::syntax(
                    section.name(),
                    format!("missing default definition `{key}`"),
                ));
            }
        }

        let mut effects = BTreeMap::new();
        for (key, value) in sections.get(&Section::Effect).into_iter().flatten() {
            let policy_key = format!("p{}", key_suffix(key));
            if !policies.contains_key(&policy_key) {
                return Err(ModelError::syntax(
                    Section::Effect.name(),
                    format!("`{key}` has no matching policy definition `{policy_key}`"),
                ));
            }
            effects.insert(key.clone(), EffectKind::parse(value, &policy_key)?);
        }

        let mut matchers = BTreeMap::new();
        for (key, source) in sections.get(&Section::Matchers).into_iter().flatten() {
            let suffix = key_suffix(key);
            let request_key = format!("r{suffix}");
            let policy_key = format!("p{suffix}");
            let (Some(request_tokens), Some(policy_tokens)) =
                (requests.get(&request_key), policies.get(&policy_key))
            else {
                return Err(ModelError::syntax(
                    Section::Matchers.name(),
                    format!("`{key}` needs both `{request_key}` and `{policy_key}` definitions"),
                ));
            };

            let scope = Scope {
                request_key: &request_key,
                request_tokens,
                policy_key: &policy_key,
                policy_tokens,
                roles: &roles,
            };
            let expr = matcher::compile(source, &scope).map_err(|reason| {
                ModelError::syntax(Section::Matchers.name(), format!("`{key}`: {reason}"))
            })?;
            matchers.insert(
                key.clone(),
                Matcher {
                    source: source.clone(),
                    expr,
                },
            );
        }

        Ok(Self {
            requests,
            policies,
            roles,
            effects,
            matchers,
        })
    }
}

impl FromStr for Model {
    type Err = ModelError;

    fn from_str(source: &str) -> Result<Self> {
        let sections = split_sections(source)?;
        Self::build(&sections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RBAC_MODEL: &str = r#"
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
"#;

    fn with_section(section: &str, replacement: &str) -> String {
        RBAC_MODEL
            .lines()
            .map(|line| {
                if line.starts_with(section) {
                    replacement.to_string()
                } else {
                    line.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn syntax_section(err: ModelError) -> String {
        match err {
            ModelError::Syntax { section, .. } => section,
            other => panic!("expected syntax error, got {other}"),
        }
    }

    #[test]
    fn test_parse_rbac_model() {
        let model: Model = RBAC_MODEL.parse().unwrap();

        assert_eq!(
            model.request_tokens("r").unwrap(),
            &["sub".to_string(), "obj".into(), "act".into()]
        );
        assert_eq!(model.arity("p"), Some(3));
        assert_eq!(model.arity("g"), Some(2));
        assert_eq!(model.arity("g2"), None);
        assert_eq!(model.effect("e"), Some(EffectKind::AllowOverride));
        assert!(model.matcher("m").is_some());
        assert_eq!(model.effect_index("p"), None);
    }

    #[test]
    fn test_parse_is_pure() {
        let a: Model = RBAC_MODEL.parse().unwrap();
        let b: Model = RBAC_MODEL.parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_comments_and_continuations() {
        let source = r#"
# access model
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act, eft

[policy_effect]
e = some(where (p.eft == allow)) && \
    !some(where (p.eft == deny))

[matchers]
# exact match only
m = r.sub == p.sub && \
    r.obj == p.obj && r.act == p.act
"#;
        let model: Model = source.parse().unwrap();
        assert_eq!(model.effect("e"), Some(EffectKind::AllowAndDeny));
        assert_eq!(model.effect_index("p"), Some(3));
        assert_eq!(
            model.matcher("m").unwrap().source,
            "r.sub == p.sub && r.obj == p.obj && r.act == p.act"
        );
    }

    #[test]
    fn test_domain_role_definition() {
        let source = RBAC_MODEL
            .replace("g = _, _", "g = _, _, _")
            .replace("r = sub, obj, act", "r = sub, dom, obj, act")
            .replace("p = sub, obj, act", "p = sub, dom, obj, act")
            .replace("g(r.sub, p.sub)", "g(r.sub, p.sub, r.dom)");
        let model: Model = source.parse().unwrap();
        assert!(model.role_definition("g").unwrap().has_domain());
        assert_eq!(model.arity("g"), Some(3));
    }

    #[test]
    fn test_missing_sections() {
        let source = with_section("[matchers]", "");
        let source = source.replace("m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act", "");
        let err = source.parse::<Model>().unwrap_err();
        assert_eq!(syntax_section(err), "matchers");

        let source = RBAC_MODEL
            .replace("[request_definition]", "")
            .replace("r = sub, obj, act", "");
        let err = source.parse::<Model>().unwrap_err();
        assert_eq!(syntax_section(err), "request_definition");
    }

    #[test]
    fn test_role_definition_is_optional() {
        let source = RBAC_MODEL
            .replace("[role_definition]", "")
            .replace("g = _, _", "")
            .replace("g(r.sub, p.sub)", "r.sub == p.sub");
        assert!(source.parse::<Model>().is_ok());
    }

    #[test]
    fn test_duplicate_tokens_rejected() {
        let source = RBAC_MODEL.replace("p = sub, obj, act", "p = sub, obj, sub");
        let err = source.parse::<Model>().unwrap_err();
        assert_eq!(syntax_section(err), "policy_definition");
    }

    #[test]
    fn test_unknown_section_rejected() {
        let source = format!("{RBAC_MODEL}\n[extras]\nx = 1\n");
        let err = source.parse::<Model>().unwrap_err();
        assert_eq!(syntax_section(err), "extras");
    }

    #[test]
    fn test_matcher_must_reference_declared_names() {
        let source = RBAC_MODEL.replace("r.act == p.act", "r.act == p.action");
        let err = source.parse::<Model>().unwrap_err();
        assert_eq!(syntax_section(err), "matchers");

        let source = RBAC_MODEL.replace("g(r.sub, p.sub)", "g2(r.sub, p.sub)");
        let err = source.parse::<Model>().unwrap_err();
        assert_eq!(syntax_section(err), "matchers");
    }

    #[test]
    fn test_invalid_role_definition() {
        let source = RBAC_MODEL.replace("g = _, _", "g = _");
        let err = source.parse::<Model>().unwrap_err();
        assert_eq!(syntax_section(err), "role_definition");
    }

    #[test]
    fn test_suffixed_definitions() {
        let source = format!(
            "{RBAC_MODEL}\n"
        )
        .replace("r = sub, obj, act", "r = sub, obj, act\nr2 = sub, obj")
        .replace("p = sub, obj, act", "p = sub, obj, act\np2 = sub, obj")
        .replace(
            "e = some(where (p.eft == allow))",
            "e = some(where (p.eft == allow))\ne2 = priority(p.eft) || deny",
        )
        .replace(
            "m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act",
            "m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act\nm2 = r2.sub == p2.sub && keyMatch(r2.obj, p2.obj)",
        );
        let model: Model = source.parse().unwrap();
        assert_eq!(model.arity("p2"), Some(2));
        assert_eq!(model.effect("e2"), Some(EffectKind::Priority));
        assert!(model.matcher("m2").is_some());
        assert_eq!(model.policy_types().collect::<Vec<_>>(), vec!["p", "p2"]);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.conf");
        std::fs::write(&path, RBAC_MODEL).unwrap();

        let model = Model::from_file(&path).unwrap();
        assert_eq!(model.arity("p"), Some(3));

        let missing = Model::from_file(dir.path().join("missing.conf"));
        assert!(matches!(missing, Err(ModelError::Io { .. })));
    }
}
