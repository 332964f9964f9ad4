//! Matcher expression compiler.
//!
//! A matcher is compiled once, when the model is parsed, into an [`Expr`]
//! tree. Field references are resolved to positions in the request and policy
//! tuples and function names to a closed [`Function`] set, so evaluation never
//! touches the source text again.
//!
//! Supported syntax:
//! - Field references: `r.sub`, `p.obj` (or `r2.sub`, `p2.obj` for suffixed
//!   definitions)
//! - Comparisons: `==`, `!=`, `<`, `<=`, `>`, `>=`
//! - Boolean operators: `&&`, `||`, `!`
//! - Membership: `r.act in ('read', 'write')`
//! - Calls: grouping relations (`g(r.sub, p.sub)`) and the built-in matching
//!   functions (`keyMatch`, `keyMatch2`, `keyMatch3`, `regexMatch`,
//!   `globMatch`, `ipMatch`)
//! - Literals: `'strings'`, `"strings"`, integers, floats, `true`, `false`

use std::collections::BTreeMap;
use std::fmt;

use crate::model::RoleDefinition;

// ─── AST ────────────────────────────────────────────────────────────────

/// Compiled matcher expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// `r.<name>`, bound to position `index` of the request.
    RequestField { name: String, index: usize },
    /// `p.<name>`, bound to position `index` of the candidate rule.
    PolicyField { name: String, index: usize },
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `element in (a, b, ...)`
    In {
        element: Box<Expr>,
        set: Vec<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

/// A callable in a matcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Function {
    /// A grouping relation declared in `[role_definition]`.
    Grouping(String),
    KeyMatch,
    KeyMatch2,
    KeyMatch3,
    RegexMatch,
    GlobMatch,
    IpMatch,
}

impl Function {
    fn builtin(name: &str) -> Option<Self> {
        match name {
            "keyMatch" => Some(Self::KeyMatch),
            "keyMatch2" => Some(Self::KeyMatch2),
            "keyMatch3" => Some(Self::KeyMatch3),
            "regexMatch" => Some(Self::RegexMatch),
            "globMatch" => Some(Self::GlobMatch),
            "ipMatch" => Some(Self::IpMatch),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Grouping(name) => name,
            Self::KeyMatch => "keyMatch",
            Self::KeyMatch2 => "keyMatch2",
            Self::KeyMatch3 => "keyMatch3",
            Self::RegexMatch => "regexMatch",
            Self::GlobMatch => "globMatch",
            Self::IpMatch => "ipMatch",
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Literal::Str(s)) => write!(f, "'{s}'"),
            Expr::Literal(Literal::Int(n)) => write!(f, "{n}"),
            Expr::Literal(Literal::Float(x)) => write!(f, "{x}"),
            Expr::Literal(Literal::Bool(b)) => write!(f, "{b}"),
            Expr::RequestField { name, .. } => write!(f, "r.{name}"),
            Expr::PolicyField { name, .. } => write!(f, "p.{name}"),
            Expr::Not(inner) => write!(f, "!{inner}"),
            Expr::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::In { element, set } => {
                write!(f, "{element} in (")?;
                write_list(f, set)?;
                f.write_str(")")
            }
            Expr::Call { function, args } => {
                write!(f, "{}(", function.name())?;
                write_list(f, args)?;
                f.write_str(")")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

// ─── Lexer ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    True,
    False,
    In,
    Dot,
    Comma,
    LParen,
    RParen,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let next_is = |i: usize, c: char| chars.get(i + 1) == Some(&c);

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' if next_is(i, '=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if next_is(i, '=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' if next_is(i, '=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '>' if next_is(i, '=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '&' if next_is(i, '&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next_is(i, '|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                let mut value = String::new();
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".into()),
                        Some('\\') => {
                            match chars.get(i + 1) {
                                Some(&escaped) => value.push(escaped),
                                None => return Err("unterminated string literal".into()),
                            }
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                // A dot followed by a digit continues the number; otherwise it
                // belongs to the next token.
                let is_float = chars.get(i) == Some(&'.')
                    && chars.get(i + 1).is_some_and(char::is_ascii_digit);
                if is_float {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                if is_float {
                    let value = text
                        .parse()
                        .map_err(|_| format!("invalid number `{text}`"))?;
                    tokens.push(Token::Float(value));
                } else {
                    let value = text
                        .parse()
                        .map_err(|_| format!("invalid integer `{text}`"))?;
                    tokens.push(Token::Int(value));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "in" => Token::In,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected character `{other}`")),
        }
    }

    Ok(tokens)
}

// ─── Parser ─────────────────────────────────────────────────────────────

/// Names a matcher may refer to.
pub(crate) struct Scope<'a> {
    pub request_key: &'a str,
    pub request_tokens: &'a [String],
    pub policy_key: &'a str,
    pub policy_tokens: &'a [String],
    pub roles: &'a BTreeMap<String, RoleDefinition>,
}

struct Parser<'s, 'a> {
    tokens: Vec<Token>,
    pos: usize,
    scope: &'s Scope<'a>,
}

impl Parser<'_, '_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), String> {
        match self.advance() {
            Some(ref tok) if tok == expected => Ok(()),
            Some(tok) => Err(format!("expected {what}, found {tok:?}")),
            None => Err(format!("expected {what}, found end of expression")),
        }
    }

    /// or = and ("||" and)*
    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// and = unary ("&&" unary)*
    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// unary = "!" unary | compare
    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_compare()
    }

    /// compare = primary (op primary | "in" "(" list ")")?
    fn parse_compare(&mut self) -> Result<Expr, String> {
        let left = self.parse_primary()?;

        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::In) => {
                self.advance();
                self.expect(&Token::LParen, "`(` after `in`")?;
                let set = self.parse_list()?;
                if set.is_empty() {
                    return Err("`in` requires at least one element".into());
                }
                return Ok(Expr::In {
                    element: Box::new(left),
                    set,
                });
            }
            _ => return Ok(left),
        };

        self.advance();
        let right = self.parse_primary()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Comma separated expressions up to and including the closing `)`.
    fn parse_list(&mut self) -> Result<Vec<Expr>, String> {
        let mut items = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.parse_or()?);
            match self.advance() {
                Some(Token::Comma) => {}
                Some(Token::RParen) => return Ok(items),
                Some(tok) => return Err(format!("expected `,` or `)`, found {tok:?}")),
                None => return Err("expected `)`, found end of expression".into()),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Literal::Str(s))),
            Some(Token::Int(n)) => Ok(Expr::Literal(Literal::Int(n))),
            Some(Token::Float(x)) => Ok(Expr::Literal(Literal::Float(x))),
            Some(Token::True) => Ok(Expr::Literal(Literal::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Literal::Bool(false))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen, "`)`")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(field)) => self.resolve_field(&name, &field),
                        _ => Err(format!("expected a field name after `{name}.`")),
                    }
                }
                Some(Token::LParen) => {
                    self.advance();
                    let args = self.parse_list()?;
                    self.resolve_call(&name, args)
                }
                _ => Err(format!("unexpected identifier `{name}`")),
            },
            Some(tok) => Err(format!("unexpected token {tok:?}")),
            None => Err("unexpected end of expression".into()),
        }
    }

    fn resolve_field(&self, prefix: &str, field: &str) -> Result<Expr, String> {
        let scope = self.scope;
        if prefix == scope.request_key {
            let index = position(scope.request_tokens, field).ok_or_else(|| {
                format!("`{prefix}.{field}` is not declared in [request_definition]")
            })?;
            Ok(Expr::RequestField {
                name: field.to_string(),
                index,
            })
        } else if prefix == scope.policy_key {
            let index = position(scope.policy_tokens, field).ok_or_else(|| {
                format!("`{prefix}.{field}` is not declared in [policy_definition]")
            })?;
            Ok(Expr::PolicyField {
                name: field.to_string(),
                index,
            })
        } else {
            Err(format!("unknown reference `{prefix}.{field}`"))
        }
    }

    fn resolve_call(&self, name: &str, args: Vec<Expr>) -> Result<Expr, String> {
        let function = if let Some(role) = self.scope.roles.get(name) {
            if args.len() != role.arity {
                return Err(format!(
                    "grouping `{name}` takes {} arguments, got {}",
                    role.arity,
                    args.len()
                ));
            }
            Function::Grouping(name.to_string())
        } else if let Some(builtin) = Function::builtin(name) {
            if args.len() != 2 {
                return Err(format!("`{name}` takes 2 arguments, got {}", args.len()));
            }
            builtin
        } else {
            return Err(format!("unknown function `{name}`"));
        };

        Ok(Expr::Call { function, args })
    }
}

fn position(tokens: &[String], name: &str) -> Option<usize> {
    tokens.iter().position(|t| t == name)
}

/// Compiles matcher source against the names in `scope`.
pub(crate) fn compile(source: &str, scope: &Scope<'_>) -> Result<Expr, String> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err("empty matcher expression".into());
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        scope,
    };
    let expr = parser.parse_or()?;
    if let Some(tok) = parser.peek() {
        return Err(format!("unexpected trailing token {tok:?}"));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    fn compile_rbac(source: &str) -> Result<Expr, String> {
        let request = strings(&["sub", "obj", "act"]);
        let policy = strings(&["sub", "obj", "act", "eft"]);
        let mut roles = BTreeMap::new();
        roles.insert("g".to_string(), RoleDefinition { arity: 2 });
        roles.insert("g2".to_string(), RoleDefinition { arity: 3 });
        let scope = Scope {
            request_key: "r",
            request_tokens: &request,
            policy_key: "p",
            policy_tokens: &policy,
            roles: &roles,
        };
        compile(source, &scope)
    }

    #[test]
    fn test_tokenize_operators() {
        let tokens = tokenize("a == b && !c || d != 'x'").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("a".into()),
                Token::Eq,
                Token::Ident("b".into()),
                Token::And,
                Token::Not,
                Token::Ident("c".into()),
                Token::Or,
                Token::Ident("d".into()),
                Token::Ne,
                Token::Str("x".into()),
            ]
        );
    }

    #[test]
    fn test_tokenize_numbers_and_escapes() {
        let tokens = tokenize(r#"12 3.5 "a\"b""#).unwrap();
        assert_eq!(
            tokens,
            vec![Token::Int(12), Token::Float(3.5), Token::Str("a\"b".into())]
        );
        assert!(tokenize("'open").is_err());
        assert!(tokenize("a # b").is_err());
    }

    #[test]
    fn test_compile_binds_field_positions() {
        let expr = compile_rbac("r.obj == p.obj").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Eq,
                left: Box::new(Expr::RequestField {
                    name: "obj".into(),
                    index: 1
                }),
                right: Box::new(Expr::PolicyField {
                    name: "obj".into(),
                    index: 1
                }),
            }
        );
    }

    #[test]
    fn test_compile_precedence() {
        // && binds tighter than ||
        let expr = compile_rbac("r.sub == 'a' || r.obj == 'b' && r.act == 'c'").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Or,
                right,
                ..
            } => assert!(matches!(
                *right,
                Expr::Binary {
                    op: BinaryOp::And,
                    ..
                }
            )),
            other => panic!("expected top-level ||, got {other}"),
        }
    }

    #[test]
    fn test_compile_rbac_matcher() {
        let expr = compile_rbac("g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act").unwrap();
        assert_eq!(
            expr.to_string(),
            "((g(r.sub, p.sub) && (r.obj == p.obj)) && (r.act == p.act))"
        );
    }

    #[test]
    fn test_compile_in_and_builtins() {
        let expr =
            compile_rbac("keyMatch2(r.obj, p.obj) && r.act in ('read', \"write\")").unwrap();
        assert_eq!(
            expr.to_string(),
            "(keyMatch2(r.obj, p.obj) && r.act in ('read', 'write'))"
        );
    }

    #[test]
    fn test_compile_rejects_undeclared_tokens() {
        let err = compile_rbac("r.owner == p.sub").unwrap_err();
        assert!(err.contains("r.owner"));

        let err = compile_rbac("r.sub == q.sub").unwrap_err();
        assert!(err.contains("unknown reference"));
    }

    #[test]
    fn test_compile_rejects_bad_calls() {
        assert!(compile_rbac("g(r.sub)").unwrap_err().contains("2 arguments"));
        assert!(compile_rbac("g2(r.sub, p.sub)").unwrap_err().contains("3 arguments"));
        assert!(compile_rbac("g3(r.sub, p.sub)").unwrap_err().contains("unknown function"));
        assert!(compile_rbac("keyMatch(r.obj)").is_err());
    }

    #[test]
    fn test_compile_rejects_trailing_tokens() {
        assert!(compile_rbac("r.sub == p.sub p.obj").is_err());
        assert!(compile_rbac("(r.sub == p.sub").is_err());
        assert!(compile_rbac("").is_err());
        assert!(compile_rbac("r.act in ()").is_err());
    }
}
