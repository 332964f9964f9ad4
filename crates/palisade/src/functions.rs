//! Built-in matching functions callable from matchers.
//!
//! | Function | Pattern syntax |
//! |----------|----------------|
//! | `keyMatch(key, pattern)` | `*` matches any sequence |
//! | `keyMatch2(key, pattern)` | `:name` matches one path segment, `*` any sequence |
//! | `keyMatch3(key, pattern)` | `{name}` matches one path segment, `*` any sequence |
//! | `regexMatch(value, pattern)` | `regex` crate syntax, unanchored |
//! | `globMatch(value, pattern)` | `*` any run within a segment, `?` one character |
//! | `ipMatch(ip, pattern)` | an address or an IPv4/IPv6 CIDR block |
//!
//! The path-style functions compile their pattern into a token list and match
//! it with a dynamic-programming table, so run time is bounded by
//! `pattern.len() * key.len()` regardless of how many wildcards there are.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use regex::Regex;

// ============================================================================
// Path patterns
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Char(char),
    /// Any sequence, `/` included, possibly empty.
    AnySeq,
    /// One or more characters other than `/`.
    Segment,
    /// Zero or more characters other than `/`.
    SegmentRun,
    /// Exactly one character other than `/`.
    AnyChar,
}

fn matches(tokens: &[Token], input: &str) -> bool {
    let input: Vec<char> = input.chars().collect();
    let n = input.len();

    // `next[j]`: tokens[i + 1..] match input[j..]
    let mut next = vec![false; n + 1];
    next[n] = true;
    let mut cur = vec![false; n + 1];

    for token in tokens.iter().rev() {
        for j in (0..=n).rev() {
            let here = input.get(j).copied();
            let in_segment = here.is_some_and(|c| c != '/');
            cur[j] = match *token {
                Token::Char(c) => here == Some(c) && next[j + 1],
                Token::AnyChar => in_segment && next[j + 1],
                Token::AnySeq => next[j] || (here.is_some() && cur[j + 1]),
                Token::SegmentRun => next[j] || (in_segment && cur[j + 1]),
                Token::Segment => in_segment && (next[j + 1] || cur[j + 1]),
            };
        }
        std::mem::swap(&mut next, &mut cur);
    }

    next[0]
}

fn compile(pattern: &str, named: Option<(char, Option<char>)>, glob: bool) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, named) {
            ('*', _) if glob => tokens.push(Token::SegmentRun),
            ('?', _) if glob => tokens.push(Token::AnyChar),
            ('*', _) => tokens.push(Token::AnySeq),
            // `:name` runs to the next `/`.
            (c, Some((open, None))) if c == open => {
                while chars.next_if(|&c| c != '/').is_some() {}
                tokens.push(Token::Segment);
            }
            // `{name}` runs to the closing brace; unterminated braces are
            // literal.
            (c, Some((open, Some(close)))) if c == open => {
                let rest: String = chars.clone().collect();
                match rest.find(close) {
                    Some(end) => {
                        for _ in rest[..end].chars() {
                            chars.next();
                        }
                        chars.next();
                        tokens.push(Token::Segment);
                    }
                    None => tokens.push(Token::Char(c)),
                }
            }
            (c, _) => tokens.push(Token::Char(c)),
        }
    }

    tokens
}

/// `*` in `pattern` matches any sequence of characters.
pub fn key_match(key: &str, pattern: &str) -> bool {
    matches(&compile(pattern, None, false), key)
}

/// `:name` in `pattern` matches exactly one path segment; `*` matches any
/// sequence.
pub fn key_match2(key: &str, pattern: &str) -> bool {
    matches(&compile(pattern, Some((':', None)), false), key)
}

/// `{name}` in `pattern` matches exactly one path segment; `*` matches any
/// sequence.
pub fn key_match3(key: &str, pattern: &str) -> bool {
    matches(&compile(pattern, Some(('{', Some('}'))), false), key)
}

/// Shell-style glob: `*` matches within one segment, `?` one character.
pub fn glob_match(value: &str, pattern: &str) -> bool {
    matches(&compile(pattern, None, true), value)
}

// ============================================================================
// IP ranges
// ============================================================================

/// Whether `ip` equals `pattern` or lies inside the CIDR block `pattern`.
///
/// Addresses of different families never match.
pub fn ip_match(ip: &str, pattern: &str) -> Result<bool, String> {
    let ip: IpAddr = ip
        .trim()
        .parse()
        .map_err(|_| format!("invalid IP address {ip:?}"))?;

    let Some((network, prefix)) = pattern.trim().split_once('/') else {
        let other: IpAddr = pattern
            .trim()
            .parse()
            .map_err(|_| format!("invalid IP address {pattern:?}"))?;
        return Ok(ip == other);
    };

    let network: IpAddr = network
        .parse()
        .map_err(|_| format!("invalid CIDR network {pattern:?}"))?;
    let prefix: u32 = prefix
        .parse()
        .map_err(|_| format!("invalid CIDR prefix {pattern:?}"))?;

    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            if prefix > 32 {
                return Err(format!("CIDR prefix out of range in {pattern:?}"));
            }
            let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
            Ok(u32::from(ip) & mask == u32::from(net) & mask)
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            if prefix > 128 {
                return Err(format!("CIDR prefix out of range in {pattern:?}"));
            }
            let mask = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
            Ok(u128::from(ip) & mask == u128::from(net) & mask)
        }
        _ => Ok(false),
    }
}

// ============================================================================
// Regex cache
// ============================================================================

/// Patterns kept before the cache is flushed.
const REGEX_CACHE_LIMIT: usize = 1024;

/// Compiled `regexMatch` patterns, shared by every evaluation of an enforcer.
#[derive(Debug, Default)]
pub struct RegexCache {
    compiled: Mutex<HashMap<String, Regex>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `pattern` matches anywhere in `value`.
    pub fn is_match(&self, value: &str, pattern: &str) -> Result<bool, String> {
        // A poisoned cache only costs recompilation.
        let Ok(mut compiled) = self.compiled.lock() else {
            return Self::compile(pattern).map(|re| re.is_match(value));
        };

        if let Some(re) = compiled.get(pattern) {
            return Ok(re.is_match(value));
        }

        let re = Self::compile(pattern)?;
        let result = re.is_match(value);
        if compiled.len() >= REGEX_CACHE_LIMIT {
            compiled.clear();
        }
        compiled.insert(pattern.to_string(), re);
        Ok(result)
    }

    fn compile(pattern: &str) -> Result<Regex, String> {
        Regex::new(pattern).map_err(|e| format!("invalid regex {pattern:?}: {e}"))
    }

    pub fn len(&self) -> usize {
        self.compiled.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
