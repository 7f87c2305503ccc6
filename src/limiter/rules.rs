//! Block-rule expressions and the compiled content rule set

use parking_lot::RwLock;
use regex::Regex;
use std::sync::Arc;

use crate::error::{CoreError, Result};

/// Kind prefix of a typed block rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// The domain or any of its subdomains
    Domain,
    /// Exactly this domain
    Full,
    /// Any domain containing the value
    Keyword,
    Regexp,
    /// A port, port range or comma separated list of both
    Port,
}

impl RuleKind {
    fn from_prefix(s: &str) -> Option<Self> {
        match s {
            "domain" => Some(RuleKind::Domain),
            "full" => Some(RuleKind::Full),
            "keyword" => Some(RuleKind::Keyword),
            "regexp" => Some(RuleKind::Regexp),
            "port" => Some(RuleKind::Port),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Domain => "domain",
            RuleKind::Full => "full",
            RuleKind::Keyword => "keyword",
            RuleKind::Regexp => "regexp",
            RuleKind::Port => "port",
        }
    }
}

/// A parsed block-rule expression
///
/// `kind:value` and `kind!value` are typed rules. Anything without a known
/// kind prefix is a bare regular expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRule {
    kind: RuleKind,
    value: String,
}

impl BlockRule {
    pub fn parse(expr: &str) -> Result<Self> {
        let typed = expr
            .find([':', '!'])
            .and_then(|at| RuleKind::from_prefix(&expr[..at]).map(|kind| (kind, &expr[at + 1..])));
        let (kind, value) = typed.unwrap_or((RuleKind::Regexp, expr));

        if value.is_empty() {
            return Err(invalid(expr, "empty rule value"));
        }
        if kind == RuleKind::Port && !is_port_list(value) {
            return Err(invalid(expr, "not a port, range or list"));
        }
        let rule = Self {
            kind,
            value: value.to_string(),
        };
        if let Some(pattern) = rule.content_pattern() {
            Regex::new(&pattern).map_err(|e| invalid(expr, &e.to_string()))?;
        }
        Ok(rule)
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Regular expression matched against connection content (SNI, domain)
    ///
    /// Port rules never match content.
    pub fn content_pattern(&self) -> Option<String> {
        let escaped = || regex::escape(&self.value);
        match self.kind {
            RuleKind::Domain => Some(format!(r"(^|\.){}$", escaped())),
            RuleKind::Full => Some(format!("^{}$", escaped())),
            RuleKind::Keyword => Some(escaped()),
            RuleKind::Regexp => Some(self.value.clone()),
            RuleKind::Port => None,
        }
    }

    /// Domain entry of the routing rule, with its kind prefix
    pub fn routing_domain(&self) -> Option<String> {
        match self.kind {
            RuleKind::Port => None,
            kind => Some(format!("{}:{}", kind.as_str(), self.value)),
        }
    }

    /// Port entry of the routing rule
    pub fn routing_port(&self) -> Option<&str> {
        match self.kind {
            RuleKind::Port => Some(&self.value),
            _ => None,
        }
    }
}

fn invalid(rule: &str, reason: &str) -> CoreError {
    CoreError::InvalidRule {
        rule: rule.to_string(),
        reason: reason.to_string(),
    }
}

fn is_port_list(value: &str) -> bool {
    value.split(',').all(|part| {
        let mut bounds = part.trim().splitn(2, '-');
        bounds.all(|b| b.trim().parse::<u16>().is_ok())
    })
}

/// Compiled content rules of a node
///
/// The whole set is swapped at once, so a check sees either the old or the
/// new rules.
#[derive(Debug)]
pub struct RuleSet {
    rules: RwLock<Arc<[Regex]>>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            rules: RwLock::new(Arc::from(Vec::new())),
        }
    }
}

impl RuleSet {
    pub fn new(exprs: &[String]) -> Result<Self> {
        Ok(Self {
            rules: RwLock::new(Self::compile(exprs)?),
        })
    }

    /// Compile block-rule expressions, skipping those without content patterns
    pub fn compile(exprs: &[String]) -> Result<Arc<[Regex]>> {
        let mut compiled = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let rule = BlockRule::parse(expr)?;
            if let Some(pattern) = rule.content_pattern() {
                let re = Regex::new(&pattern).map_err(|e| invalid(expr, &e.to_string()))?;
                compiled.push(re);
            }
        }
        Ok(Arc::from(compiled))
    }

    /// Check if any rule matches any of the contents
    pub fn matches(&self, contents: &[&str]) -> bool {
        if contents.is_empty() {
            return false;
        }
        let rules = self.rules.read();
        rules
            .iter()
            .any(|rule| contents.iter().any(|content| rule.is_match(content)))
    }

    /// Replace the whole set; on a compile error the current set is kept
    pub fn replace(&self, exprs: &[String]) -> Result<()> {
        let compiled = Self::compile(exprs)?;
        *self.rules.write() = compiled;
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<[Regex]> {
        Arc::clone(&self.rules.read())
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}
